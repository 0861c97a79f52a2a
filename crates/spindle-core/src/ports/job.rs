//! Job port - ジョブ本体の境界
//!
//! ジョブ本体（メタデータ再生成、リポジトリスキャンなど）はコアの外側。
//! コアが知っているのは「実行すると T かエラーを返す」ことと、
//! キャンセルを協調的にポーリングしてくれることだけ。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{TaskConfiguration, TaskError, TaskIdentity};

/// キャンセル要求の問い合わせ先（実体は `TaskFuture`）
pub trait CancellationSignal: Send + Sync {
    fn is_cancelled(&self) -> bool;
}

/// Job は 1 回の firing で実行される本体
///
/// # 使用例
/// ```ignore
/// struct RebuildMetadata;
///
/// #[async_trait]
/// impl Job<u64> for RebuildMetadata {
///     async fn execute(&self, ctx: &JobContext) -> Result<u64, TaskError> {
///         let mut done = 0;
///         for repo in repositories(ctx.configuration()) {
///             if ctx.is_cancelled() {
///                 break;
///             }
///             rebuild(repo).await?;
///             done += 1;
///         }
///         Ok(done)
///     }
/// }
/// ```
#[async_trait]
pub trait Job<T>: Send + Sync {
    async fn execute(&self, ctx: &JobContext) -> Result<T, TaskError>;
}

/// ジョブ本体に渡す文脈
#[derive(Clone)]
pub struct JobContext {
    identity: TaskIdentity,
    fire_time: DateTime<Utc>,
    configuration: TaskConfiguration,
    cancellation: Arc<dyn CancellationSignal>,
}

impl JobContext {
    pub fn new(
        identity: TaskIdentity,
        fire_time: DateTime<Utc>,
        configuration: TaskConfiguration,
        cancellation: Arc<dyn CancellationSignal>,
    ) -> Self {
        Self {
            identity,
            fire_time,
            configuration,
            cancellation,
        }
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    pub fn configuration(&self) -> &TaskConfiguration {
        &self.configuration
    }

    /// キャンセルは助言的。止めるかどうかはジョブ本体が決める。
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("identity", &self.identity)
            .field("fire_time", &self.fire_time)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
