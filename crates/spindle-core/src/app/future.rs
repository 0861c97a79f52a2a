//! TaskFuture - 1 回の firing に対応するハンドル
//!
//! # 状態
//! - `cancelled`: cancel() が受理されたか
//! - `settled`: bridge が結果の分類（EndState）を確定したか。以降 cancel() は受理されない
//! - `outcome`: resolve された結果。一度入ったら変わらない
//!
//! cancel / settle / resolve は 1 つの Mutex の中で判定するので、
//! cancel と resolve が競合しても結果は決定的になる。
//! 待ち手は `Notify` で起こす。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::{AwaitError, RunId, SchedulerError, TaskError, TaskIdentity};
use crate::ports::CancellationSignal;

/// 1 回の実行の結果
pub type TaskOutcome<T> = Result<T, TaskError>;

struct Phase<T> {
    cancelled: bool,
    settled: bool,
    outcome: Option<TaskOutcome<T>>,
}

struct Inner<T> {
    identity: TaskIdentity,
    run_id: RunId,
    started_at: DateTime<Utc>,
    phase: Mutex<Phase<T>>,
    resolved: Notify,
}

/// TaskFuture は clone しても同じ実行を指す
pub struct TaskFuture<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for TaskFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> TaskFuture<T> {
    pub(crate) fn new(identity: TaskIdentity, run_id: RunId, started_at: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Inner {
                identity,
                run_id,
                started_at,
                phase: Mutex::new(Phase {
                    cancelled: false,
                    settled: false,
                    outcome: None,
                }),
                resolved: Notify::new(),
            }),
        }
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.inner.identity
    }

    pub fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    /// 生成時（= fire time）に固定
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// キャンセルを要求する。結果が確定する前だけ受理され、true を返す。
    ///
    /// 実行中の処理を止めはしない。ジョブ本体が `JobContext::is_cancelled` を見て止まる。
    pub fn cancel(&self) -> bool {
        let mut phase = self.inner.phase.lock();
        if phase.settled || phase.outcome.is_some() {
            return false;
        }
        phase.cancelled = true;
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.phase.lock().cancelled
    }

    pub fn is_done(&self) -> bool {
        self.inner.phase.lock().outcome.is_some()
    }

    /// 同じ実行を指すハンドルか
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// 結果の分類を確定させ、キャンセルが受理済みだったかを返す。
    /// 以降の cancel() は false。
    pub(crate) fn settle(&self) -> bool {
        let mut phase = self.inner.phase.lock();
        phase.settled = true;
        phase.cancelled
    }

    /// 結果を書き込み、待ち手を起こす。2 回目は `AlreadyResolved`。
    pub(crate) fn resolve(&self, outcome: TaskOutcome<T>) -> Result<(), SchedulerError> {
        {
            let mut phase = self.inner.phase.lock();
            if phase.outcome.is_some() {
                return Err(SchedulerError::AlreadyResolved {
                    run_id: self.inner.run_id,
                });
            }
            phase.settled = true;
            phase.outcome = Some(outcome);
        }
        self.inner.resolved.notify_waiters();
        Ok(())
    }
}

impl<T: Clone> TaskFuture<T> {
    /// 待たずに結果を覗く
    pub fn try_outcome(&self) -> Option<TaskOutcome<T>> {
        self.inner.phase.lock().outcome.clone()
    }

    /// resolve されるか `timeout` が過ぎるまで待つ。
    ///
    /// - 成功 → `Ok(value)`
    /// - ジョブ本体の失敗 → `AwaitError::Failed`（ジョブ自身のエラー）
    /// - キャンセル受理済みで成功 → `AwaitError::Cancelled`
    /// - 期限切れ → `AwaitError::Timeout`（実行には影響しない）
    pub async fn wait(&self, timeout: Duration) -> Result<T, AwaitError> {
        let (cancelled, outcome) = tokio::time::timeout(timeout, self.wait_resolved())
            .await
            .map_err(|_| AwaitError::Timeout(timeout))?;

        match outcome {
            Ok(_) if cancelled => Err(AwaitError::Cancelled),
            Ok(value) => Ok(value),
            Err(error) => Err(AwaitError::Failed(error)),
        }
    }

    async fn wait_resolved(&self) -> (bool, TaskOutcome<T>) {
        loop {
            // 状態を見る前に登録しておかないと、間の notify_waiters を取りこぼす
            let notified = self.inner.resolved.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let phase = self.inner.phase.lock();
                if let Some(outcome) = &phase.outcome {
                    return (phase.cancelled, outcome.clone());
                }
            }

            notified.await;
        }
    }
}

impl<T: Send + 'static> CancellationSignal for TaskFuture<T> {
    fn is_cancelled(&self) -> bool {
        TaskFuture::is_cancelled(self)
    }
}

impl<T> fmt::Debug for TaskFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = self.inner.phase.lock();
        f.debug_struct("TaskFuture")
            .field("identity", &self.inner.identity)
            .field("run_id", &self.inner.run_id)
            .field("started_at", &self.inner.started_at)
            .field("cancelled", &phase.cancelled)
            .field("done", &phase.outcome.is_some())
            .finish()
    }
}
