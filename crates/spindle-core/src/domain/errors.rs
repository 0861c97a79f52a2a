//! Errors - エラー型と分類
//!
//! # 分類
//! - **MissingTrigger**: その firing にとって致命的。リトライしない。
//! - **EngineError**: エンジン側の bookkeeping 失敗。呼び出し箇所で握りつぶすか、
//!   明示的な remove のときだけ呼び出し元へ返す。
//! - **TaskError**: ジョブ本体が返したエラー。Future と `lastRunState.endState` に出る。
//! - **AwaitError**: `TaskFuture::wait` からだけ返る。
//! - **AlreadyRunning**: 前の実行が終わる前の on_start。その firing は始めない。
//! - **AlreadyResolved**: 同じ Future の二重 resolve。bridge のバグを早く表に出すため
//!   握りつぶさない。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::ids::{RunId, TaskIdentity};

/// ジョブ本体の（ラップされていない）エラー
///
/// `Arc` なので同一のエラーを Future の複数の待ち手へ配れる。
pub type TaskError = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} has no associated trigger")]
    MissingTrigger(TaskIdentity),

    #[error("unsupported schedule kind: {0}")]
    UnsupportedScheduleKind(String),

    #[error("task not found: {0}")]
    TaskNotFound(TaskIdentity),

    #[error("task already scheduled: {0}")]
    DuplicateTask(TaskIdentity),

    #[error("task {0} is already running")]
    AlreadyRunning(TaskIdentity),

    #[error("future of {run_id} was already resolved")]
    AlreadyResolved { run_id: RunId },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("config error: {0}")]
    Config(String),
}

/// トリガーエンジン側の失敗（lookup / remove など）
#[derive(Debug, Error)]
#[error("engine error: {message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// エンジンがジョブ実行の失敗を包んだもの
///
/// `cause` があればジョブ本体のエラー、なければエンジン自身の失敗
/// （ジョブ本体の panic など）。
#[derive(Debug, Clone)]
pub struct JobExecutionError {
    message: String,
    cause: Option<TaskError>,
}

impl JobExecutionError {
    /// エンジン自身の失敗（cause なし）
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    /// ジョブ本体のエラーを包む
    pub fn wrapping(cause: TaskError) -> Self {
        Self {
            message: format!("job execution failed: {cause}"),
            cause: Some(cause),
        }
    }

    pub fn cause(&self) -> Option<&TaskError> {
        self.cause.as_ref()
    }
}

impl fmt::Display for JobExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobExecutionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// エンジンのラップを 1 段だけ剥がす。
///
/// cause があればそれを（`Arc` の同一性を保ったまま）返し、なければラッパー自身を返す。
/// 再帰的には剥がさない。
pub fn unwrap_job_error(error: JobExecutionError) -> TaskError {
    match error.cause {
        Some(cause) => cause,
        None => Arc::new(error),
    }
}

/// `TaskFuture::wait` の失敗
#[derive(Debug, Clone, Error)]
pub enum AwaitError {
    #[error("timed out after {0:?} waiting for task result")]
    Timeout(Duration),

    #[error("task failed: {0}")]
    Failed(TaskError),

    #[error("task was cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("disk full")]
    struct DiskFull;

    #[test]
    fn unwrap_returns_the_exact_cause() {
        let cause: TaskError = Arc::new(DiskFull);
        let wrapped = JobExecutionError::wrapping(Arc::clone(&cause));

        let delivered = unwrap_job_error(wrapped);
        assert!(Arc::ptr_eq(&delivered, &cause));
        assert_eq!(delivered.to_string(), "disk full");
    }

    #[test]
    fn unwrap_keeps_bare_engine_error() {
        let bare = JobExecutionError::new("job body aborted");
        let delivered = unwrap_job_error(bare);
        assert_eq!(delivered.to_string(), "job body aborted");
        assert!(delivered.downcast_ref::<JobExecutionError>().is_some());
    }

    #[test]
    fn unwrap_is_one_level_only() {
        let inner: TaskError = Arc::new(JobExecutionError::wrapping(Arc::new(DiskFull)));
        let outer = JobExecutionError::wrapping(Arc::clone(&inner));

        let delivered = unwrap_job_error(outer);
        assert!(Arc::ptr_eq(&delivered, &inner));
        assert!(delivered.downcast_ref::<JobExecutionError>().is_some());
    }

    #[test]
    fn wrapper_exposes_cause_as_source() {
        let wrapped = JobExecutionError::wrapping(Arc::new(DiskFull));
        let source = std::error::Error::source(&wrapped).unwrap();
        assert_eq!(source.to_string(), "disk full");
    }

    #[test]
    fn engine_error_converts_into_scheduler_error() {
        let err: SchedulerError = EngineError::new("store offline").into();
        assert_eq!(err.to_string(), "engine error: store offline");
    }
}
