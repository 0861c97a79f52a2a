//! Domain model (IDs, schedules, configuration, lifecycle state, errors).
//!
//! ports / app / impls のどれにも依存しない。

pub mod configuration;
pub mod errors;
pub mod ids;
pub mod schedule;
pub mod state;

pub use configuration::{
    LastRunState, TaskConfiguration, LAST_RUN_DURATION_KEY, LAST_RUN_END_STATE_KEY,
    LAST_RUN_STARTED_KEY,
};
pub use errors::{
    unwrap_job_error, AwaitError, EngineError, JobExecutionError, SchedulerError, TaskError,
};
pub use ids::{RunId, TaskIdentity, TriggerKey};
pub use schedule::Schedule;
pub use state::{EndState, LifecycleState, TaskState};
