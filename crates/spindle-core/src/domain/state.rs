//! Task lifecycle state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::configuration::TaskConfiguration;
use super::schedule::Schedule;

/// Coarse status of a task across firings.
///
/// State transitions:
/// - Waiting -> Running (fire)
/// - Running -> Waiting (finished, another fire is scheduled)
/// - Running -> Done (finished, no further fire)
///
/// Done is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Waiting,
    Running,
    Done,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Done)
    }

    /// Is `self -> next` a legal transition?
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        matches!(
            (self, next),
            (LifecycleState::Waiting, LifecycleState::Running)
                | (LifecycleState::Running, LifecycleState::Waiting)
                | (LifecycleState::Running, LifecycleState::Done)
        )
    }
}

/// How one firing concluded. Recorded only at the end of a RUNNING period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELED")]
    Canceled,
}

impl EndState {
    /// Persisted name (`lastRunState.endState`).
    pub fn name(self) -> &'static str {
        match self {
            EndState::Ok => "OK",
            EndState::Failed => "FAILED",
            EndState::Canceled => "CANCELED",
        }
    }

    /// FAILED wins over CANCELED: a body error is always reported as a failure.
    pub fn classify(failed: bool, cancelled: bool) -> Self {
        if failed {
            EndState::Failed
        } else if cancelled {
            EndState::Canceled
        } else {
            EndState::Ok
        }
    }
}

impl fmt::Display for EndState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EndState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(EndState::Ok),
            "FAILED" => Ok(EndState::Failed),
            "CANCELED" => Ok(EndState::Canceled),
            other => Err(format!("unknown end state: {other}")),
        }
    }
}

/// Immutable snapshot of one task.
///
/// `next_fire_time` is absent iff the lifecycle is `Done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskState {
    lifecycle: LifecycleState,
    configuration: TaskConfiguration,
    schedule: Schedule,
    next_fire_time: Option<DateTime<Utc>>,
}

impl TaskState {
    pub fn new(
        lifecycle: LifecycleState,
        configuration: TaskConfiguration,
        schedule: Schedule,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            lifecycle,
            configuration,
            schedule,
            next_fire_time,
        }
    }

    /// State after a run: Done if nothing fires any more, Waiting otherwise.
    pub fn after_run(
        configuration: TaskConfiguration,
        schedule: Schedule,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> Self {
        let lifecycle = if next_fire_time.is_some() {
            LifecycleState::Waiting
        } else {
            LifecycleState::Done
        };
        Self::new(lifecycle, configuration, schedule, next_fire_time)
    }

    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle
    }

    pub fn configuration(&self) -> &TaskConfiguration {
        &self.configuration
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn is_done(&self) -> bool {
        self.lifecycle.is_terminal()
    }

    /// The same snapshot, but terminal (used for removed tasks).
    pub(crate) fn into_done(self) -> Self {
        Self {
            lifecycle: LifecycleState::Done,
            next_fire_time: None,
            ..self
        }
    }

    /// Same lifecycle and configuration, new schedule.
    pub(crate) fn with_schedule(self, schedule: Schedule, next_fire_time: Option<DateTime<Utc>>) -> Self {
        Self {
            schedule,
            next_fire_time,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::fire(LifecycleState::Waiting, LifecycleState::Running, true)]
    #[case::finish_recurring(LifecycleState::Running, LifecycleState::Waiting, true)]
    #[case::finish_last(LifecycleState::Running, LifecycleState::Done, true)]
    #[case::skip_running(LifecycleState::Waiting, LifecycleState::Done, false)]
    #[case::leave_done(LifecycleState::Done, LifecycleState::Waiting, false)]
    #[case::restart_done(LifecycleState::Done, LifecycleState::Running, false)]
    #[case::double_fire(LifecycleState::Running, LifecycleState::Running, false)]
    fn transitions(
        #[case] from: LifecycleState,
        #[case] to: LifecycleState,
        #[case] legal: bool,
    ) {
        assert_eq!(from.can_transition_to(to), legal);
    }

    #[rstest]
    #[case::ok(false, false, EndState::Ok)]
    #[case::cancelled(false, true, EndState::Canceled)]
    #[case::failed(true, false, EndState::Failed)]
    #[case::failed_wins(true, true, EndState::Failed)]
    fn classify_end_state(#[case] failed: bool, #[case] cancelled: bool, #[case] expected: EndState) {
        assert_eq!(EndState::classify(failed, cancelled), expected);
    }

    #[test]
    fn end_state_names_round_trip() {
        for state in [EndState::Ok, EndState::Failed, EndState::Canceled] {
            assert_eq!(state.name().parse::<EndState>(), Ok(state));
            assert_eq!(
                serde_json::to_string(&state).unwrap(),
                format!("\"{}\"", state.name())
            );
        }
        assert!("ok".parse::<EndState>().is_err());
    }

    #[test]
    fn after_run_follows_next_fire_time() {
        let next = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let waiting = TaskState::after_run(TaskConfiguration::new(), Schedule::Manual, Some(next));
        assert_eq!(waiting.lifecycle(), LifecycleState::Waiting);

        let done = TaskState::after_run(TaskConfiguration::new(), Schedule::Manual, None);
        assert_eq!(done.lifecycle(), LifecycleState::Done);
        assert!(done.is_done());
    }

    #[test]
    fn into_done_clears_next_fire_time() {
        let next = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let state = TaskState::new(
            LifecycleState::Waiting,
            TaskConfiguration::new(),
            Schedule::Manual,
            Some(next),
        )
        .into_done();
        assert_eq!(state.lifecycle(), LifecycleState::Done);
        assert_eq!(state.next_fire_time(), None);
    }
}
