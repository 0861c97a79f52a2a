//! ScheduleConverter - ネイティブ trigger ⇔ Schedule
//!
//! 純粋関数のみ。副作用なし。
//!
//! | TriggerKind                                   | Schedule   |
//! |-----------------------------------------------|------------|
//! | Simple, `start_at == MAX_UTC`                 | Manual     |
//! | Simple, interval なし / `repeat_count == 0`   | Once       |
//! | Simple, interval あり, 無制限                 | Interval   |
//! | Cron                                          | Cron       |
//! | Simple（回数制限つき繰り返し）, CalendarInterval | 非対応   |

use chrono::{DateTime, Utc};

use crate::domain::{Schedule, SchedulerError};
use crate::ports::{Trigger, TriggerKind};

/// Manual を表すネイティブ表現の開始時刻（「自分では決して発火しない」）
pub const MANUAL_START_AT: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleConverter;

impl ScheduleConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn to_schedule(&self, trigger: &Trigger) -> Result<Schedule, SchedulerError> {
        self.kind_to_schedule(trigger.kind())
    }

    pub fn kind_to_schedule(&self, kind: &TriggerKind) -> Result<Schedule, SchedulerError> {
        match kind {
            TriggerKind::Simple { start_at, .. } if *start_at == MANUAL_START_AT => {
                Ok(Schedule::Manual)
            }
            TriggerKind::Simple {
                start_at,
                interval: None,
                ..
            }
            | TriggerKind::Simple {
                start_at,
                repeat_count: Some(0),
                ..
            } => Ok(Schedule::Once {
                start_at: *start_at,
            }),
            TriggerKind::Simple {
                start_at,
                interval: Some(every),
                repeat_count: None,
            } => Ok(Schedule::Interval {
                start_at: *start_at,
                every: *every,
            }),
            TriggerKind::Simple { .. } => Err(SchedulerError::UnsupportedScheduleKind(
                "simple trigger with bounded repeat count".to_string(),
            )),
            TriggerKind::Cron {
                start_at,
                expression,
            } => Ok(Schedule::Cron {
                start_at: *start_at,
                expression: expression.clone(),
            }),
            TriggerKind::CalendarInterval { .. } => Err(SchedulerError::UnsupportedScheduleKind(
                kind.name().to_string(),
            )),
        }
    }

    /// 逆変換。全ての Schedule に対して定義される。
    pub fn to_trigger_kind(&self, schedule: &Schedule) -> TriggerKind {
        match schedule {
            Schedule::Manual => TriggerKind::Simple {
                start_at: MANUAL_START_AT,
                interval: None,
                repeat_count: Some(0),
            },
            Schedule::Once { start_at } => TriggerKind::Simple {
                start_at: *start_at,
                interval: None,
                repeat_count: Some(0),
            },
            Schedule::Interval { start_at, every } => TriggerKind::Simple {
                start_at: *start_at,
                interval: Some(*every),
                repeat_count: None,
            },
            Schedule::Cron {
                start_at,
                expression,
            } => TriggerKind::Cron {
                start_at: *start_at,
                expression: expression.clone(),
            },
        }
    }
}
