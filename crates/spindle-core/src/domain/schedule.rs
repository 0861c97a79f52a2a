//! Schedule - 繰り返しのドメイン表現
//!
//! トリガーエンジンのネイティブ表現（`ports::trigger_engine::TriggerKind`）とは独立。
//! 相互変換は `app::converter::ScheduleConverter` が担当する。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::SchedulerError;

/// タスクがいつ発火するか
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// 自動では発火しない。run-now でのみ実行される。
    Manual,

    /// `start_at` に 1 回だけ発火する。
    Once { start_at: DateTime<Utc> },

    /// `start_at` から `every` ごとに発火する。
    Interval {
        start_at: DateTime<Utc>,
        every: Duration,
    },

    /// cron 式に従って発火する（秒フィールドあり）。
    Cron {
        start_at: DateTime<Utc>,
        expression: String,
    },
}

impl Schedule {
    pub fn once(start_at: DateTime<Utc>) -> Self {
        Self::Once { start_at }
    }

    pub fn interval(start_at: DateTime<Utc>, every: Duration) -> Self {
        Self::Interval { start_at, every }
    }

    pub fn cron(start_at: DateTime<Utc>, expression: impl Into<String>) -> Self {
        Self::Cron {
            start_at,
            expression: expression.into(),
        }
    }

    /// 表示・ログ用の種別名
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Manual => "manual",
            Schedule::Once { .. } => "once",
            Schedule::Interval { .. } => "interval",
            Schedule::Cron { .. } => "cron",
        }
    }

    /// 構造的に不正な schedule を弾く。
    ///
    /// cron 式の文法チェックはエンジン側で行う。
    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Schedule::Interval { every, .. } if every.is_zero() => Err(
                SchedulerError::InvalidSchedule("interval must be greater than zero".to_string()),
            ),
            Schedule::Cron { expression, .. } if expression.trim().is_empty() => Err(
                SchedulerError::InvalidSchedule("cron expression is empty".to_string()),
            ),
            _ => Ok(()),
        }
    }
}
