//! TriggerEngine port - 実際に時刻どおりジョブを発火させる外部エンジンとの境界
//!
//! コアが前提にするのは以下だけ:
//! - TaskIdentity ごとに「現在関連付けられている trigger」を引ける
//! - エンジン側のジョブ/trigger を削除できる
//! - 同じ TaskIdentity の firing は重ならない（エンジン側の保証。コアでは再実装しない）
//!
//! エンジンは firing ごとに `FiringContext` を作り、
//! `TaskJobListener::on_start` / `on_finish` を呼ぶ。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, TaskConfiguration, TaskIdentity, TriggerKey};

/// エンジンのネイティブな trigger 種別
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerKind {
    /// `start_at` から `interval` ごと。`repeat_count` は初回以降の繰り返し回数
    /// （None は無制限、Some(0) は 1 回だけ）。
    Simple {
        start_at: DateTime<Utc>,
        interval: Option<Duration>,
        repeat_count: Option<u32>,
    },

    /// cron 式（秒フィールドあり）
    Cron {
        start_at: DateTime<Utc>,
        expression: String,
    },

    /// カレンダー上の N ヶ月ごと
    CalendarInterval {
        start_at: DateTime<Utc>,
        months: u32,
    },
}

impl TriggerKind {
    pub fn start_at(&self) -> DateTime<Utc> {
        match self {
            TriggerKind::Simple { start_at, .. }
            | TriggerKind::Cron { start_at, .. }
            | TriggerKind::CalendarInterval { start_at, .. } => *start_at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TriggerKind::Simple { .. } => "simple",
            TriggerKind::Cron { .. } => "cron",
            TriggerKind::CalendarInterval { .. } => "calendar_interval",
        }
    }
}

/// エンジン側の trigger インスタンス（スナップショット）
///
/// 同じ `key` は同じ trigger インスタンスを指す。reschedule すると key が変わる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    key: TriggerKey,
    kind: TriggerKind,
    next_fire_time: Option<DateTime<Utc>>,
    times_triggered: u32,
}

impl Trigger {
    pub fn new(key: TriggerKey, kind: TriggerKind, next_fire_time: Option<DateTime<Utc>>) -> Self {
        Self {
            key,
            kind,
            next_fire_time,
            times_triggered: 0,
        }
    }

    pub fn key(&self) -> TriggerKey {
        self.key
    }

    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    /// None ならこの trigger はもう発火しない
    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire_time
    }

    pub fn times_triggered(&self) -> u32 {
        self.times_triggered
    }

    /// 発火後の状態（発火回数 +1、次回時刻を更新）
    pub fn fired(&self, next_fire_time: Option<DateTime<Utc>>) -> Self {
        Self {
            next_fire_time,
            times_triggered: self.times_triggered.saturating_add(1),
            ..self.clone()
        }
    }
}

/// ジョブごとの可変 key-value ストア（エンジン所有）
///
/// firing 中に書くのは `on_finish` だけ（同じ TaskIdentity の firing は重ならない）。
/// 読み手は並行にいるので、複数キーの書き込みは `put_all` で 1 回のロックにまとめる。
#[derive(Debug, Clone, Default)]
pub struct JobDataMap {
    entries: Arc<RwLock<BTreeMap<String, String>>>,
}

impl JobDataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }

    /// まとめて書き込む。読み手には全部反映済みか、どれも未反映かのどちらかに見える。
    pub fn put_all<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut guard = self.entries.write();
        for (key, value) in entries {
            guard.insert(key, value);
        }
    }

    pub fn snapshot(&self) -> TaskConfiguration {
        TaskConfiguration::from(self.entries.read().clone())
    }
}

impl From<&TaskConfiguration> for JobDataMap {
    fn from(configuration: &TaskConfiguration) -> Self {
        let map = JobDataMap::new();
        map.put_all(
            configuration
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        map
    }
}

/// 1 回の firing の文脈
///
/// `trigger` は「この firing を起こした」trigger。run-now の場合は一時的な trigger で、
/// タスクに関連付けられた trigger とは別物になる。
#[derive(Debug, Clone)]
pub struct FiringContext {
    identity: TaskIdentity,
    fire_time: DateTime<Utc>,
    trigger: Trigger,
    job_data: JobDataMap,
}

impl FiringContext {
    pub fn new(
        identity: TaskIdentity,
        fire_time: DateTime<Utc>,
        trigger: Trigger,
        job_data: JobDataMap,
    ) -> Self {
        Self {
            identity,
            fire_time,
            trigger,
            job_data,
        }
    }

    pub fn identity(&self) -> &TaskIdentity {
        &self.identity
    }

    pub fn fire_time(&self) -> DateTime<Utc> {
        self.fire_time
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    pub fn job_data(&self) -> &JobDataMap {
        &self.job_data
    }

    /// エンジンが firing trigger を進めた後の文脈
    pub fn with_trigger(self, trigger: Trigger) -> Self {
        Self { trigger, ..self }
    }
}

/// TriggerEngine はコアから見たエンジンの操作
pub trait TriggerEngine: Send + Sync {
    /// TaskIdentity に現在関連付けられている trigger。なければ Ok(None)。
    fn trigger_of(&self, identity: &TaskIdentity) -> Result<Option<Trigger>, EngineError>;

    /// エンジン側のジョブ/trigger を削除。存在したかどうかを返す。
    fn remove_task(&self, identity: &TaskIdentity) -> Result<bool, EngineError>;

    /// 一時的な trigger で今すぐ発火させる（run-now）。
    fn fire_now(&self, identity: &TaskIdentity) -> Result<(), EngineError>;
}
