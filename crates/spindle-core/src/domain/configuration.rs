//! TaskConfiguration - ジョブパラメータ（string → string）
//!
//! エンジンの `JobDataMap` と往復する。キーの順序に意味はない。
//! 直近の実行結果も `lastRunState.*` キーとしてここに書き込まれる。

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::state::EndState;

/// 直近の実行結果キー（ビット単位で固定）
pub const LAST_RUN_END_STATE_KEY: &str = "lastRunState.endState";
pub const LAST_RUN_STARTED_KEY: &str = "lastRunState.runStarted";
pub const LAST_RUN_DURATION_KEY: &str = "lastRunState.runDuration";

const NAME_KEY: &str = ".name";
const ENABLED_KEY: &str = ".enabled";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskConfiguration {
    entries: BTreeMap<String, String>,
}

impl TaskConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_string(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// `"true"` / `"false"`（大文字小文字は無視）以外は None
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get_string(key)?;
        if value.eq_ignore_ascii_case("true") {
            Some(true)
        } else if value.eq_ignore_ascii_case("false") {
            Some(false)
        } else {
            None
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_string(key)?.trim().parse().ok()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // ----------------------------------------
    // よく使うキー
    // ----------------------------------------

    pub fn name(&self) -> Option<&str> {
        self.get_string(NAME_KEY)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set(NAME_KEY, name);
    }

    /// 未設定なら有効扱い。無効なタスクは期限が来ても発火しない（run-now は可）。
    pub fn is_enabled(&self) -> bool {
        self.get_bool(ENABLED_KEY).unwrap_or(true)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.set(ENABLED_KEY, enabled.to_string());
    }

    /// 永続化された直近の実行結果。3 つのキーが揃っていなければ None。
    pub fn last_run_state(&self) -> Option<LastRunState> {
        let end_state = self.get_string(LAST_RUN_END_STATE_KEY)?.parse().ok()?;
        let started_ms = self.get_i64(LAST_RUN_STARTED_KEY)?;
        let duration_ms = u64::try_from(self.get_i64(LAST_RUN_DURATION_KEY)?).ok()?;
        let run_started = Utc.timestamp_millis_opt(started_ms).single()?;
        Some(LastRunState {
            end_state,
            run_started,
            run_duration: Duration::from_millis(duration_ms),
        })
    }
}

impl FromIterator<(String, String)> for TaskConfiguration {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for TaskConfiguration {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

/// 1 回の実行の結果（`lastRunState.*` の型付きビュー）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastRunState {
    pub end_state: EndState,
    pub run_started: DateTime<Utc>,
    pub run_duration: Duration,
}

impl LastRunState {
    /// `finished_at` が `run_started` より前なら duration は 0
    pub fn new(end_state: EndState, run_started: DateTime<Utc>, finished_at: DateTime<Utc>) -> Self {
        let run_duration = (finished_at - run_started).to_std().unwrap_or(Duration::ZERO);
        Self {
            end_state,
            run_started,
            run_duration,
        }
    }

    /// 永続化用のキーと値（10 進の文字列）
    pub fn to_entries(&self) -> [(String, String); 3] {
        [
            (
                LAST_RUN_END_STATE_KEY.to_string(),
                self.end_state.name().to_string(),
            ),
            (
                LAST_RUN_STARTED_KEY.to_string(),
                self.run_started.timestamp_millis().to_string(),
            ),
            (
                LAST_RUN_DURATION_KEY.to_string(),
                self.run_duration.as_millis().to_string(),
            ),
        ]
    }
}
