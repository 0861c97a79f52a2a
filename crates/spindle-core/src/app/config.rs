//! SchedulerConfig - spindle.toml + SPINDLE_* 環境変数

use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::domain::{SchedulerError, TaskIdentity};

pub const DEFAULT_CONFIG_PATH: &str = "spindle.toml";
pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// 名前だけで登録されたタスクのグループ
    #[serde(default = "default_group")]
    pub default_group: String,

    /// in-memory エンジンが期限の来た trigger を探す間隔
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// 呼び出し側が future を待つときの既定の上限
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}
fn default_poll_interval_ms() -> u64 {
    1_000
}
fn default_await_timeout_ms() -> u64 {
    30_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_group: default_group(),
            poll_interval_ms: default_poll_interval_ms(),
            await_timeout_ms: default_await_timeout_ms(),
        }
    }
}

impl SchedulerConfig {
    /// TOML ファイルを読み、SPINDLE_* 環境変数で上書きする。
    ///
    /// パスを省略すると `./spindle.toml`。ファイルがなければ既定値のまま。
    pub fn load(config_path: Option<&str>) -> Result<Self, SchedulerError> {
        let path = config_path.unwrap_or(DEFAULT_CONFIG_PATH);

        let config: SchedulerConfig = Figment::from(Serialized::defaults(SchedulerConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SPINDLE_"))
            .extract()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.default_group.trim().is_empty() {
            return Err(SchedulerError::Config("default_group must not be empty".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SchedulerError::Config("poll_interval_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }

    /// 既定グループのタスク名
    pub fn identity(&self, name: impl Into<String>) -> TaskIdentity {
        TaskIdentity::new(self.default_group.clone(), name)
    }
}
