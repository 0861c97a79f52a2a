//! app 層のテスト用スタブ

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use ulid::Ulid;

use crate::domain::{EngineError, TaskIdentity, TriggerKey};
use crate::ports::{Trigger, TriggerEngine, TriggerKind};

pub(crate) fn at_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

pub(crate) fn identity() -> TaskIdentity {
    TaskIdentity::new("test", "rebuild-metadata")
}

pub(crate) fn one_shot(start_at: DateTime<Utc>, next: Option<DateTime<Utc>>) -> Trigger {
    Trigger::new(
        TriggerKey::from_ulid(Ulid::new()),
        TriggerKind::Simple {
            start_at,
            interval: None,
            repeat_count: Some(0),
        },
        next,
    )
}

pub(crate) fn recurring(start_at: DateTime<Utc>, every: Duration, next: DateTime<Utc>) -> Trigger {
    Trigger::new(
        TriggerKey::from_ulid(Ulid::new()),
        TriggerKind::Simple {
            start_at,
            interval: Some(every),
            repeat_count: None,
        },
        Some(next),
    )
}

/// 関連付けられた trigger を手で差し替えられるエンジン
#[derive(Default)]
pub(crate) struct StubEngine {
    associated: Mutex<Option<Trigger>>,
    lookup_fails: AtomicBool,
    remove_fails: AtomicBool,
    removals: AtomicUsize,
    fired_now: AtomicUsize,
}

impl StubEngine {
    pub(crate) fn with_trigger(trigger: Trigger) -> Self {
        let engine = Self::default();
        engine.set_trigger(Some(trigger));
        engine
    }

    pub(crate) fn set_trigger(&self, trigger: Option<Trigger>) {
        *self.associated.lock() = trigger;
    }

    pub(crate) fn fail_lookups(&self, fail: bool) {
        self.lookup_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_removals(&self, fail: bool) {
        self.remove_fails.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub(crate) fn fired_now(&self) -> usize {
        self.fired_now.load(Ordering::SeqCst)
    }
}

impl TriggerEngine for StubEngine {
    fn trigger_of(&self, _identity: &TaskIdentity) -> Result<Option<Trigger>, EngineError> {
        if self.lookup_fails.load(Ordering::SeqCst) {
            return Err(EngineError::new("lookup unavailable"));
        }
        Ok(self.associated.lock().clone())
    }

    fn remove_task(&self, _identity: &TaskIdentity) -> Result<bool, EngineError> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        if self.remove_fails.load(Ordering::SeqCst) {
            return Err(EngineError::new("job store unavailable"));
        }
        Ok(self.associated.lock().take().is_some())
    }

    fn fire_now(&self, _identity: &TaskIdentity) -> Result<(), EngineError> {
        self.fired_now.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
