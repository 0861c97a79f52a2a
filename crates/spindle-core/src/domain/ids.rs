//! Domain identifiers (strongly-typed IDs).
//!
//! # 2 種類の ID
//! - **TaskIdentity**: group + name の組。タスクの生存期間中ずっと変わらない。
//!   Registry / Listener / TriggerEngine を結ぶ join key として使う。
//! - **Id<T>**: ULID ベースの ID。1 回の firing（`RunId`）や、
//!   エンジン側の trigger インスタンス（`TriggerKey`）を識別する。
//!
//! ## Phantom Type パターン
//! `Id<T>` は共通実装を 1 つだけ持ち、`T` はコンパイル時にだけ使うマーカー型。
//! `RunId` と `TriggerKey` は同じ ULID でも混同できない。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// タスク 1 件を一意に識別するキー（group + name）
///
/// Display は `group.name` 形式。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskIdentity {
    group: String,
    name: String,
}

impl TaskIdentity {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"run-", "trigger-"）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Run（1 回の firing）のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

/// Trigger インスタンスのマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TriggerMarker {}

impl IdMarker for TriggerMarker {
    fn prefix() -> &'static str {
        "trigger-"
    }
}

/// Identifier of one firing (one `TaskFuture`).
pub type RunId = Id<Run>;

/// Identifier of one engine-side trigger instance.
///
/// reschedule すると必ず新しい TriggerKey になる。
pub type TriggerKey = Id<TriggerMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_identity_displays_as_group_dot_name() {
        let id = TaskIdentity::new("repository", "rebuild-metadata");
        assert_eq!(id.to_string(), "repository.rebuild-metadata");
        assert_eq!(id.group(), "repository");
        assert_eq!(id.name(), "rebuild-metadata");
    }

    #[test]
    fn task_identity_equality_uses_both_parts() {
        let a = TaskIdentity::new("g1", "scan");
        let b = TaskIdentity::new("g2", "scan");
        assert_ne!(a, b);
        assert_eq!(a, TaskIdentity::new("g1", "scan"));
    }

    #[test]
    fn ids_are_distinct_types() {
        let ulid = Ulid::new();
        let run = RunId::from_ulid(ulid);
        let trigger: TriggerKey = ulid.into();

        assert_eq!(run.as_ulid(), trigger.as_ulid());
        assert!(run.to_string().starts_with("run-"));
        assert!(trigger.to_string().starts_with("trigger-"));
        // let _: RunId = trigger; // <- does not compile
    }

    #[test]
    fn ids_can_be_serialized() {
        let run = RunId::from_ulid(Ulid::new());
        let s = serde_json::to_string(&run).unwrap();
        let back: RunId = serde_json::from_str(&s).unwrap();
        assert_eq!(run, back);
    }
}
