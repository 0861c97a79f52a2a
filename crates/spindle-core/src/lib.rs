//! spindle-core
//!
//! トリガーエンジンに駆動されるタスクスケジューリングのコア。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, schedule, configuration, state, errors）
//! - **ports**: 抽象化レイヤー（TriggerEngine, Job, Clock, IdGenerator）
//! - **app**: firing とタスク状態の橋渡し（converter, future, task_info, listener, registry, config）
//! - **impls**: 実装（InMemoryTriggerEngine など開発用）
//! - **observability**: 件数などのステータスビュー

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{SchedulerConfig, TaskFuture, TaskInfo, TaskJobListener, TaskRegistry};
pub use domain::{
    AwaitError, EndState, LifecycleState, Schedule, SchedulerError, TaskConfiguration,
    TaskIdentity, TaskState,
};
pub use impls::InMemoryTriggerEngine;
