//! App - アプリケーション層
//!
//! ports を組み合わせて、トリガーエンジンの firing をタスクの状態へ橋渡しする。
//!
//! # 主要コンポーネント
//! - **ScheduleConverter**: ネイティブ trigger ⇔ Schedule
//! - **TaskFuture**: 1 回の firing の結果ハンドル
//! - **TaskInfo**: タスクごとの `(state, future)` の公開先
//! - **TaskJobListener**: on_start / on_finish
//! - **TaskRegistry**: TaskIdentity ごとの listener
//! - **SchedulerConfig**: 設定の読み込み

pub mod config;
pub mod converter;
pub mod future;
pub mod listener;
pub mod registry;
pub mod task_info;

#[cfg(test)]
pub(crate) mod testing;

// 主要な型を再エクスポート
pub use self::config::SchedulerConfig;
pub use self::converter::{ScheduleConverter, MANUAL_START_AT};
pub use self::future::{TaskFuture, TaskOutcome};
pub use self::listener::{Firing, TaskJobListener};
pub use self::registry::TaskRegistry;
pub use self::task_info::{TaskInfo, TaskSnapshot};
