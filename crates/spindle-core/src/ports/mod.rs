//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部（トリガーエンジン、ジョブ本体、時刻、ID）への
//! インターフェースを定義し、実装の詳細を隠蔽します。
//! 開発・テスト用の実装は `impls` に置く。

pub mod clock;
pub mod id_generator;
pub mod job;
pub mod trigger_engine;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job::{CancellationSignal, Job, JobContext};
pub use self::trigger_engine::{FiringContext, JobDataMap, Trigger, TriggerEngine, TriggerKind};
