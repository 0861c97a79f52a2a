//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryTriggerEngine**: プロセス内で完結するトリガーエンジン
//!
//! # 本番用実装
//! 永続化されたジョブストアを持つエンジンは別クレートに置く想定。

pub mod inmem_engine;

// 主要な型を再エクスポート
pub use self::inmem_engine::{EngineLoop, InMemoryTriggerEngine};
