//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{RunId, TriggerKey};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は RunId / TriggerKey を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（エンジンのワーカーから同時に呼ばれる）
pub trait IdGenerator: Send + Sync {
    /// firing 1 回分の ID
    fn generate_run_id(&self) -> RunId;

    /// trigger インスタンスの ID
    fn generate_trigger_key(&self) -> TriggerKey;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻を timestamp 部分に使うので、FixedClock なら timestamp が決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_run_id(&self) -> RunId {
        RunId::from(self.next_ulid())
    }

    fn generate_trigger_key(&self) -> TriggerKey {
        TriggerKey::from(self.next_ulid())
    }
}
