// In crates/execution/src/market.rs

use crate::Result;
use async_trait::async_trait;
use core_types::{MarketSnapshot, Symbol};

/// A supplier of market snapshots for the decision loop.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Fetches the latest `limit` candles of `timeframe` for `symbol` and
    /// builds a snapshot from them.
    ///
    /// A failure here is transient: the caller skips the cycle.
    async fn snapshot(&self, symbol: &Symbol, timeframe: &str, limit: u16) -> Result<MarketSnapshot>;
}
