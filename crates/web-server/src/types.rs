// In crates/web-server/src/types.rs

use analytics::PerformanceReport;
use chrono::{DateTime, Utc};
use events::Command;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Query parameters for `GET /api/trades` (e.g. `?limit=10`).
#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// Reply to an accepted control command.
#[derive(Debug, Serialize)]
pub struct CommandAck {
    pub command: Command,
    /// Commands are applied between cycles, never mid-cycle.
    pub queued: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok" or "stale".
    pub status: &'static str,
    pub running: bool,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles: u64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: Decimal,
    pub initial_equity: Decimal,
    pub peak_equity: Decimal,
    /// Margin committed to open positions.
    pub open_margin: Decimal,
    /// Mark-to-market PnL of open positions at the last seen price.
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Serialize)]
pub struct PnlResponse {
    pub cumulative_pnl: Decimal,
    pub trades_today: u32,
    pub current_drawdown_pct: Decimal,
    pub halted: bool,
    pub performance: PerformanceReport,
}
