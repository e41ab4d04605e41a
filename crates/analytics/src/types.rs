// In crates/analytics/src/types.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A struct to hold a point in the session's realized equity curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

/// Count and net PnL of the trades closed for one exit reason.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasonBreakdown {
    pub trades: u32,
    pub net_pnl: Decimal,
}

/// A summary of the session's closed trades.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PerformanceReport {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    /// Net of fees.
    pub net_pnl_absolute: Decimal,
    pub net_pnl_percentage: f64,
    pub total_fees: Decimal,
    pub win_rate: f64,
    /// Gross profit over gross loss. `None` when nothing was lost yet.
    pub profit_factor: Option<f64>,
    pub max_drawdown_absolute: Decimal,
    pub max_drawdown_percentage: f64,
    /// Average PnL per trade.
    pub expectancy: Decimal,
    pub best_trade: Decimal,
    pub worst_trade: Decimal,
    /// Average return on margin, in percent.
    pub avg_roi_pct: f64,
    pub avg_trade_duration_secs: f64,
    /// Keyed by the exit reason's display name (e.g. "Stop Loss").
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub by_exit_reason: BTreeMap<String, ReasonBreakdown>,
}

impl PerformanceReport {
    /// Creates a new, empty report with zero values.
    pub fn new() -> Self {
        Self::default()
    }
}
