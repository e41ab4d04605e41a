// In crates/risk/src/types.rs

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// What happens to open positions once the drawdown halt trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HaltPolicy {
    /// Stop opening new positions; open ones keep their stop-loss/take-profit.
    #[default]
    KeepOpen,
    /// Force-close every open position on the cycle the halt is detected.
    CloseAll,
}

/// Session-level risk configuration. Percentages are expressed as whole
/// percent (3 means 3%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskSettings {
    pub min_leverage: u8,
    pub max_leverage: u8,
    /// Exchange leverage granularity.
    pub leverage_step: u8,

    pub stop_loss_percentage: Decimal,
    pub min_take_profit_percentage: Decimal,
    pub max_take_profit_percentage: Decimal,
    /// Volatility (in percent) that maps to the maximum take-profit.
    pub volatility_ceiling_pct: f64,

    /// Share of equity committed as margin per entry.
    pub position_size_percentage: Decimal,

    pub max_drawdown_percentage: Decimal,
    pub max_daily_trades: u32,
    pub max_open_positions: u32,
    pub halt_policy: HaltPolicy,

    /// Ratchet the stop toward price by this distance once in profit.
    pub trailing_stop_percentage: Option<Decimal>,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            min_leverage: 5,
            max_leverage: 20,
            leverage_step: 1,
            stop_loss_percentage: dec!(3),
            min_take_profit_percentage: dec!(6),
            max_take_profit_percentage: dec!(8),
            volatility_ceiling_pct: 2.0,
            position_size_percentage: dec!(25),
            max_drawdown_percentage: dec!(15),
            max_daily_trades: 5,
            max_open_positions: 1,
            halt_policy: HaltPolicy::KeepOpen,
            trailing_stop_percentage: None,
        }
    }
}
