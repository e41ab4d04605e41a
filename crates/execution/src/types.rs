// In crates/execution/src/types.rs

use chrono::{DateTime, Utc};
use core_types::{Direction, ExitReason, PositionId, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

/// A market order opening a new position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub direction: Direction,
    /// Base-asset units to buy or sell.
    pub quantity: Decimal,
    /// Margin committed, in quote currency.
    pub margin: Decimal,
    pub leverage: u8,
    /// Price the order was sized against. Gateways fill at their own price.
    pub reference_price: Decimal,
}

/// A request to flatten an open position at market.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseRequest {
    pub position_id: PositionId,
    pub symbol: Symbol,
    /// Direction of the position being closed, not of the closing order.
    pub direction: Direction,
    pub quantity: Decimal,
    pub reason: ExitReason,
}

/// The exchange's confirmation that a position is flat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseConfirmation {
    pub position_id: PositionId,
    pub exit_price: Decimal,
    /// Fee charged on the closing order.
    pub fee: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Exit prices to mirror on the exchange for an open position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProtectionRequest {
    pub position_id: PositionId,
    pub symbol: Symbol,
    /// Direction of the position being protected.
    pub direction: Direction,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
}
