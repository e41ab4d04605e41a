// In crates/core-types/src/types.rs

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trading pair in the exchange-neutral `BASE/QUOTE` form (e.g. "BTC/USDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    /// Parses a `BASE/QUOTE` pair. Both halves must be non-empty.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once('/') {
            Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
                Ok(Self(format!("{}/{}", base.to_uppercase(), quote.to_uppercase())))
            }
            _ => Err(Error::InvalidSymbol(raw.to_string())),
        }
    }

    /// The concatenated code exchanges expect on the wire (e.g. "BTCUSDT").
    pub fn exchange_code(&self) -> String {
        self.0.replace('/', "").to_uppercase()
    }

    pub fn base_asset(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    pub fn quote_asset(&self) -> &str {
        self.0.split('/').nth(1).unwrap_or("")
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The directional bias of a signal or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    /// +1 for long, -1 for short, 0 for flat. Multiplying a price move by this
    /// yields the move in the position's favour.
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
            Direction::Flat => Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, Direction::Flat)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
            Direction::Flat => "FLAT",
        };
        f.write_str(s)
    }
}

/// Represents a single candlestick (k-line) for a given time interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// An immutable view of the market for one decision cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub last_price: Decimal,
    /// Candle closes, oldest first.
    pub recent_closes: Vec<Decimal>,
    /// Candle volumes aligned with `recent_closes`. May be empty when the
    /// source has no volume data.
    pub recent_volumes: Vec<Decimal>,
    /// Standard deviation of close-to-close returns, in percent.
    pub volatility_estimate: f64,
}

impl MarketSnapshot {
    /// Number of trailing returns used for the volatility estimate.
    pub const VOLATILITY_WINDOW: usize = 20;

    /// Builds a snapshot from a kline series ordered oldest first. The last
    /// close becomes `last_price`.
    pub fn from_klines(symbol: Symbol, klines: &[Kline], timestamp: DateTime<Utc>) -> Result<Self> {
        let last = klines.last().ok_or(Error::EmptySeries)?;
        let recent_closes: Vec<Decimal> = klines.iter().map(|k| k.close).collect();
        let recent_volumes: Vec<Decimal> = klines.iter().map(|k| k.volume).collect();
        let volatility_estimate = volatility_pct(&recent_closes, Self::VOLATILITY_WINDOW);

        Ok(Self {
            symbol,
            timestamp,
            last_price: last.close,
            recent_closes,
            recent_volumes,
            volatility_estimate,
        })
    }

    pub fn closes_f64(&self) -> Vec<f64> {
        self.recent_closes.iter().map(|c| c.to_f64().unwrap_or(0.0)).collect()
    }

    pub fn volumes_f64(&self) -> Vec<f64> {
        self.recent_volumes.iter().map(|v| v.to_f64().unwrap_or(0.0)).collect()
    }
}

/// Sample standard deviation of the last `window` close-to-close percentage
/// returns, scaled to percent. Returns 0.0 when fewer than two returns exist.
pub fn volatility_pct(closes: &[Decimal], window: usize) -> f64 {
    let returns: Vec<f64> = closes
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].to_f64()?;
            let next = w[1].to_f64()?;
            (prev != 0.0).then(|| next / prev - 1.0)
        })
        .collect();

    let tail = &returns[returns.len().saturating_sub(window)..];
    if tail.len() < 2 {
        return 0.0;
    }

    let n = tail.len() as f64;
    let mean = tail.iter().sum::<f64>() / n;
    let variance = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt() * 100.0
}

/// The scorer's verdict for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceSignal {
    /// Always within [0, 1].
    pub score: f64,
    pub direction: Direction,
}

impl ConfidenceSignal {
    /// Creates a signal, clamping the score into [0, 1]. NaN collapses to 0.
    pub fn new(score: f64, direction: Direction) -> Self {
        let score = if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) };
        Self { score, direction }
    }

    pub fn flat() -> Self {
        Self { score: 0.0, direction: Direction::Flat }
    }
}

/// Leverage and exit distances derived for a prospective entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskParameters {
    pub leverage: u8,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Pending,
    Open,
    Closed,
}

/// A leveraged position on the configured symbol.
#[derive(Debug, Clone, Serialize)]
pub struct Position {
    pub id: PositionId,
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    /// Margin committed, in quote currency.
    pub size: Decimal,
    /// Base-asset units held: `size * leverage / entry_price`.
    pub quantity: Decimal,
    pub leverage: u8,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    pub take_profit_pct: Decimal,
    pub confidence: f64,
    /// Fees paid so far (entry, plus exit once closed).
    pub fees: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    /// Mark-to-market profit at `price`, in quote currency.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.direction.sign()
    }

    /// True when `price` is at or beyond the stop against the position.
    pub fn stop_loss_hit(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss_price,
            Direction::Short => price >= self.stop_loss_price,
            Direction::Flat => false,
        }
    }

    /// True when `price` is at or beyond the target in the position's favour.
    pub fn take_profit_hit(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= self.take_profit_price,
            Direction::Short => price <= self.take_profit_price,
            Direction::Flat => false,
        }
    }
}

/// Confirmation of an executed market order.
#[derive(Debug, Clone, Serialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: Symbol,
    pub direction: Direction,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub filled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TimeExit,
    Manual,
    RiskHalt,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "Stop Loss",
            ExitReason::TakeProfit => "Take Profit",
            ExitReason::TimeExit => "Time Exit",
            ExitReason::Manual => "Manual",
            ExitReason::RiskHalt => "Risk Halt",
        };
        f.write_str(s)
    }
}

/// Append-only audit entry for a closed position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeRecord {
    pub position_id: PositionId,
    pub symbol: Symbol,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub size: Decimal,
    pub leverage: u8,
    pub fees: Decimal,
    /// Net of fees.
    pub pnl: Decimal,
    /// Return on the committed margin, in percent.
    pub roi_pct: Decimal,
    pub reason: ExitReason,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}
