// In crates/events/src/lib.rs

// --- Engine events and the WebSocket wire format ---

use analytics::PerformanceReport;
use chrono::{DateTime, Duration, Utc};
use core_types::{ConfidenceSignal, Position, Symbol, TradeRecord};
use risk::SessionRiskState;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An operator instruction for the decision loop. Commands are applied
/// between cycles, never during one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Allow new entries.
    Start,
    /// Refuse new entries. Open positions keep being managed.
    Stop,
    /// Clear the risk halt latch.
    ResetRisk,
    /// Close every open position at market.
    CloseAll,
    /// Leave the loop after the current cycle.
    Shutdown,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::ResetRisk => "reset_risk",
            Command::CloseAll => "close_all",
            Command::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// A structured event for notifiers and the live feed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EngineEvent {
    Opened { position: Position },
    Closed { trade: TradeRecord },
    RiskHalt { reason: String, state: SessionRiskState },
    Error { message: String },
}

impl EngineEvent {
    /// The event's type tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::Opened { .. } => "opened",
            EngineEvent::Closed { .. } => "closed",
            EngineEvent::RiskHalt { .. } => "risk_halt",
            EngineEvent::Error { .. } => "error",
        }
    }
}

/// The single action a decision cycle produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleAction {
    Open,
    Hold,
    Adjust,
    Close,
}

impl fmt::Display for CycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleAction::Open => "open",
            CycleAction::Hold => "hold",
            CycleAction::Adjust => "adjust",
            CycleAction::Close => "close",
        };
        f.write_str(s)
    }
}

/// Read-only view of the engine, published after every cycle and command.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// The decision loop task is alive.
    pub running: bool,
    /// New entries are allowed. Exits are managed either way.
    pub trading_active: bool,
    pub symbol: Symbol,
    pub timeframe: String,
    pub gateway: String,
    pub started_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub cycles: u64,
    pub last_action: Option<CycleAction>,
    pub last_price: Option<Decimal>,
    pub last_signal: Option<ConfidenceSignal>,
    pub balance: Decimal,
    pub open_positions: Vec<Position>,
    pub risk: SessionRiskState,
    pub performance: PerformanceReport,
    /// Most recent closed trades, newest last.
    pub recent_trades: Vec<TradeRecord>,
    pub last_error: Option<String>,
}

impl EngineStatus {
    pub fn new(
        symbol: Symbol,
        timeframe: &str,
        gateway: &str,
        trading_active: bool,
        risk: SessionRiskState,
    ) -> Self {
        Self {
            running: false,
            trading_active,
            symbol,
            timeframe: timeframe.to_string(),
            gateway: gateway.to_string(),
            started_at: Utc::now(),
            last_cycle_at: None,
            cycles: 0,
            last_action: None,
            last_price: None,
            last_signal: None,
            balance: risk.equity,
            open_positions: Vec::new(),
            risk,
            performance: PerformanceReport::default(),
            recent_trades: Vec::new(),
            last_error: None,
        }
    }

    /// True when the loop is not running, or its last cycle (or start, if
    /// none ran yet) is older than `max_age`.
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let last = self.last_cycle_at.unwrap_or(self.started_at);
        !self.running || now - last > max_age
    }
}

/// Represents a log message event to be sent to the UI.
#[derive(Debug, Clone, Serialize)]
pub struct WsLogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// The top-level WebSocket message enum.
/// `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    Log(WsLogMessage),
    Event(EngineEvent),
    Status(Box<EngineStatus>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn status() -> EngineStatus {
        let risk = SessionRiskState::new(dec!(1000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        EngineStatus::new(Symbol("BTC/USDT".into()), "5m", "SimulatedGateway", true, risk)
    }

    #[test]
    fn events_serialize_with_type_and_payload() {
        let event = EngineEvent::Error { message: "boom".into() };
        let json = serde_json::to_value(WsMessage::Event(event)).unwrap();
        assert_eq!(json["type"], "Event");
        assert_eq!(json["payload"]["type"], "error");
        assert_eq!(json["payload"]["payload"]["message"], "boom");
    }

    #[test]
    fn status_goes_stale_without_cycles() {
        let mut status = status();
        let now = status.started_at;
        assert!(status.is_stale(now, Duration::seconds(60)));

        status.running = true;
        assert!(!status.is_stale(now + Duration::seconds(30), Duration::seconds(60)));
        assert!(status.is_stale(now + Duration::seconds(90), Duration::seconds(60)));

        status.last_cycle_at = Some(now + Duration::seconds(80));
        assert!(!status.is_stale(now + Duration::seconds(90), Duration::seconds(60)));
    }

    #[test]
    fn status_starts_with_session_equity() {
        assert_eq!(status().balance, dec!(1000));
        assert_eq!(EngineEvent::Error { message: String::new() }.kind(), "error");
    }
}
