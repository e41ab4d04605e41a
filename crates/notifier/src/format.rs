// In crates/notifier/src/format.rs

//! Plain-text renderings of events and status for chat channels.

use chrono::{DateTime, Utc};
use core_types::Position;
use events::{EngineEvent, EngineStatus};
use rust_decimal::Decimal;
use std::fmt::Write;

/// Trades listed by `/trades`.
const TRADES_LISTED: usize = 5;

pub const WELCOME_TEXT: &str = "🤖 Welcome to the Trading Agent!\n\n\
I'll keep you updated on trades and account status.\n\
Use /help to see available commands.";

pub const HELP_TEXT: &str = "📋 Available Commands\n\n\
/start - Welcome message\n\
/status - Current trading status\n\
/pnl - Show profit/loss information\n\
/balance - Show account balance\n\
/trades - List recent trades\n\
/stop - Stop opening new trades\n\
/resume - Resume opening new trades\n\
/help - Show this help message";

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Renders an engine event. `quote` is the quote currency (e.g. "USDT").
pub fn event_text(event: &EngineEvent, quote: &str) -> String {
    match event {
        EngineEvent::Opened { position } => format!(
            "🟢 Trade Opened\n\n\
             Symbol: {}\n\
             Side: {}\n\
             Size: {:.4}\n\
             Price: {:.2}\n\
             Leverage: {}x\n\
             Stop Loss: {:.2}\n\
             Take Profit: {:.2}\n\
             Confidence: {:.2}\n\
             Time: {}",
            position.symbol,
            position.direction,
            position.quantity,
            position.entry_price,
            position.leverage,
            position.stop_loss_price,
            position.take_profit_price,
            position.confidence,
            timestamp(position.opened_at),
        ),
        EngineEvent::Closed { trade } => {
            let marker = if trade.pnl >= Decimal::ZERO { "🟢" } else { "🔴" };
            format!(
                "{marker} Trade Closed ({})\n\n\
                 Symbol: {}\n\
                 Side: {}\n\
                 Entry: {:.2}\n\
                 Exit: {:.2}\n\
                 PnL: {:.4} {quote}\n\
                 ROI: {:.2}%\n\
                 Time: {}",
                trade.reason,
                trade.symbol,
                trade.direction,
                trade.entry_price,
                trade.exit_price,
                trade.pnl,
                trade.roi_pct,
                timestamp(trade.closed_at),
            )
        }
        EngineEvent::RiskHalt { reason, state } => format!(
            "🛑 Risk Halt\n\n\
             {reason}\n\
             Equity: {:.2} {quote}\n\
             Peak: {:.2} {quote}\n\n\
             New entries are blocked until the risk state is reset.",
            state.equity, state.peak_equity,
        ),
        EngineEvent::Error { message } => {
            format!("⚠️ Error\n\n{message}\n\nTime: {}", timestamp(Utc::now()))
        }
    }
}

fn position_text(position: &Position) -> String {
    format!(
        "Position: {} {:.4} @ {:.2}\n\
         Leverage: {}x\n\
         Take Profit: {:.2}\n\
         Stop Loss: {:.2}",
        position.direction,
        position.quantity,
        position.entry_price,
        position.leverage,
        position.take_profit_price,
        position.stop_loss_price,
    )
}

pub fn status_text(status: &EngineStatus, max_daily_trades: u32) -> String {
    let quote = status.symbol.quote_asset();
    let mut text = format!(
        "📊 Current Status\n\n\
         Symbol: {}\n\
         Trading: {}\n\
         Balance: {:.2} {quote}\n\
         Total PnL: {:.2} {quote}\n\
         Daily Trades: {}/{}\n\
         Drawdown: {:.2}%\n",
        status.symbol,
        if status.trading_active { "active" } else { "paused" },
        status.balance,
        status.risk.cumulative_pnl,
        status.risk.trades_today,
        max_daily_trades,
        status.risk.current_drawdown_pct,
    );
    if let Some(signal) = status.last_signal {
        let _ = writeln!(text, "Confidence: {:.2} ({})", signal.score, signal.direction);
    }
    if status.risk.halted {
        let _ = writeln!(text, "Risk halt: {}", status.risk.halt_reason.as_deref().unwrap_or("active"));
    }
    text.push('\n');
    match status.open_positions.first() {
        Some(position) => text.push_str(&position_text(position)),
        None => text.push_str("No open position."),
    }
    text
}

pub fn pnl_text(status: &EngineStatus) -> String {
    let quote = status.symbol.quote_asset();
    let initial = status.risk.initial_equity;
    let pnl = status.risk.cumulative_pnl;
    let pct = if initial > Decimal::ZERO { pnl / initial * Decimal::ONE_HUNDRED } else { Decimal::ZERO };
    let report = &status.performance;
    format!(
        "💰 Profit & Loss\n\n\
         Initial Balance: {initial:.2} {quote}\n\
         Current Balance: {:.2} {quote}\n\
         Total PnL: {pnl:.2} {quote} ({pct:.2}%)\n\
         Trades: {} ({:.1}% won)",
        status.balance, report.total_trades, report.win_rate,
    )
}

pub fn balance_text(status: &EngineStatus) -> String {
    format!(
        "💵 Account Balance\n\nCurrent Balance: {:.2} {}",
        status.balance,
        status.symbol.quote_asset()
    )
}

pub fn trades_text(status: &EngineStatus) -> String {
    if status.recent_trades.is_empty() {
        return "No trades executed yet.".to_string();
    }
    let quote = status.symbol.quote_asset();
    let skip = status.recent_trades.len().saturating_sub(TRADES_LISTED);

    let mut text = String::from("🔄 Recent Trades\n\n");
    for (i, trade) in status.recent_trades.iter().skip(skip).enumerate() {
        let _ = write!(
            text,
            "{}. {}\n   {} @ {:.2} → {:.2}\n   Leverage: {}x\n   PnL: {:.2} {quote} ({})\n\n",
            i + 1,
            timestamp(trade.closed_at),
            trade.direction,
            trade.entry_price,
            trade.exit_price,
            trade.leverage,
            trade.pnl,
            trade.reason,
        );
    }
    let _ = write!(text, "Total PnL: {:.2} {quote}", status.risk.cumulative_pnl);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use core_types::{Direction, ExitReason, PositionId, Symbol, TradeRecord};
    use risk::SessionRiskState;
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal) -> TradeRecord {
        TradeRecord {
            position_id: PositionId(3),
            symbol: Symbol("BTC/USDT".into()),
            direction: Direction::Long,
            entry_price: dec!(60000),
            exit_price: dec!(58200),
            quantity: dec!(0.01),
            size: dec!(50),
            leverage: 12,
            fees: dec!(0.5),
            pnl,
            roi_pct: dec!(-37),
            reason: ExitReason::StopLoss,
            opened_at: Utc::now(),
            closed_at: Utc::now(),
        }
    }

    fn status() -> EngineStatus {
        let risk = SessionRiskState::new(dec!(1000), NaiveDate::from_ymd_opt(2026, 1, 1).unwrap());
        EngineStatus::new(Symbol("BTC/USDT".into()), "5m", "SimulatedGateway", true, risk)
    }

    #[test]
    fn closed_trade_shows_roi_and_reason() {
        let text = event_text(&EngineEvent::Closed { trade: trade(dec!(-18.5)) }, "USDT");
        assert!(text.starts_with("🔴 Trade Closed (Stop Loss)"));
        assert!(text.contains("PnL: -18.5000 USDT"));
        assert!(text.contains("ROI: -37.00%"));
    }

    #[test]
    fn trades_list_is_empty_message_without_history() {
        assert_eq!(trades_text(&status()), "No trades executed yet.");
    }

    #[test]
    fn trades_list_shows_last_five() {
        let mut status = status();
        status.recent_trades = (0..8).map(|_| trade(dec!(1))).collect();
        let text = trades_text(&status);
        assert!(text.contains("5. "));
        assert!(!text.contains("6. "));
        assert!(text.contains("LONG @ 60000.00 → 58200.00"));
    }

    #[test]
    fn status_reports_flat_book() {
        let text = status_text(&status(), 5);
        assert!(text.contains("Daily Trades: 0/5"));
        assert!(text.contains("No open position."));
        assert!(balance_text(&status()).ends_with("1000.00 USDT"));
    }
}
