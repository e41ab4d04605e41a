// In crates/risk/src/governor.rs

use crate::types::RiskSettings;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{Direction, PositionId, Symbol, TradeRecord};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Session-wide risk counters. Owned by the `RiskGovernor`; everything else
/// sees copies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRiskState {
    /// UTC date the daily counters belong to.
    pub day: NaiveDate,
    pub trades_today: u32,
    pub cumulative_pnl: Decimal,
    pub initial_equity: Decimal,
    pub equity: Decimal,
    pub peak_equity: Decimal,
    pub current_drawdown_pct: Decimal,
    pub open_position_count: u32,
    pub halted: bool,
    pub halt_reason: Option<String>,
}

impl SessionRiskState {
    pub fn new(initial_equity: Decimal, day: NaiveDate) -> Self {
        Self {
            day,
            trades_today: 0,
            cumulative_pnl: Decimal::ZERO,
            initial_equity,
            equity: initial_equity,
            peak_equity: initial_equity,
            current_drawdown_pct: Decimal::ZERO,
            open_position_count: 0,
            halted: false,
            halt_reason: None,
        }
    }

    fn recompute_drawdown(&mut self) {
        self.peak_equity = self.peak_equity.max(self.equity);
        self.current_drawdown_pct = if self.peak_equity > Decimal::ZERO {
            ((self.peak_equity - self.equity) / self.peak_equity * dec!(100))
                .max(Decimal::ZERO)
                .round_dp(4)
        } else {
            Decimal::ZERO
        };
    }
}

/// A prospective entry put to the governor.
#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub symbol: Symbol,
    pub direction: Direction,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Halted(String),
    DrawdownLimit { drawdown_pct: Decimal, max_pct: Decimal },
    MaxOpenPositions { open: u32, max: u32 },
    DailyTradeLimit { used: u32, max: u32 },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Halted(reason) => write!(f, "trading halted: {reason}"),
            DenyReason::DrawdownLimit { drawdown_pct, max_pct } => {
                write!(f, "drawdown {drawdown_pct}% reached limit {max_pct}%")
            }
            DenyReason::MaxOpenPositions { open, max } => {
                write!(f, "{open} open positions (max {max})")
            }
            DenyReason::DailyTradeLimit { used, max } => {
                write!(f, "daily trade allowance used ({used}/{max})")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryDecision {
    Allow,
    Deny(DenyReason),
}

impl EntryDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, EntryDecision::Allow)
    }

    /// Converts a denial into `Error::Vetoed`.
    pub fn into_result(self) -> Result<()> {
        match self {
            EntryDecision::Allow => Ok(()),
            EntryDecision::Deny(reason) => Err(Error::Vetoed { reason: reason.to_string() }),
        }
    }
}

/// Enforces the session limits: open positions, daily trades and drawdown.
///
/// All mutation goes through `&mut self`, so whoever owns the governor is
/// the single writer. An approved entry reserves an open-position slot until
/// it is either released (the entry never filled) or consumed by
/// `record_closed_trade`.
#[derive(Debug)]
pub struct RiskGovernor {
    max_open_positions: u32,
    max_daily_trades: u32,
    max_drawdown_pct: Decimal,
    state: SessionRiskState,
    recorded: HashSet<PositionId>,
}

impl RiskGovernor {
    pub fn new(settings: &RiskSettings, initial_equity: Decimal, today: NaiveDate) -> Self {
        Self {
            max_open_positions: settings.max_open_positions,
            max_daily_trades: settings.max_daily_trades,
            max_drawdown_pct: settings.max_drawdown_percentage,
            state: SessionRiskState::new(initial_equity, today),
            recorded: HashSet::new(),
        }
    }

    /// Decides whether a new entry may proceed. An `Allow` reserves a slot.
    pub fn approve_entry(&mut self, candidate: &EntryCandidate, now: DateTime<Utc>) -> EntryDecision {
        self.roll_day(now);

        let decision = self.evaluate_limits();
        match &decision {
            EntryDecision::Allow => {
                self.state.open_position_count += 1;
                tracing::info!(
                    symbol = %candidate.symbol,
                    direction = %candidate.direction,
                    score = candidate.score,
                    open = self.state.open_position_count,
                    "Entry approved by risk governor."
                );
            }
            EntryDecision::Deny(reason) => {
                tracing::info!(
                    symbol = %candidate.symbol,
                    direction = %candidate.direction,
                    %reason,
                    "Entry denied by risk governor."
                );
            }
        }
        decision
    }

    fn evaluate_limits(&mut self) -> EntryDecision {
        if self.halt_check() {
            let reason = self.state.halt_reason.clone().unwrap_or_else(|| "halted".to_string());
            return if self.state.current_drawdown_pct >= self.max_drawdown_pct {
                EntryDecision::Deny(DenyReason::DrawdownLimit {
                    drawdown_pct: self.state.current_drawdown_pct,
                    max_pct: self.max_drawdown_pct,
                })
            } else {
                EntryDecision::Deny(DenyReason::Halted(reason))
            };
        }
        if self.state.open_position_count >= self.max_open_positions {
            return EntryDecision::Deny(DenyReason::MaxOpenPositions {
                open: self.state.open_position_count,
                max: self.max_open_positions,
            });
        }
        // Reserved slots count against the allowance so it can never be overrun.
        let used = self.state.trades_today + self.state.open_position_count;
        if used >= self.max_daily_trades {
            return EntryDecision::Deny(DenyReason::DailyTradeLimit {
                used,
                max: self.max_daily_trades,
            });
        }
        EntryDecision::Allow
    }

    /// Returns a slot reserved by `approve_entry` whose entry never filled.
    pub fn release_entry(&mut self) {
        self.state.open_position_count = self.state.open_position_count.saturating_sub(1);
        tracing::debug!(open = self.state.open_position_count, "Entry slot released.");
    }

    /// Books a closed trade. Returns `false` (and changes nothing) when the
    /// same position was already recorded.
    ///
    /// `settled_equity` is the account balance after the close. The entry fee
    /// already left the balance when the position opened, so equity is
    /// re-based on the settled figure rather than moved by the net `pnl`.
    pub fn record_closed_trade(&mut self, trade: &TradeRecord, settled_equity: Decimal) -> bool {
        if !self.recorded.insert(trade.position_id) {
            tracing::warn!(position = %trade.position_id, "Closed trade already recorded. Ignoring.");
            return false;
        }
        self.roll_day(trade.closed_at);

        self.state.trades_today += 1;
        self.state.cumulative_pnl += trade.pnl;
        self.state.equity = settled_equity;
        self.state.open_position_count = self.state.open_position_count.saturating_sub(1);
        self.state.recompute_drawdown();
        self.halt_check();

        tracing::info!(
            position = %trade.position_id,
            pnl = %trade.pnl,
            trades_today = self.state.trades_today,
            drawdown_pct = %self.state.current_drawdown_pct,
            "Closed trade recorded."
        );
        true
    }

    /// Re-bases equity on a fresh balance read.
    pub fn refresh_equity(&mut self, balance: Decimal) {
        self.state.equity = balance;
        self.state.recompute_drawdown();
        self.halt_check();
    }

    /// True once the drawdown limit has been breached. The halt is latched
    /// until `reset_halt`.
    pub fn halt_check(&mut self) -> bool {
        if !self.state.halted && self.state.current_drawdown_pct >= self.max_drawdown_pct {
            let reason = format!(
                "drawdown {}% reached limit {}%",
                self.state.current_drawdown_pct, self.max_drawdown_pct
            );
            tracing::error!(%reason, "Risk halt triggered.");
            self.state.halted = true;
            self.state.halt_reason = Some(reason);
        }
        self.state.halted
    }

    /// Operator reset: clears the halt and re-bases the peak on current equity.
    pub fn reset_halt(&mut self) {
        tracing::warn!(
            equity = %self.state.equity,
            previous_peak = %self.state.peak_equity,
            "Risk halt reset by operator."
        );
        self.state.halted = false;
        self.state.halt_reason = None;
        self.state.peak_equity = self.state.equity;
        self.state.current_drawdown_pct = Decimal::ZERO;
    }

    /// Resets the daily counters when `now` falls on a later UTC date.
    /// Returns `true` when the day rolled.
    ///
    /// Closed-trade ids recorded before the roll are forgotten; the position
    /// book never hands out the same trade twice, so only same-day duplicates
    /// need catching here.
    pub fn roll_day(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today <= self.state.day {
            return false;
        }
        tracing::info!(
            from = %self.state.day,
            to = %today,
            trades = self.state.trades_today,
            "New trading day. Daily counters reset."
        );
        self.state.day = today;
        self.state.trades_today = 0;
        self.recorded.clear();
        true
    }

    pub fn state(&self) -> &SessionRiskState {
        &self.state
    }

    pub fn snapshot(&self) -> SessionRiskState {
        self.state.clone()
    }
}
