// In crates/engine/src/decision_loop.rs

use crate::handle::EngineHandle;
use crate::position_book::{ExitSignal, PositionBook};
use crate::{Error, Result};
use analytics::AnalyticsEngine;
use app_config::Settings;
use chrono::{DateTime, Utc};
use core_types::{ConfidenceSignal, ExitReason, Position, PositionId, Symbol, TradeRecord};
use events::{Command, CycleAction, EngineEvent, EngineStatus};
use execution::{CloseRequest, ExecutionGateway, MarketDataSource, OrderRequest, ProtectionRequest};
use notifier::Notifier;
use risk::{
    EntryCandidate, EntryDecision, HaltPolicy, PositionSizer, RiskGovernor, RiskParameterDeriver,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strategies::ConfidenceScorer;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

/// Closed trades carried in the published status.
pub const RECENT_TRADES: usize = 50;
const COMMAND_QUEUE: usize = 32;

/// The pluggable collaborators of the decision loop.
pub struct EngineComponents {
    pub scorer: Box<dyn ConfidenceScorer>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub market: Arc<dyn MarketDataSource>,
    pub notifier: Arc<dyn Notifier>,
}

/// What one cycle did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub action: CycleAction,
    pub price: Decimal,
    pub signal: ConfidenceSignal,
    pub opened: Option<PositionId>,
    pub closed: Vec<TradeRecord>,
    pub adjusted: Vec<PositionId>,
    /// Why the cycle held, when there is a reason worth reporting.
    pub note: Option<String>,
}

impl CycleReport {
    fn hold(at: DateTime<Utc>, price: Decimal, signal: ConfidenceSignal) -> Self {
        Self {
            at,
            action: CycleAction::Hold,
            price,
            signal,
            opened: None,
            closed: Vec::new(),
            adjusted: Vec::new(),
            note: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Shutdown,
}

/// The single writer of position and risk state.
///
/// One task owns the loop; each tick runs one cycle to completion before the
/// next command or tick is looked at, so cycles never overlap and commands
/// land between cycles.
pub struct DecisionLoop {
    symbol: Symbol,
    timeframe: String,
    candle_limit: u16,
    interval: Duration,
    trading_active: bool,
    halt_policy: HaltPolicy,

    scorer: Box<dyn ConfidenceScorer>,
    deriver: RiskParameterDeriver,
    sizer: PositionSizer,
    governor: RiskGovernor,
    book: PositionBook,

    gateway: Arc<dyn ExecutionGateway>,
    market: Arc<dyn MarketDataSource>,
    notifier: Arc<dyn Notifier>,
    analytics: AnalyticsEngine,

    /// Append-only journal of closed trades.
    trades: Vec<TradeRecord>,
    balance: Decimal,
    halt_notified: bool,

    commands: mpsc::Receiver<Command>,
    commands_open: bool,
    status: EngineStatus,
    status_tx: watch::Sender<EngineStatus>,
}

impl DecisionLoop {
    /// Builds the loop and the handle used to control it.
    ///
    /// # Arguments
    ///
    /// * `settings`: Validated application settings.
    /// * `components`: Scorer, gateway, market data source and notifier.
    /// * `initial_equity`: Account equity at session start.
    /// * `now`: Start of the session; fixes the first trading day.
    pub fn new(
        settings: &Settings,
        components: EngineComponents,
        initial_equity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(Self, EngineHandle)> {
        let symbol = settings.symbol().map_err(|e| Error::Configuration(e.to_string()))?;
        let deriver = RiskParameterDeriver::new(&settings.risk).map_err(|e| Error::Configuration(e.to_string()))?;
        let governor = RiskGovernor::new(&settings.risk, initial_equity, now.date_naive());
        let book = PositionBook::new(
            chrono::Duration::hours(i64::from(settings.trading.max_holding_hours)),
            settings.risk.trailing_stop_percentage,
        );

        let status = EngineStatus::new(
            symbol.clone(),
            &settings.trading.timeframe,
            components.gateway.name(),
            settings.trading.trading_active,
            governor.snapshot(),
        );
        let (status_tx, status_rx) = watch::channel(status.clone());
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

        let engine = Self {
            symbol,
            timeframe: settings.trading.timeframe.clone(),
            candle_limit: settings.trading.candle_limit,
            interval: Duration::from_secs(settings.trading.loop_interval_secs),
            trading_active: settings.trading.trading_active,
            halt_policy: settings.risk.halt_policy,
            scorer: components.scorer,
            deriver,
            sizer: PositionSizer::new(&settings.risk),
            governor,
            book,
            gateway: components.gateway,
            market: components.market,
            notifier: components.notifier,
            analytics: AnalyticsEngine::new(),
            trades: Vec::new(),
            balance: initial_equity,
            halt_notified: false,
            commands: command_rx,
            commands_open: true,
            status,
            status_tx,
        };
        Ok((engine, EngineHandle::new(command_tx, status_rx)))
    }

    /// Runs cycles on the configured interval until `Command::Shutdown`.
    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            interval_secs = self.interval.as_secs(),
            scorer = self.scorer.name(),
            gateway = self.gateway.name(),
            "Decision loop started."
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.status.running = true;
        self.publish();

        loop {
            tokio::select! {
                biased;
                command = self.commands.recv(), if self.commands_open => {
                    match command {
                        Some(command) => {
                            if self.apply_command(command).await == Flow::Shutdown {
                                break;
                            }
                        }
                        None => {
                            tracing::warn!("All engine handles dropped. Running without commands.");
                            self.commands_open = false;
                        }
                    }
                }
                _ = ticker.tick() => {
                    let now = Utc::now();
                    match self.run_cycle(now).await {
                        Ok(report) => tracing::debug!(action = %report.action, price = %report.price, "Cycle complete."),
                        Err(e) => self.record_error(e).await,
                    }
                }
            }
            self.publish();
        }

        self.status.running = false;
        self.publish();
        tracing::info!(open_positions = self.book.open_count(), "Decision loop stopped.");
        Ok(())
    }

    /// Runs one decision cycle at `now`.
    ///
    /// Order: market data and balance, score, risk halt, exits, trailing
    /// stops, entry. A data failure returns `Error::TransientData` before any
    /// state is touched.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        // --- Step 1: Market data and balance ---
        let snapshot = self
            .market
            .snapshot(&self.symbol, &self.timeframe, self.candle_limit)
            .await
            .map_err(|e| Error::TransientData(format!("snapshot: {e}")))?;
        let balance = self
            .gateway
            .get_balance()
            .await
            .map_err(|e| Error::TransientData(format!("balance: {e}")))?;

        if self.governor.roll_day(now) {
            let forgotten = self.book.forget_closed();
            tracing::debug!(forgotten, "Closed position ids pruned.");
        }
        self.balance = balance;
        self.governor.refresh_equity(balance);
        let price = snapshot.last_price;

        // --- Step 2: Score ---
        let signal = self.scorer.score(&snapshot);
        tracing::debug!(score = signal.score, direction = %signal.direction, %price, "Snapshot scored.");

        self.status.last_price = Some(price);
        self.status.last_signal = Some(signal);
        self.status.last_cycle_at = Some(now);
        self.status.cycles += 1;
        let mut report = CycleReport::hold(now, price, signal);

        // --- Step 3: Risk halt ---
        let halted = self.governor.halt_check();
        self.notify_halt_transition().await;

        // --- Step 4: Exits have priority ---
        let mut exits = self.book.evaluate_exits(price, now);
        if halted && self.halt_policy == HaltPolicy::CloseAll {
            for position in self.book.open_positions() {
                if !exits.iter().any(|e| e.position_id == position.id) {
                    exits.push(ExitSignal { position_id: position.id, reason: ExitReason::RiskHalt });
                }
            }
        }
        if !exits.is_empty() {
            let mut failure = None;
            for exit in exits {
                match self.close_position(exit.position_id, exit.reason).await {
                    Ok(Some(trade)) => report.closed.push(trade),
                    Ok(None) => {}
                    Err(e) => failure = Some(e),
                }
            }
            if report.closed.is_empty() {
                if let Some(e) = failure {
                    return Err(e);
                }
            } else {
                report.action = CycleAction::Close;
                report.note = failure.map(|e| e.to_string());
            }
            return self.finish(report);
        }

        // --- Step 5: Manage the open position ---
        if !self.book.is_empty() {
            report.adjusted = self.book.apply_trailing(price);
            if !report.adjusted.is_empty() {
                report.action = CycleAction::Adjust;
                for id in report.adjusted.clone() {
                    if let Some(position) = self.book.get(id).cloned() {
                        self.protect(&position).await;
                    }
                }
            }
            return self.finish(report);
        }

        // --- Step 6: Entry ---
        if !self.trading_active {
            report.note = Some("trading paused".to_string());
            return self.finish(report);
        }
        if signal.direction.is_flat() {
            return self.finish(report);
        }

        let candidate = EntryCandidate { symbol: self.symbol.clone(), direction: signal.direction, score: signal.score };
        if let EntryDecision::Deny(reason) = self.governor.approve_entry(&candidate, now) {
            report.note = Some(reason.to_string());
            return self.finish(report);
        }

        let params = self.deriver.derive(&signal, snapshot.volatility_estimate);
        let sized = match self.sizer.size(balance, price, params.leverage, self.governor.state()) {
            Ok(sized) => sized,
            Err(e) => {
                self.governor.release_entry();
                report.note = Some(e.to_string());
                return self.finish(report);
            }
        };

        let id = self.book.propose(&self.symbol, &signal, params, sized, price, now);
        let order = OrderRequest {
            symbol: self.symbol.clone(),
            direction: signal.direction,
            quantity: sized.quantity,
            margin: sized.margin,
            leverage: params.leverage,
            reference_price: price,
        };

        let fill = match self.gateway.place_order(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                self.book.reject(id)?;
                self.governor.release_entry();
                return Err(Error::Execution(e));
            }
        };
        let position = match self.book.confirm_fill(id, &fill) {
            Ok(position) => position.clone(),
            Err(e) => {
                self.governor.release_entry();
                return Err(e);
            }
        };

        self.protect(&position).await;
        self.notify(EngineEvent::Opened { position }).await;
        report.action = CycleAction::Open;
        report.opened = Some(id);
        self.finish(report)
    }

    fn finish(&mut self, report: CycleReport) -> Result<CycleReport> {
        self.status.last_action = Some(report.action);
        self.status.last_error = None;
        Ok(report)
    }

    /// Closes one position through the gateway. `Ok(None)` when the position
    /// is not open or already closing.
    async fn close_position(&mut self, id: PositionId, reason: ExitReason) -> Result<Option<TradeRecord>> {
        if !self.book.begin_close(id) {
            return Ok(None);
        }
        let Some(position) = self.book.get(id).cloned() else {
            return Ok(None);
        };

        let request = CloseRequest {
            position_id: id,
            symbol: position.symbol.clone(),
            direction: position.direction,
            quantity: position.quantity,
            reason,
        };
        let confirmation = match self.gateway.close_position(&request).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                self.book.abort_close(id);
                tracing::error!(position = %id, %reason, error = %e, "Close failed. Position stays open.");
                return Err(Error::Execution(e));
            }
        };

        let Some(trade) = self.book.close(
            id,
            confirmation.exit_price,
            confirmation.fee,
            reason,
            confirmation.closed_at,
        ) else {
            return Ok(None);
        };

        // The entry fee left the balance at open; re-read rather than apply
        // the net pnl on top of it.
        let settled = match self.gateway.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(error = %e, "Balance unavailable after close. Settling from the trade.");
                self.balance + trade.pnl + position.fees
            }
        };
        self.balance = settled;
        self.governor.record_closed_trade(&trade, settled);
        self.trades.push(trade.clone());
        self.status.performance = self.analytics.calculate(self.governor.state().initial_equity, &self.trades);

        self.notify(EngineEvent::Closed { trade: trade.clone() }).await;
        self.notify_halt_transition().await;
        Ok(Some(trade))
    }

    /// Mirrors the position's stop and target on the exchange. A failure
    /// leaves the in-process exit checks as the only guard, so it is logged
    /// and the cycle carries on.
    async fn protect(&self, position: &Position) {
        let request = ProtectionRequest {
            position_id: position.id,
            symbol: position.symbol.clone(),
            direction: position.direction,
            stop_loss_price: position.stop_loss_price,
            take_profit_price: position.take_profit_price,
        };
        if let Err(e) = self.gateway.protect(&request).await {
            tracing::warn!(position = %position.id, error = %e, "Protective orders not placed.");
        }
    }

    /// Applies an operator command between cycles.
    async fn apply_command(&mut self, command: Command) -> Flow {
        tracing::info!(%command, "Applying command.");
        match command {
            Command::Start => self.trading_active = true,
            Command::Stop => self.trading_active = false,
            Command::ResetRisk => {
                self.governor.reset_halt();
                self.halt_notified = false;
            }
            Command::CloseAll => {
                for position in self.book.open_positions() {
                    if let Err(e) = self.close_position(position.id, ExitReason::Manual).await {
                        self.record_error(e).await;
                    }
                }
            }
            Command::Shutdown => return Flow::Shutdown,
        }
        Flow::Continue
    }

    /// Emits `RiskHalt` once per transition into the halted state.
    async fn notify_halt_transition(&mut self) {
        let state = self.governor.snapshot();
        if state.halted && !self.halt_notified {
            self.halt_notified = true;
            let reason = state.halt_reason.clone().unwrap_or_else(|| "risk limit breached".to_string());
            let breach = Error::RiskBreach(reason.clone());
            tracing::error!(error = %breach, "New entries halted.");
            self.notify(EngineEvent::RiskHalt { reason, state }).await;
        }
    }

    async fn notify(&self, event: EngineEvent) {
        if let Err(e) = self.notifier.notify(&event).await {
            tracing::warn!(kind = event.kind(), error = %e, "Notifier failed.");
        }
    }

    async fn record_error(&mut self, error: Error) {
        match &error {
            Error::TransientData(_) => tracing::warn!(error = %error, "Cycle skipped."),
            _ => {
                tracing::error!(error = %error, "Cycle failed.");
                self.notify(EngineEvent::Error { message: error.to_string() }).await;
            }
        }
        self.status.last_error = Some(error.to_string());
    }

    fn publish(&mut self) {
        self.status.trading_active = self.trading_active;
        self.status.balance = self.balance;
        self.status.open_positions = self.book.open_positions();
        self.status.risk = self.governor.snapshot();
        let skip = self.trades.len().saturating_sub(RECENT_TRADES);
        self.status.recent_trades = self.trades[skip..].to_vec();
        self.status_tx.send_replace(self.status.clone());
    }

    /// Publishes the current state without running a cycle.
    pub fn publish_status(&mut self) -> EngineStatus {
        self.publish();
        self.status.clone()
    }
}
