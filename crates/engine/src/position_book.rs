// In crates/engine/src/position_book.rs

use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use core_types::{
    ConfidenceSignal, Direction, ExitReason, Fill, Position, PositionId, PositionStatus,
    RiskParameters, Symbol, TradeRecord,
};
use risk::SizedEntry;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap, HashSet};

/// An exit the book wants executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSignal {
    pub position_id: PositionId,
    pub reason: ExitReason,
}

/// Stop and target prices `pct` percent away from `entry`.
fn exit_prices(direction: Direction, entry: Decimal, params: &RiskParameters) -> (Decimal, Decimal) {
    let sl = params.stop_loss_pct / dec!(100);
    let tp = params.take_profit_pct / dec!(100);
    match direction {
        Direction::Short => (entry * (Decimal::ONE + sl), entry * (Decimal::ONE - tp)),
        _ => (entry * (Decimal::ONE - sl), entry * (Decimal::ONE + tp)),
    }
}

/// The position state machine: `pending → open → closed`, or
/// `pending → (rejected)`.
///
/// The book is the only owner of `Position` values. Stop-loss and
/// take-profit are fixed from the fill price when a position opens and only
/// move through `apply_trailing`.
#[derive(Debug)]
pub struct PositionBook {
    live: BTreeMap<PositionId, Position>,
    /// Risk parameters of pending entries, needed again at fill time.
    pending_params: HashMap<PositionId, RiskParameters>,
    closing: HashSet<PositionId>,
    closed: HashSet<PositionId>,
    next_id: u64,
    max_holding: Duration,
    trailing_stop_pct: Option<Decimal>,
}

impl PositionBook {
    pub fn new(max_holding: Duration, trailing_stop_pct: Option<Decimal>) -> Self {
        Self {
            live: BTreeMap::new(),
            pending_params: HashMap::new(),
            closing: HashSet::new(),
            closed: HashSet::new(),
            next_id: 1,
            max_holding,
            trailing_stop_pct,
        }
    }

    fn invalid(&self, id: PositionId, action: &'static str) -> Error {
        Error::InvalidTransition {
            position: id,
            from: self.live.get(&id).map(|p| p.status).or_else(|| self.closed.contains(&id).then_some(PositionStatus::Closed)),
            action,
        }
    }

    /// `none → pending`. Records a risk-approved entry awaiting its fill.
    ///
    /// # Arguments
    ///
    /// * `symbol`: The traded pair.
    /// * `signal`: The signal that triggered the entry.
    /// * `params`: Leverage and exit distances from the deriver.
    /// * `sized`: Margin and quantity from the sizer.
    /// * `reference_price`: Price the entry was sized against.
    pub fn propose(
        &mut self,
        symbol: &Symbol,
        signal: &ConfidenceSignal,
        params: RiskParameters,
        sized: SizedEntry,
        reference_price: Decimal,
        now: DateTime<Utc>,
    ) -> PositionId {
        let id = PositionId(self.next_id);
        self.next_id += 1;

        let (stop_loss_price, take_profit_price) = exit_prices(signal.direction, reference_price, &params);
        self.live.insert(
            id,
            Position {
                id,
                symbol: symbol.clone(),
                direction: signal.direction,
                entry_price: reference_price,
                size: sized.margin,
                quantity: sized.quantity,
                leverage: params.leverage,
                stop_loss_price,
                take_profit_price,
                take_profit_pct: params.take_profit_pct,
                confidence: signal.score,
                fees: Decimal::ZERO,
                opened_at: now,
                status: PositionStatus::Pending,
            },
        );
        self.pending_params.insert(id, params);
        tracing::debug!(position = %id, direction = %signal.direction, "Entry proposed.");
        id
    }

    /// `pending → open`. Fixes entry, stop and target from the actual fill.
    pub fn confirm_fill(&mut self, id: PositionId, fill: &Fill) -> Result<&Position> {
        let params = match (self.live.get(&id), self.pending_params.get(&id)) {
            (Some(p), Some(params)) if p.status == PositionStatus::Pending => *params,
            _ => return Err(self.invalid(id, "confirm fill")),
        };
        self.pending_params.remove(&id);

        let position = self.live.get_mut(&id).ok_or(Error::InvalidTransition {
            position: id,
            from: None,
            action: "confirm fill",
        })?;
        let (stop_loss_price, take_profit_price) = exit_prices(position.direction, fill.price, &params);
        position.entry_price = fill.price;
        position.quantity = fill.quantity;
        position.fees = fill.fee;
        position.stop_loss_price = stop_loss_price;
        position.take_profit_price = take_profit_price;
        position.opened_at = fill.filled_at;
        position.status = PositionStatus::Open;

        tracing::info!(
            position = %id,
            direction = %position.direction,
            entry = %position.entry_price,
            stop_loss = %position.stop_loss_price,
            take_profit = %position.take_profit_price,
            "Position opened."
        );
        Ok(position)
    }

    /// `pending → none`. The entry was rejected or timed out.
    pub fn reject(&mut self, id: PositionId) -> Result<()> {
        match self.live.get(&id) {
            Some(p) if p.status == PositionStatus::Pending => {
                self.live.remove(&id);
                self.pending_params.remove(&id);
                tracing::info!(position = %id, "Pending entry discarded.");
                Ok(())
            }
            _ => Err(self.invalid(id, "reject")),
        }
    }

    /// Exits due at `price`. Stop-loss wins over take-profit when both are
    /// crossed; time exits come last and fire once a position is strictly
    /// older than `max_holding`. Positions already closing are skipped.
    pub fn evaluate_exits(&self, price: Decimal, now: DateTime<Utc>) -> Vec<ExitSignal> {
        self.open_iter()
            .filter(|p| !self.closing.contains(&p.id))
            .filter_map(|p| {
                let reason = if p.stop_loss_hit(price) {
                    ExitReason::StopLoss
                } else if p.take_profit_hit(price) {
                    ExitReason::TakeProfit
                } else if now - p.opened_at > self.max_holding {
                    ExitReason::TimeExit
                } else {
                    return None;
                };
                Some(ExitSignal { position_id: p.id, reason })
            })
            .collect()
    }

    /// Ratchets stops toward `price` for positions in profit. A stop is never
    /// loosened. Returns the positions whose stop moved.
    pub fn apply_trailing(&mut self, price: Decimal) -> Vec<PositionId> {
        let Some(pct) = self.trailing_stop_pct else {
            return Vec::new();
        };
        let distance = pct / dec!(100);

        let mut adjusted = Vec::new();
        for position in self.live.values_mut() {
            if position.status != PositionStatus::Open || self.closing.contains(&position.id) {
                continue;
            }
            let candidate = match position.direction {
                Direction::Long if price > position.entry_price => price * (Decimal::ONE - distance),
                Direction::Short if price < position.entry_price => price * (Decimal::ONE + distance),
                _ => continue,
            };
            let tighter = match position.direction {
                Direction::Long => candidate > position.stop_loss_price,
                _ => candidate < position.stop_loss_price,
            };
            if tighter {
                tracing::info!(
                    position = %position.id,
                    from = %position.stop_loss_price,
                    to = %candidate,
                    "Trailing stop adjusted."
                );
                position.stop_loss_price = candidate;
                adjusted.push(position.id);
            }
        }
        adjusted
    }

    /// Marks an open position as closing. Returns `false` when it is not
    /// open or a close is already in flight.
    pub fn begin_close(&mut self, id: PositionId) -> bool {
        match self.live.get(&id) {
            Some(p) if p.status == PositionStatus::Open => self.closing.insert(id),
            _ => false,
        }
    }

    /// Reverts `begin_close` after the exchange refused the close.
    pub fn abort_close(&mut self, id: PositionId) {
        self.closing.remove(&id);
    }

    /// `open → closed`. Returns the trade record the first time only; any
    /// later call for the same position is a no-op returning `None`.
    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: Decimal,
        exit_fee: Decimal,
        reason: ExitReason,
        closed_at: DateTime<Utc>,
    ) -> Option<TradeRecord> {
        if self.closed.contains(&id) {
            tracing::debug!(position = %id, "Position already closed. Ignoring.");
            return None;
        }
        match self.live.get(&id) {
            Some(p) if p.status == PositionStatus::Open => {}
            _ => return None,
        }
        let mut position = self.live.remove(&id)?;
        self.closing.remove(&id);
        self.closed.insert(id);

        let gross = position.unrealized_pnl(exit_price);
        let fees = position.fees + exit_fee;
        let pnl = gross - fees;
        let roi_pct = if position.size > Decimal::ZERO {
            (pnl / position.size * dec!(100)).round_dp(4)
        } else {
            Decimal::ZERO
        };
        position.status = PositionStatus::Closed;

        tracing::info!(
            position = %id,
            %reason,
            entry = %position.entry_price,
            exit = %exit_price,
            pnl = %pnl,
            roi_pct = %roi_pct,
            "Position closed."
        );

        Some(TradeRecord {
            position_id: id,
            symbol: position.symbol,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            size: position.size,
            leverage: position.leverage,
            fees,
            pnl,
            roi_pct,
            reason,
            opened_at: position.opened_at,
            closed_at,
        })
    }

    /// Drops the ids of positions closed so far. Ids are never reused, so a
    /// late close for a forgotten id still finds nothing live and is ignored.
    pub fn forget_closed(&mut self) -> usize {
        let forgotten = self.closed.len();
        self.closed.clear();
        forgotten
    }

    fn open_iter(&self) -> impl Iterator<Item = &Position> {
        self.live.values().filter(|p| p.status == PositionStatus::Open)
    }

    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.live.get(&id)
    }

    /// Open positions, in id order.
    pub fn open_positions(&self) -> Vec<Position> {
        self.open_iter().cloned().collect()
    }

    pub fn open_count(&self) -> usize {
        self.open_iter().count()
    }

    /// True while any position is pending or open.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()
    }

    fn params() -> RiskParameters {
        RiskParameters { leverage: 10, take_profit_pct: dec!(7), stop_loss_pct: dec!(3) }
    }

    fn fill(price: Decimal) -> Fill {
        Fill {
            order_id: "1".into(),
            symbol: Symbol("BTC/USDT".into()),
            direction: Direction::Long,
            price,
            quantity: dec!(1),
            fee: dec!(0.4),
            filled_at: now(),
        }
    }

    fn open_long(book: &mut PositionBook, price: Decimal) -> PositionId {
        let id = book.propose(
            &Symbol("BTC/USDT".into()),
            &ConfidenceSignal::new(0.8, Direction::Long),
            params(),
            SizedEntry { margin: dec!(10), quantity: dec!(1) },
            price,
            now(),
        );
        book.confirm_fill(id, &fill(price)).unwrap();
        id
    }

    fn book() -> PositionBook {
        PositionBook::new(Duration::hours(24), None)
    }

    #[test]
    fn fill_fixes_exits_from_fill_price() {
        let mut book = book();
        let id = book.propose(
            &Symbol("BTC/USDT".into()),
            &ConfidenceSignal::new(0.8, Direction::Long),
            params(),
            SizedEntry { margin: dec!(10), quantity: dec!(1) },
            dec!(100),
            now(),
        );
        assert_eq!(book.get(id).unwrap().status, PositionStatus::Pending);

        let position = book.confirm_fill(id, &fill(dec!(101))).unwrap();
        assert_eq!(position.status, PositionStatus::Open);
        assert_eq!(position.stop_loss_price, dec!(97.97));
        assert_eq!(position.take_profit_price, dec!(108.07));
    }

    #[test]
    fn short_exits_mirror_long() {
        let (sl, tp) = exit_prices(Direction::Short, dec!(100), &params());
        assert_eq!(sl, dec!(103));
        assert_eq!(tp, dec!(93));
    }

    #[test]
    fn rejected_entry_returns_to_none() {
        let mut book = book();
        let id = book.propose(
            &Symbol("BTC/USDT".into()),
            &ConfidenceSignal::new(0.8, Direction::Long),
            params(),
            SizedEntry { margin: dec!(10), quantity: dec!(1) },
            dec!(100),
            now(),
        );
        book.reject(id).unwrap();
        assert!(book.is_empty());
        assert!(matches!(book.confirm_fill(id, &fill(dec!(100))), Err(Error::InvalidTransition { .. })));
    }

    #[test]
    fn stop_loss_crossing_closes_with_loss() {
        let mut book = book();
        let id = open_long(&mut book, dec!(100));

        let exits = book.evaluate_exits(dec!(96), now());
        assert_eq!(exits, vec![ExitSignal { position_id: id, reason: ExitReason::StopLoss }]);

        assert!(book.begin_close(id));
        let trade = book.close(id, dec!(96), dec!(0.4), ExitReason::StopLoss, now()).unwrap();
        assert_eq!(trade.pnl, dec!(-4.8));
        assert_eq!(trade.fees, dec!(0.8));
        assert_eq!(trade.roi_pct, dec!(-48));
        assert!(book.is_empty());
    }

    #[test]
    fn second_close_is_a_no_op() {
        let mut book = book();
        let id = open_long(&mut book, dec!(100));
        assert!(book.begin_close(id));
        assert!(book.close(id, dec!(110), Decimal::ZERO, ExitReason::TakeProfit, now()).is_some());
        assert!(book.close(id, dec!(110), Decimal::ZERO, ExitReason::TakeProfit, now()).is_none());
        assert!(!book.begin_close(id));
    }

    #[test]
    fn closing_positions_are_not_re_signalled() {
        let mut book = book();
        let id = open_long(&mut book, dec!(100));
        assert!(book.begin_close(id));
        assert!(!book.begin_close(id));
        assert!(book.evaluate_exits(dec!(50), now()).is_empty());

        book.abort_close(id);
        assert_eq!(book.evaluate_exits(dec!(50), now()).len(), 1);
    }

    #[test]
    fn forgotten_closes_stay_closed() {
        let mut book = book();
        let id = open_long(&mut book, dec!(100));
        assert!(book.begin_close(id));
        assert!(book.close(id, dec!(101), dec!(0.4), ExitReason::Manual, now()).is_some());

        assert_eq!(book.forget_closed(), 1);
        assert_eq!(book.forget_closed(), 0);
        assert!(book.close(id, dec!(101), dec!(0.4), ExitReason::Manual, now()).is_none());
        assert!(!book.begin_close(id));
    }

    #[test]
    fn take_profit_and_time_exit() {
        let mut book = book();
        let id = open_long(&mut book, dec!(100));
        assert_eq!(book.evaluate_exits(dec!(107), now())[0].reason, ExitReason::TakeProfit);
        assert!(book.evaluate_exits(dec!(101), now() + Duration::hours(23)).is_empty());
        assert!(book.evaluate_exits(dec!(101), now() + Duration::hours(24)).is_empty());
        assert_eq!(
            book.evaluate_exits(dec!(101), now() + Duration::hours(24) + Duration::seconds(1)),
            vec![ExitSignal { position_id: id, reason: ExitReason::TimeExit }]
        );
    }

    #[test]
    fn trailing_stop_only_tightens() {
        let mut book = PositionBook::new(Duration::hours(24), Some(dec!(2)));
        let id = open_long(&mut book, dec!(100));

        // Below entry: no trailing.
        assert!(book.apply_trailing(dec!(99)).is_empty());
        assert_eq!(book.apply_trailing(dec!(105)), vec![id]);
        assert_eq!(book.get(id).unwrap().stop_loss_price, dec!(102.90));
        // Price falls back: stop holds.
        assert!(book.apply_trailing(dec!(103)).is_empty());
        assert_eq!(book.get(id).unwrap().stop_loss_price, dec!(102.90));
    }
}
