// In crates/execution/src/simulated.rs

use crate::types::{CloseConfirmation, CloseRequest, OrderRequest};
use crate::{Error, ExecutionGateway, MarketDataSource, Result};
use app_config::PaperSettings;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{Direction, Fill, Kline, MarketSnapshot, Symbol};
use num_traits::FromPrimitive;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Candles generated up front so the scorer has history on the first cycle.
const HISTORY_CANDLES: usize = 120;
/// Candles kept in memory; older ones are dropped.
const MAX_CANDLES: usize = 1000;
const CANDLE_MILLIS: i64 = 60_000;

/// A position held by the paper exchange. One per symbol, as in one-way mode.
#[derive(Debug, Clone)]
struct PaperPosition {
    direction: Direction,
    quantity: Decimal,
    entry_price: Decimal,
    margin: Decimal,
}

#[derive(Debug)]
struct PaperState {
    /// Wallet balance: initial capital plus realized PnL, net of fees.
    cash: Decimal,
    candles: VecDeque<Kline>,
    rng: StdRng,
    positions: HashMap<Symbol, PaperPosition>,
    next_order_id: u64,
}

/// An in-memory exchange with a seeded random-walk market.
///
/// It implements both `ExecutionGateway` and `MarketDataSource`, so the agent
/// can run end-to-end without credentials. Market orders fill at the last
/// close moved against the taker by `slippage`, and pay `taker_fee` on
/// notional.
#[derive(Debug)]
pub struct SimulatedGateway {
    settings: PaperSettings,
    state: Mutex<PaperState>,
}

impl SimulatedGateway {
    pub fn new(settings: &PaperSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut state = PaperState {
            cash: settings.initial_balance,
            candles: VecDeque::with_capacity(MAX_CANDLES),
            rng,
            positions: HashMap::new(),
            next_order_id: 1,
        };

        let start = Utc::now().timestamp_millis() - CANDLE_MILLIS * HISTORY_CANDLES as i64;
        let mut close = settings.base_price;
        for i in 0..HISTORY_CANDLES {
            let candle = next_candle(&mut state.rng, close, settings.step_volatility, start + CANDLE_MILLIS * i as i64);
            close = candle.close;
            state.candles.push_back(candle);
        }

        Self { settings: settings.clone(), state: Mutex::new(state) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PaperState>> {
        self.state.lock().map_err(|_| Error::ExecutionFailed {
            reason: "paper exchange state is poisoned".to_string(),
        })
    }

    /// Appends a flat candle at `price`. Lets callers steer the market.
    pub fn set_price(&self, price: Decimal) -> Result<()> {
        let mut state = self.lock()?;
        let open_time = state
            .candles
            .back()
            .map(|c| c.open_time + CANDLE_MILLIS)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        push_candle(
            &mut state,
            Kline {
                open_time,
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(100),
                close_time: open_time + CANDLE_MILLIS - 1,
            },
        );
        Ok(())
    }

    fn last_price(state: &PaperState) -> Result<Decimal> {
        state
            .candles
            .back()
            .map(|c| c.close)
            .ok_or_else(|| Error::DataUnavailable("paper market has no candles".to_string()))
    }

    /// Moves `price` against the taker: buys pay more, sells receive less.
    fn slipped(&self, price: Decimal, buying: bool) -> Decimal {
        if buying {
            price * (Decimal::ONE + self.settings.slippage)
        } else {
            price * (Decimal::ONE - self.settings.slippage)
        }
    }
}

#[async_trait]
impl ExecutionGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "SimulatedGateway"
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill> {
        if order.direction.is_flat() || order.quantity <= Decimal::ZERO {
            return Err(Error::ExecutionFailed {
                reason: format!("invalid order: {} {}", order.direction, order.quantity),
            });
        }

        let mut state = self.lock()?;
        if state.positions.contains_key(&order.symbol) {
            return Err(Error::ExecutionFailed {
                reason: format!("a position on {} is already open", order.symbol),
            });
        }

        // --- 1. Price with slippage ---
        let price = self.slipped(Self::last_price(&state)?, order.direction == Direction::Long);

        // --- 2. Costs ---
        let fee = order.quantity * price * self.settings.taker_fee;
        if state.cash < order.margin + fee {
            return Err(Error::ExecutionFailed {
                reason: format!("insufficient margin: need {}, have {}", order.margin + fee, state.cash),
            });
        }
        state.cash -= fee;

        // --- 3. Book the position ---
        state.positions.insert(
            order.symbol.clone(),
            PaperPosition {
                direction: order.direction,
                quantity: order.quantity,
                entry_price: price,
                margin: order.margin,
            },
        );

        let order_id = format!("paper-{}", state.next_order_id);
        state.next_order_id += 1;

        tracing::info!(
            order_id = %order_id,
            symbol = %order.symbol,
            direction = %order.direction,
            price = %price,
            qty = %order.quantity,
            fee = %fee,
            "Paper order filled."
        );

        Ok(Fill {
            order_id,
            symbol: order.symbol.clone(),
            direction: order.direction,
            price,
            quantity: order.quantity,
            fee,
            filled_at: Utc::now(),
        })
    }

    async fn close_position(&self, request: &CloseRequest) -> Result<CloseConfirmation> {
        let mut state = self.lock()?;
        let position = match state.positions.get(&request.symbol) {
            Some(p) if p.direction == request.direction => p.clone(),
            _ => {
                return Err(Error::ExecutionFailed {
                    reason: format!("no {} position on {} to close", request.direction, request.symbol),
                });
            }
        };

        // Closing a long sells, closing a short buys.
        let exit_price = self.slipped(Self::last_price(&state)?, position.direction == Direction::Short);
        let gross = (exit_price - position.entry_price) * position.quantity * position.direction.sign();
        let fee = position.quantity * exit_price * self.settings.taker_fee;

        state.cash += gross - fee;
        state.positions.remove(&request.symbol);

        tracing::info!(
            position_id = %request.position_id,
            reason = %request.reason,
            exit_price = %exit_price,
            gross_pnl = %gross,
            margin = %position.margin,
            cash = %state.cash,
            "Paper position closed."
        );

        Ok(CloseConfirmation {
            position_id: request.position_id,
            exit_price,
            fee,
            closed_at: Utc::now(),
        })
    }

    async fn get_balance(&self) -> Result<Decimal> {
        Ok(self.lock()?.cash)
    }
}

#[async_trait]
impl MarketDataSource for SimulatedGateway {
    /// Advances the market by one candle and returns the trailing `limit`.
    async fn snapshot(&self, symbol: &Symbol, _timeframe: &str, limit: u16) -> Result<MarketSnapshot> {
        let mut state = self.lock()?;

        let (close, open_time) = match state.candles.back() {
            Some(last) => (last.close, last.open_time + CANDLE_MILLIS),
            None => (self.settings.base_price, Utc::now().timestamp_millis()),
        };
        let candle = next_candle(&mut state.rng, close, self.settings.step_volatility, open_time);
        push_candle(&mut state, candle);

        let skip = state.candles.len().saturating_sub(limit as usize);
        let klines: Vec<Kline> = state.candles.iter().skip(skip).cloned().collect();
        MarketSnapshot::from_klines(symbol.clone(), &klines, Utc::now())
            .map_err(|e| Error::DataUnavailable(e.to_string()))
    }
}

fn push_candle(state: &mut PaperState, candle: Kline) {
    if state.candles.len() >= MAX_CANDLES {
        state.candles.pop_front();
    }
    state.candles.push_back(candle);
}

/// One random-walk step from `prev_close`. The return is normal with
/// standard deviation `volatility`, drawn by Box-Muller.
fn next_candle(rng: &mut StdRng, prev_close: Decimal, volatility: f64, open_time: i64) -> Kline {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.r#gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

    let step = Decimal::from_f64(z * volatility).unwrap_or_default();
    let wick = Decimal::from_f64(rng.r#gen::<f64>() * volatility / 2.0).unwrap_or_default();
    let volume = Decimal::from_f64(50.0 + rng.r#gen::<f64>() * 100.0).unwrap_or(dec!(100));

    let open = prev_close;
    let close = (open * (Decimal::ONE + step)).max(dec!(0.01)).round_dp(2);
    let high = (open.max(close) * (Decimal::ONE + wick)).round_dp(2);
    let low = (open.min(close) * (Decimal::ONE - wick)).round_dp(2);

    Kline {
        open_time,
        open,
        high,
        low,
        close,
        volume: volume.round_dp(3),
        close_time: open_time + CANDLE_MILLIS - 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ExitReason, PositionId};

    fn settings() -> PaperSettings {
        PaperSettings {
            initial_balance: dec!(10000),
            base_price: dec!(100),
            step_volatility: 0.01,
            taker_fee: dec!(0.001),
            slippage: dec!(0.001),
            seed: Some(7),
        }
    }

    fn symbol() -> Symbol {
        Symbol("BTC/USDT".into())
    }

    fn order(direction: Direction) -> OrderRequest {
        OrderRequest {
            symbol: symbol(),
            direction,
            quantity: dec!(10),
            margin: dec!(100),
            leverage: 10,
            reference_price: dec!(100),
        }
    }

    fn close_request(direction: Direction) -> CloseRequest {
        CloseRequest {
            position_id: PositionId(1),
            symbol: symbol(),
            direction,
            quantity: dec!(10),
            reason: ExitReason::Manual,
        }
    }

    #[tokio::test]
    async fn snapshots_carry_history_and_advance() {
        let gateway = SimulatedGateway::new(&settings());
        let first = gateway.snapshot(&symbol(), "5m", 100).await.unwrap();
        assert_eq!(first.recent_closes.len(), 100);
        assert_eq!(first.recent_volumes.len(), 100);
        let second = gateway.snapshot(&symbol(), "5m", 100).await.unwrap();
        assert_eq!(second.recent_closes[..99], first.recent_closes[1..]);
    }

    #[tokio::test]
    async fn same_seed_gives_same_market() {
        let a = SimulatedGateway::new(&settings());
        let b = SimulatedGateway::new(&settings());
        let sa = a.snapshot(&symbol(), "5m", 50).await.unwrap();
        let sb = b.snapshot(&symbol(), "5m", 50).await.unwrap();
        assert_eq!(sa.recent_closes, sb.recent_closes);
    }

    #[tokio::test]
    async fn long_round_trip_books_pnl_net_of_fees() {
        let gateway = SimulatedGateway::new(&settings());
        gateway.set_price(dec!(100)).unwrap();

        let fill = gateway.place_order(&order(Direction::Long)).await.unwrap();
        assert_eq!(fill.price, dec!(100.1));
        assert_eq!(fill.fee, dec!(1.001));

        gateway.set_price(dec!(110)).unwrap();
        let confirmation = gateway.close_position(&close_request(Direction::Long)).await.unwrap();
        assert_eq!(confirmation.exit_price, dec!(109.89));

        // (109.89 - 100.1) * 10 = 97.9 gross; exit fee 1.0989.
        let balance = gateway.get_balance().await.unwrap();
        assert_eq!(balance, dec!(10000) - dec!(1.001) + dec!(97.9) - dec!(1.0989));
    }

    #[tokio::test]
    async fn short_loses_when_price_rises() {
        let gateway = SimulatedGateway::new(&settings());
        gateway.set_price(dec!(100)).unwrap();
        gateway.place_order(&order(Direction::Short)).await.unwrap();
        gateway.set_price(dec!(105)).unwrap();
        gateway.close_position(&close_request(Direction::Short)).await.unwrap();
        assert!(gateway.get_balance().await.unwrap() < dec!(9950));
    }

    #[tokio::test]
    async fn second_entry_on_same_symbol_is_rejected() {
        let gateway = SimulatedGateway::new(&settings());
        gateway.place_order(&order(Direction::Long)).await.unwrap();
        let err = gateway.place_order(&order(Direction::Long)).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn closing_without_position_fails() {
        let gateway = SimulatedGateway::new(&settings());
        assert!(gateway.close_position(&close_request(Direction::Long)).await.is_err());
    }

    #[tokio::test]
    async fn insufficient_margin_is_rejected() {
        let gateway = SimulatedGateway::new(&settings());
        let mut big = order(Direction::Long);
        big.margin = dec!(20000);
        assert!(gateway.place_order(&big).await.is_err());
        assert_eq!(gateway.get_balance().await.unwrap(), dec!(10000));
    }
}
