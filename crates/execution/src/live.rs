// In crates/execution/src/live.rs

use crate::retry::{RetryPolicy, with_retry};
use crate::types::{CloseConfirmation, CloseRequest, OrderRequest, ProtectionRequest};
use crate::{Error, ExecutionGateway, MarketDataSource, Result};
use api_client::{AccountState, ApiClient, OrderSide, ProtectiveKind};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{Direction, Fill, MarketSnapshot, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Binance USDⓈ-M default taker fee. Fills report notional, not fees.
const DEFAULT_TAKER_FEE: Decimal = dec!(0.0004);

/// A gateway that places real orders on the Binance futures exchange.
///
/// Reads are retried under `policy`. Order placement is never retried after
/// a timeout: the account is queried instead, and only a position the
/// exchange actually reports is treated as a fill.
#[derive(Debug, Clone)]
pub struct LiveGateway {
    /// The API client for communicating with Binance.
    api_client: ApiClient,
    policy: RetryPolicy,
    /// Asset the account balance is reported in (e.g. "USDT").
    quote_asset: String,
    taker_fee: Decimal,
    /// Mirror stop-loss and take-profit as conditional orders on the exchange.
    protective_orders: bool,
}

impl LiveGateway {
    /// Creates a new `LiveGateway`.
    ///
    /// # Arguments
    ///
    /// * `api_client`: The Binance API client
    /// * `policy`: Retry, backoff and timeout for every exchange call
    /// * `symbol`: The traded pair; its quote asset is the balance currency
    pub fn new(api_client: ApiClient, policy: RetryPolicy, symbol: &Symbol) -> Self {
        Self {
            api_client,
            policy,
            quote_asset: symbol.quote_asset().to_string(),
            taker_fee: DEFAULT_TAKER_FEE,
            protective_orders: true,
        }
    }

    pub fn with_protective_orders(mut self, enabled: bool) -> Self {
        self.protective_orders = enabled;
        self
    }

    async fn account_state(&self) -> Result<AccountState> {
        let client = &self.api_client;
        with_retry(self.policy, "get_account_state", || async move {
            client.get_account_state().await.map_err(Error::from)
        })
        .await
    }

    async fn last_price(&self, symbol: &Symbol) -> Result<Decimal> {
        let client = &self.api_client;
        with_retry(self.policy, "get_ticker_price", || async move {
            client.get_ticker_price(symbol).await.map_err(Error::from)
        })
        .await
    }

    /// Drops whatever conditional orders are resting on `symbol`. A failure
    /// is logged only: the position itself is already flat.
    async fn cancel_protection(&self, symbol: &Symbol) {
        if !self.protective_orders {
            return;
        }
        let client = &self.api_client;
        let cancelled = with_retry(self.policy, "cancel_all_open_orders", || async move {
            client.cancel_all_open_orders(symbol).await.map_err(Error::from)
        })
        .await;
        if let Err(e) = cancelled {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to cancel protective orders.");
        }
    }
}

fn entry_side(direction: Direction) -> Result<OrderSide> {
    match direction {
        Direction::Long => Ok(OrderSide::Buy),
        Direction::Short => Ok(OrderSide::Sell),
        Direction::Flat => Err(Error::ExecutionFailed { reason: "cannot trade a flat direction".into() }),
    }
}

/// Side of the order that reduces a `direction` position.
fn exit_side(direction: Direction) -> Result<OrderSide> {
    Ok(match entry_side(direction)? {
        OrderSide::Buy => OrderSide::Sell,
        OrderSide::Sell => OrderSide::Buy,
    })
}

/// The fill an unanswered entry order produced, judged from the account:
/// a position on the symbol in the ordered direction. `None` means the
/// order did not fill.
fn reconciled_entry(account: &AccountState, order: &OrderRequest, taker_fee: Decimal, now: DateTime<Utc>) -> Option<Fill> {
    let info = account.open_position_on(&order.symbol.exchange_code())?;
    let held = if info.position_amt > Decimal::ZERO { Direction::Long } else { Direction::Short };
    if held != order.direction {
        return None;
    }

    let quantity = info.position_amt.abs();
    Some(Fill {
        order_id: "reconciled".to_string(),
        symbol: order.symbol.clone(),
        direction: held,
        price: info.entry_price,
        quantity,
        fee: quantity * info.entry_price * taker_fee,
        filled_at: now,
    })
}

/// True when the account holds nothing on `symbol`.
fn position_flattened(account: &AccountState, symbol: &Symbol) -> bool {
    account.open_position_on(&symbol.exchange_code()).is_none()
}

fn settled_close(request: &CloseRequest, exit_price: Decimal, taker_fee: Decimal, now: DateTime<Utc>) -> CloseConfirmation {
    CloseConfirmation {
        position_id: request.position_id,
        exit_price,
        fee: request.quantity * exit_price * taker_fee,
        closed_at: now,
    }
}

#[async_trait]
impl ExecutionGateway for LiveGateway {
    fn name(&self) -> &'static str {
        "LiveGateway"
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<Fill> {
        tracing::info!(?order, "Executing live order request...");
        let side = entry_side(order.direction)?;
        let client = &self.api_client;

        // --- Step 1: Set Leverage ---
        with_retry(self.policy, "set_leverage", || async move {
            client.set_leverage(&order.symbol, order.leverage).await.map_err(Error::from)
        })
        .await
        .map_err(|e| Error::ExecutionFailed { reason: format!("Failed to set leverage: {}", e) })?;

        // --- Step 2: Place the Market Order ---
        let placed = with_retry(self.policy.no_retry_on_timeout(), "place_order", || async move {
            client
                .place_market_order(&order.symbol, side, order.quantity, false)
                .await
                .map_err(Error::from)
        })
        .await;

        let response = match placed {
            Ok(response) => response,
            Err(Error::Timeout { operation, after_ms }) => {
                tracing::warn!(symbol = %order.symbol, "Order timed out. Reconciling against the account.");
                let account = self.account_state().await?;
                return match reconciled_entry(&account, order, self.taker_fee, Utc::now()) {
                    Some(fill) => {
                        tracing::info!(price = %fill.price, qty = %fill.quantity, "Timed-out order found filled.");
                        Ok(fill)
                    }
                    None => Err(Error::Timeout { operation, after_ms }),
                };
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to place market order.");
                return Err(e);
            }
        };

        // --- Step 3: Build the Fill from the exchange's numbers ---
        if response.executed_qty.is_zero() {
            return Err(Error::ExecutionFailed {
                reason: format!("order {} was accepted but not filled ({})", response.order_id, response.status),
            });
        }

        Ok(Fill {
            order_id: response.order_id.to_string(),
            symbol: order.symbol.clone(),
            direction: order.direction,
            price: response.avg_price,
            quantity: response.executed_qty,
            fee: response.cum_quote * self.taker_fee,
            filled_at: Utc
                .timestamp_millis_opt(response.update_time)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    async fn close_position(&self, request: &CloseRequest) -> Result<CloseConfirmation> {
        let side = exit_side(request.direction)?;
        let client = &self.api_client;

        let placed = with_retry(self.policy.no_retry_on_timeout(), "close_position", || async move {
            client
                .place_market_order(&request.symbol, side, request.quantity, true)
                .await
                .map_err(Error::from)
        })
        .await;

        let confirmation = match placed {
            Ok(response) => CloseConfirmation {
                position_id: request.position_id,
                exit_price: response.avg_price,
                fee: response.cum_quote * self.taker_fee,
                closed_at: Utc::now(),
            },
            // A timeout, or a reduce-only rejection after a protective order
            // already fired: either way the account decides.
            Err(e) => {
                tracing::warn!(position_id = %request.position_id, error = %e, "Close failed. Reconciling against the account.");
                let account = self.account_state().await?;
                if !position_flattened(&account, &request.symbol) {
                    return Err(e);
                }
                let exit_price = self.last_price(&request.symbol).await?;
                tracing::info!(position_id = %request.position_id, %exit_price, "Position found flat on the exchange.");
                settled_close(request, exit_price, self.taker_fee, Utc::now())
            }
        };

        self.cancel_protection(&request.symbol).await;
        Ok(confirmation)
    }

    async fn protect(&self, request: &ProtectionRequest) -> Result<()> {
        if !self.protective_orders {
            return Ok(());
        }
        let side = exit_side(request.direction)?;
        let client = &self.api_client;

        // --- Step 1: Drop the previous pair ---
        with_retry(self.policy, "cancel_all_open_orders", || async move {
            client.cancel_all_open_orders(&request.symbol).await.map_err(Error::from)
        })
        .await?;

        // --- Step 2: Stop-loss first, then take-profit ---
        let orders = [
            (ProtectiveKind::StopLoss, request.stop_loss_price),
            (ProtectiveKind::TakeProfit, request.take_profit_price),
        ];
        for (kind, trigger) in orders {
            with_retry(self.policy.no_retry_on_timeout(), "place_protective_order", || async move {
                client
                    .place_protective_order(&request.symbol, side, kind, trigger)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        }
        Ok(())
    }

    async fn get_balance(&self) -> Result<Decimal> {
        Ok(self.account_state().await?.wallet_balance_of(&self.quote_asset))
    }
}

#[async_trait]
impl MarketDataSource for LiveGateway {
    async fn snapshot(&self, symbol: &Symbol, timeframe: &str, limit: u16) -> Result<MarketSnapshot> {
        let client = &self.api_client;
        let klines = with_retry(self.policy, "get_historical_klines", || async move {
            client
                .get_historical_klines(symbol, timeframe, limit)
                .await
                .map_err(|e| Error::DataUnavailable(e.to_string()))
        })
        .await?;

        MarketSnapshot::from_klines(symbol.clone(), &klines, Utc::now())
            .map_err(|e| Error::DataUnavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{ExitReason, PositionId};
    use serde_json::json;

    fn symbol() -> Symbol {
        Symbol("BTC/USDT".into())
    }

    fn account(positions: serde_json::Value) -> AccountState {
        serde_json::from_value(json!({
            "assets": [],
            "positions": positions,
            "totalWalletBalance": "1000",
            "totalUnrealizedProfit": "0",
            "totalMarginBalance": "1000"
        }))
        .unwrap()
    }

    fn holding(amount: &str) -> AccountState {
        account(json!([{
            "symbol": "BTCUSDT",
            "positionAmt": amount,
            "entryPrice": "60000",
            "unrealizedProfit": "0",
            "leverage": "10",
            "positionSide": "BOTH"
        }]))
    }

    fn order(direction: Direction) -> OrderRequest {
        OrderRequest {
            symbol: symbol(),
            direction,
            quantity: dec!(0.5),
            margin: dec!(3000),
            leverage: 10,
            reference_price: dec!(59990),
        }
    }

    #[test]
    fn entry_sides_follow_direction() {
        assert_eq!(entry_side(Direction::Long).unwrap(), OrderSide::Buy);
        assert_eq!(entry_side(Direction::Short).unwrap(), OrderSide::Sell);
        assert!(entry_side(Direction::Flat).is_err());
        assert_eq!(exit_side(Direction::Long).unwrap(), OrderSide::Sell);
        assert_eq!(exit_side(Direction::Short).unwrap(), OrderSide::Buy);
    }

    #[test]
    fn timed_out_entry_found_in_account_is_a_fill() {
        let now = Utc::now();
        let fill = reconciled_entry(&holding("0.5"), &order(Direction::Long), DEFAULT_TAKER_FEE, now).unwrap();
        assert_eq!(fill.direction, Direction::Long);
        assert_eq!(fill.price, dec!(60000));
        assert_eq!(fill.quantity, dec!(0.5));
        assert_eq!(fill.fee, dec!(12));
        assert_eq!(fill.filled_at, now);
    }

    #[test]
    fn timed_out_entry_without_position_did_not_fill() {
        let now = Utc::now();
        assert!(reconciled_entry(&account(json!([])), &order(Direction::Long), DEFAULT_TAKER_FEE, now).is_none());
        assert!(reconciled_entry(&holding("0"), &order(Direction::Long), DEFAULT_TAKER_FEE, now).is_none());
        // A position the other way round is not ours.
        assert!(reconciled_entry(&holding("-0.5"), &order(Direction::Long), DEFAULT_TAKER_FEE, now).is_none());
    }

    #[test]
    fn close_is_settled_only_when_the_account_is_flat() {
        assert!(position_flattened(&account(json!([])), &symbol()));
        assert!(position_flattened(&holding("0"), &symbol()));
        assert!(!position_flattened(&holding("0.5"), &symbol()));
        assert!(!position_flattened(&holding("-0.5"), &symbol()));
    }

    #[test]
    fn settled_close_charges_the_taker_fee() {
        let request = CloseRequest {
            position_id: PositionId(4),
            symbol: symbol(),
            direction: Direction::Long,
            quantity: dec!(0.5),
            reason: ExitReason::StopLoss,
        };
        let confirmation = settled_close(&request, dec!(58200), DEFAULT_TAKER_FEE, Utc::now());
        assert_eq!(confirmation.position_id, PositionId(4));
        assert_eq!(confirmation.exit_price, dec!(58200));
        assert_eq!(confirmation.fee, dec!(11.64));
    }

    #[test]
    fn balance_currency_is_the_quote_asset() {
        let client = ApiClient::new(&app_config::ExchangeSettings::default()).unwrap();
        let policy = RetryPolicy::new(1, std::time::Duration::ZERO, std::time::Duration::from_secs(1));
        let gateway = LiveGateway::new(client, policy, &Symbol("ETH/USDC".into())).with_protective_orders(false);
        assert_eq!(gateway.quote_asset, "USDC");
        assert_eq!(gateway.name(), "LiveGateway");
        assert!(!gateway.protective_orders);
    }
}
