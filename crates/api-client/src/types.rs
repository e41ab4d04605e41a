// In crates/api-client/src/types.rs

use core_types::Kline;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

/// The main client for the Binance USDⓈ-M Futures REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The persistent HTTP client.
    pub http_client: Client,
    pub api_key: String,
    pub secret_key: String,
    /// The base URL for the Futures API.
    pub base_url: String,
    pub recv_window_ms: u64,
    /// Decimal places order prices are rounded to.
    pub price_precision: u32,
    /// Decimal places order quantities are truncated to.
    pub quantity_precision: u32,
}

/// Order side as the exchange spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Which exit a conditional order guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectiveKind {
    StopLoss,
    TakeProfit,
}

impl ProtectiveKind {
    pub fn order_type(&self) -> &'static str {
        match self {
            ProtectiveKind::StopLoss => "STOP_MARKET",
            ProtectiveKind::TakeProfit => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Represents a single asset's balance in the futures account.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FuturesAsset {
    /// The asset's symbol (e.g., "USDT").
    pub asset: String,
    pub wallet_balance: Decimal,
    pub unrealized_profit: Decimal,
    pub margin_balance: Decimal,
    /// The available balance for new positions.
    pub available_balance: Decimal,
}

/// Represents a single position as returned by the account endpoint.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PositionInfo {
    pub symbol: String,
    /// Positive for long, negative for short.
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub unrealized_profit: Decimal,
    pub leverage: String,
    pub position_side: String,
}

/// Represents the overall futures account state.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AccountState {
    pub assets: Vec<FuturesAsset>,
    pub positions: Vec<PositionInfo>,
    pub total_wallet_balance: Decimal,
    pub total_unrealized_profit: Decimal,
    /// Wallet balance plus unrealized PnL.
    pub total_margin_balance: Decimal,
    pub total_available_balance: Option<Decimal>,
}

impl AccountState {
    /// Wallet balance of a single asset, or the account total when the
    /// asset is not listed.
    pub fn wallet_balance_of(&self, asset: &str) -> Decimal {
        self.assets
            .iter()
            .find(|a| a.asset.eq_ignore_ascii_case(asset))
            .map(|a| a.wallet_balance)
            .unwrap_or(self.total_wallet_balance)
    }

    /// The non-empty position on `exchange_code`, if any.
    pub fn open_position_on(&self, exchange_code: &str) -> Option<&PositionInfo> {
        self.positions
            .iter()
            .find(|p| p.symbol == exchange_code && !p.position_amt.is_zero())
    }
}

/// Kline as returned by `/fapi/v1/klines`, a JSON array of mixed types.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub i64,         // 0: Open time
    pub String,      // 1: Open
    pub String,      // 2: High
    pub String,      // 3: Low
    pub String,      // 4: Close
    pub String,      // 5: Volume
    pub i64,         // 6: Close time
    pub String,      // 7: Quote asset volume
    pub i64,         // 8: Number of trades
    pub String,      // 9: Taker buy base asset volume
    pub String,      // 10: Taker buy quote asset volume
    pub String,      // 11: Ignore
);

impl From<RawKline> for Kline {
    fn from(raw: RawKline) -> Self {
        Kline {
            open_time: raw.0,
            open: raw.1.parse().unwrap_or_default(),
            high: raw.2.parse().unwrap_or_default(),
            low: raw.3.parse().unwrap_or_default(),
            close: raw.4.parse().unwrap_or_default(),
            volume: raw.5.parse().unwrap_or_default(),
            close_time: raw.6,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    pub side: String, // "BUY" or "SELL"
    pub avg_price: Decimal, // The actual average fill price
    pub executed_qty: Decimal, // The actual filled quantity
    pub cum_quote: Decimal, // The cumulative quote asset transacted
    pub update_time: i64,
}
