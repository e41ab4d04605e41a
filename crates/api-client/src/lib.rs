// In crates/api-client/src/lib.rs

use app_config::ExchangeSettings;
use chrono::Utc;
use core_types::{Kline, Symbol};
use hmac::{Hmac, Mac};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
// Create a type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::*;

impl ApiClient {
    /// Constructs a new ApiClient from the exchange settings.
    pub fn new(settings: &ExchangeSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("trading-agent/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;

        Ok(ApiClient {
            http_client,
            api_key: settings.api_key.clone(),
            secret_key: settings.secret_key.clone(),
            base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            recv_window_ms: settings.recv_window_ms,
            price_precision: settings.price_precision,
            quantity_precision: settings.quantity_precision,
        })
    }

    /// Generates an HMAC-SHA256 signature for a given query string.
    ///
    /// # Returns
    ///
    /// A hexadecimal string representation of the signature.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Appends `recvWindow`, `timestamp` and the signature to `params`.
    fn create_signed_query(&self, params: &mut String) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();

        if !params.is_empty() {
            params.push('&');
        }
        params.push_str(&format!("recvWindow={}&timestamp={}", self.recv_window_ms, timestamp));

        let signature = self.sign(params)?;
        params.push_str(&format!("&signature={}", signature));
        Ok(())
    }

    /// Reads a response body, surfacing Binance's `{code, msg}` error objects
    /// before deserializing into `T`.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let text = response.text().await.map_err(Error::RequestFailed)?;
        let value: Value = serde_json::from_str(&text).map_err(Error::DeserializationFailed)?;
        check_api_error(&value)?;
        serde_json::from_value(value).map_err(Error::DeserializationFailed)
    }

    async fn signed_get<T: DeserializeOwned>(&self, path: &str, mut params: String) -> Result<T> {
        self.create_signed_query(&mut params)?;
        let url = format!("{}{}?{}", self.base_url, path, params);
        let response = self
            .http_client
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Error::RequestFailed)?;
        Self::parse_response(response).await
    }

    async fn signed_post<T: DeserializeOwned>(&self, path: &str, mut params: String) -> Result<T> {
        self.create_signed_query(&mut params)?;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(params)
            .send()
            .await
            .map_err(Error::RequestFailed)?;
        Self::parse_response(response).await
    }

    async fn signed_delete<T: DeserializeOwned>(&self, path: &str, mut params: String) -> Result<T> {
        self.create_signed_query(&mut params)?;
        let url = format!("{}{}?{}", self.base_url, path, params);
        let response = self
            .http_client
            .delete(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(Error::RequestFailed)?;
        Self::parse_response(response).await
    }

    /// Fetches the futures account balance and asset information.
    ///
    /// This corresponds to the `GET /fapi/v2/account` endpoint.
    pub async fn get_account_state(&self) -> Result<AccountState> {
        self.signed_get("/fapi/v2/account", String::new()).await
    }

    /// Fetches the latest trade price for a symbol (`GET /fapi/v1/ticker/price`).
    pub async fn get_ticker_price(&self, symbol: &Symbol) -> Result<Decimal> {
        let url = format!("{}/fapi/v1/ticker/price?symbol={}", self.base_url, symbol.exchange_code());
        let response = self.http_client.get(&url).send().await.map_err(Error::RequestFailed)?;
        let ticker: TickerPrice = Self::parse_response(response).await?;
        Ok(ticker.price)
    }

    /// Fetches historical kline (candlestick) data.
    ///
    /// This corresponds to the `GET /fapi/v1/klines` endpoint.
    ///
    /// # Arguments
    ///
    /// * `symbol`: The symbol to fetch klines for.
    /// * `interval`: The kline interval (e.g., "1m", "5m", "1h").
    /// * `limit`: Number of most recent klines to return (max 1500).
    pub async fn get_historical_klines(&self, symbol: &Symbol, interval: &str, limit: u16) -> Result<Vec<Kline>> {
        let params = format!("symbol={}&interval={}&limit={}", symbol.exchange_code(), interval, limit);

        let url = format!("{}/fapi/v1/klines?{}", self.base_url, params);
        let response = self.http_client.get(&url).send().await.map_err(Error::RequestFailed)?;
        let raw_klines: Vec<RawKline> = Self::parse_response(response).await?;

        Ok(raw_klines.into_iter().map(Kline::from).collect())
    }

    /// Sets the leverage used for new positions on `symbol`
    /// (`POST /fapi/v1/leverage`).
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: u8) -> Result<()> {
        let params = format!("symbol={}&leverage={}", symbol.exchange_code(), leverage);
        let _: Value = self.signed_post("/fapi/v1/leverage", params).await?;
        tracing::debug!(symbol = %symbol, leverage, "Leverage set on exchange.");
        Ok(())
    }

    /// Places a new market order (`POST /fapi/v1/order`).
    ///
    /// `reduce_only` marks orders that may only shrink an existing position,
    /// which is how positions are closed in one-way mode.
    pub async fn place_market_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<NewOrderResponse> {
        let quantity = quantity
            .round_dp_with_strategy(self.quantity_precision, RoundingStrategy::ToZero)
            .normalize();

        let mut params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newOrderRespType=RESULT",
            symbol.exchange_code(),
            side.as_str(),
            quantity
        );
        if reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let response: NewOrderResponse = self.signed_post("/fapi/v1/order", params).await?;
        tracing::info!(
            symbol = %symbol,
            side = side.as_str(),
            order_id = response.order_id,
            avg_price = %response.avg_price,
            qty = %response.executed_qty,
            "Market order filled."
        );
        Ok(response)
    }

    /// Places a conditional market order that flattens the whole position
    /// once the mark price crosses `trigger_price`.
    ///
    /// Uses `closePosition=true`, so no quantity is sent and the order can
    /// only ever reduce the position.
    pub async fn place_protective_order(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        kind: ProtectiveKind,
        trigger_price: Decimal,
    ) -> Result<NewOrderResponse> {
        let params = protective_order_params(symbol, side, kind, self.round_price(trigger_price));
        let response: NewOrderResponse = self.signed_post("/fapi/v1/order", params).await?;
        tracing::info!(
            symbol = %symbol,
            kind = kind.order_type(),
            trigger = %trigger_price,
            order_id = response.order_id,
            "Protective order placed."
        );
        Ok(response)
    }

    /// Cancels every open order on `symbol` (`DELETE /fapi/v1/allOpenOrders`).
    pub async fn cancel_all_open_orders(&self, symbol: &Symbol) -> Result<()> {
        let params = format!("symbol={}", symbol.exchange_code());
        let _: Value = self.signed_delete("/fapi/v1/allOpenOrders", params).await?;
        tracing::debug!(symbol = %symbol, "Open orders cancelled.");
        Ok(())
    }

    fn round_price(&self, price: Decimal) -> Decimal {
        price
            .round_dp_with_strategy(self.price_precision, RoundingStrategy::MidpointNearestEven)
            .normalize()
    }
}

fn protective_order_params(symbol: &Symbol, side: OrderSide, kind: ProtectiveKind, trigger_price: Decimal) -> String {
    format!(
        "symbol={}&side={}&type={}&stopPrice={}&closePosition=true&workingType=MARK_PRICE",
        symbol.exchange_code(),
        side.as_str(),
        kind.order_type(),
        trigger_price
    )
}

/// Binance returns `{"code": <negative>, "msg": "..."}` on failure. Some
/// success bodies (e.g. leverage changes) carry `code: 200`.
fn check_api_error(value: &Value) -> Result<()> {
    if let Some(code) = value.get("code").and_then(Value::as_i64) {
        if code != 0 && code != 200 {
            let msg = value.get("msg").and_then(Value::as_str).unwrap_or("Unknown error").to_string();
            return Err(Error::ApiError { code, msg });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client(secret: &str) -> ApiClient {
        let settings = ExchangeSettings {
            api_key: "key".into(),
            secret_key: secret.into(),
            ..ExchangeSettings::default()
        };
        ApiClient::new(&settings).unwrap()
    }

    #[test]
    fn signature_matches_reference_vector() {
        let client = client("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j");
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn signed_query_appends_timestamp_and_signature() {
        let client = client("secret");
        let mut params = "symbol=BTCUSDT".to_string();
        client.create_signed_query(&mut params).unwrap();
        assert!(params.starts_with("symbol=BTCUSDT&recvWindow=5000&timestamp="));
        let signature = params.rsplit("&signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn api_error_objects_are_detected() {
        let err = serde_json::json!({"code": -2019, "msg": "Margin is insufficient."});
        assert!(matches!(check_api_error(&err), Err(Error::ApiError { code: -2019, .. })));
        let ok = serde_json::json!({"code": 200, "msg": "success"});
        assert!(check_api_error(&ok).is_ok());
        let order = serde_json::json!({"orderId": 1});
        assert!(check_api_error(&order).is_ok());
    }

    #[test]
    fn raw_kline_converts() {
        let body = r#"[[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999,"2434.19055334",308,"1756.87402397","28.46694368","0"]]"#;
        let raw: Vec<RawKline> = serde_json::from_str(body).unwrap();
        let kline = Kline::from(raw.into_iter().next().unwrap());
        assert_eq!(kline.close, dec!(0.01577100));
        assert_eq!(kline.close_time, 1499644799999);
    }

    #[test]
    fn protective_orders_close_the_whole_position() {
        let symbol = Symbol("BTC/USDT".into());
        let params = protective_order_params(&symbol, OrderSide::Sell, ProtectiveKind::StopLoss, dec!(58200.5));
        assert_eq!(
            params,
            "symbol=BTCUSDT&side=SELL&type=STOP_MARKET&stopPrice=58200.5&closePosition=true&workingType=MARK_PRICE"
        );
        let params = protective_order_params(&symbol, OrderSide::Buy, ProtectiveKind::TakeProfit, dec!(56000));
        assert!(params.contains("side=BUY&type=TAKE_PROFIT_MARKET&stopPrice=56000"));
    }

    #[test]
    fn prices_round_to_the_tick() {
        let client = client("secret");
        assert_eq!(client.round_price(dec!(97.0349)), dec!(97));
        assert_eq!(client.round_price(dec!(106.06)), dec!(106.1));
    }

    #[test]
    fn transient_codes_are_retryable() {
        assert!(Error::ApiError { code: -1003, msg: String::new() }.is_transient());
        assert!(!Error::ApiError { code: -2019, msg: String::new() }.is_transient());
    }
}
