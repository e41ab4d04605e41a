// In crates/app-config/src/types.rs

use crate::{Error, Result};
use core_types::Symbol;
use risk::{RiskParameterDeriver, RiskSettings};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strategies::{IndicatorScorer, ScorerSettings};

const REDACTED: &str = "***";

/// Candle intervals the exchange connectors understand.
pub const SUPPORTED_TIMEFRAMES: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d",
];

/// The root of the application configuration.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    pub trading: TradingSettings,
    pub risk: RiskSettings,
    pub scorer: ScorerSettings,
    pub execution: ExecutionSettings,
    /// Credentials and endpoint for the exchange connector.
    pub exchange: ExchangeSettings,
    pub notifier: NotifierSettings,
    pub server: ServerSettings,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub json_logs: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TradingSettings {
    /// Pair in `BASE/QUOTE` form.
    pub symbol: String,
    pub timeframe: String,
    /// Seconds between decision cycles.
    pub loop_interval_secs: u64,
    /// Whether new entries are allowed at startup.
    pub trading_active: bool,
    /// Candles fetched per snapshot.
    pub candle_limit: u16,
    /// Open positions older than this are closed at market.
    pub max_holding_hours: u32,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            symbol: "BTC/USDT".to_string(),
            timeframe: "5m".to_string(),
            loop_interval_secs: 30,
            trading_active: true,
            candle_limit: 100,
            max_holding_hours: 24,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// In-memory simulated exchange.
    #[default]
    Paper,
    /// Real orders against the configured exchange.
    Live,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ExecutionSettings {
    pub mode: ExecutionMode,
    /// Upper bound on a single gateway call.
    pub timeout_secs: u64,
    /// Total attempts per gateway call, first try included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_base_ms: u64,
    pub paper: PaperSettings,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Paper,
            timeout_secs: 10,
            max_attempts: 3,
            backoff_base_ms: 2000,
            paper: PaperSettings::default(),
        }
    }
}

/// Parameters of the simulated exchange.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PaperSettings {
    pub initial_balance: Decimal,
    /// Starting price of the random-walk market.
    pub base_price: Decimal,
    /// Standard deviation of each random-walk step, as a fraction.
    pub step_volatility: f64,
    /// Taker fee as a fraction (0.0004 = 0.04%).
    pub taker_fee: Decimal,
    /// Slippage applied against every market order, as a fraction.
    pub slippage: Decimal,
    /// Fixed seed for a reproducible market. Random when unset.
    pub seed: Option<u64>,
}

impl Default for PaperSettings {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(10_000),
            base_price: Decimal::from(66_000),
            step_volatility: 0.008,
            taker_fee: Decimal::new(4, 4),
            slippage: Decimal::new(5, 4),
            seed: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ExchangeSettings {
    /// The API key for the exchange.
    pub api_key: String,
    /// The secret key for the exchange.
    pub secret_key: String,
    /// The REST API base URL.
    pub rest_base_url: String,
    /// Receive window for signed requests, in milliseconds.
    pub recv_window_ms: u64,
    /// Decimal places order prices are rounded to (the symbol's tick size).
    pub price_precision: u32,
    /// Decimal places order quantities are truncated to (the symbol's step size).
    pub quantity_precision: u32,
    /// Mirror stop-loss and take-profit as reduce-only orders on the exchange.
    pub protective_orders: bool,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            rest_base_url: "https://fapi.binance.com".to_string(),
            recv_window_ms: 5000,
            price_precision: 1,
            quantity_precision: 3,
            protective_orders: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct NotifierSettings {
    /// Master switch for outbound notifications.
    pub active: bool,
    pub telegram_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub telegram_api_url: String,
    /// Poll Telegram for operator commands.
    pub accept_commands: bool,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            active: true,
            telegram_token: None,
            telegram_chat_id: None,
            telegram_api_url: "https://api.telegram.org".to_string(),
            accept_commands: true,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// `/health` reports unhealthy when the last cycle is older than this
    /// many loop intervals.
    pub stale_after_intervals: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
            stale_after_intervals: 5,
        }
    }
}

impl Settings {
    /// The configured pair, parsed.
    pub fn symbol(&self) -> Result<Symbol> {
        Symbol::parse(&self.trading.symbol).map_err(|e| Error::Invalid(e.to_string()))
    }

    /// Checks cross-field constraints that serde cannot express. A failure
    /// here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.symbol()?;

        if !SUPPORTED_TIMEFRAMES.contains(&self.trading.timeframe.as_str()) {
            return Err(Error::Invalid(format!(
                "unsupported timeframe '{}'",
                self.trading.timeframe
            )));
        }
        if self.trading.loop_interval_secs == 0 {
            return Err(Error::Invalid("trading.loop_interval_secs must be positive".into()));
        }
        if self.trading.candle_limit == 0 {
            return Err(Error::Invalid("trading.candle_limit must be positive".into()));
        }

        // --- Risk bounds ---
        RiskParameterDeriver::new(&self.risk).map_err(|e| Error::Invalid(e.to_string()))?;
        let hundred = Decimal::from(100);
        if self.risk.position_size_percentage <= Decimal::ZERO
            || self.risk.position_size_percentage > hundred
        {
            return Err(Error::Invalid("risk.position_size_percentage must be in (0, 100]".into()));
        }
        if self.risk.max_drawdown_percentage <= Decimal::ZERO
            || self.risk.max_drawdown_percentage > hundred
        {
            return Err(Error::Invalid("risk.max_drawdown_percentage must be in (0, 100]".into()));
        }
        if self.risk.max_open_positions == 0 || self.risk.max_daily_trades == 0 {
            return Err(Error::Invalid(
                "risk.max_open_positions and risk.max_daily_trades must be at least 1".into(),
            ));
        }
        if let Some(trail) = self.risk.trailing_stop_percentage {
            if trail <= Decimal::ZERO {
                return Err(Error::Invalid("risk.trailing_stop_percentage must be positive".into()));
            }
        }

        // --- Scorer ---
        IndicatorScorer::new(self.scorer.clone()).map_err(|e| Error::Invalid(e.to_string()))?;

        // --- Execution ---
        if self.execution.max_attempts == 0 || self.execution.timeout_secs == 0 {
            return Err(Error::Invalid(
                "execution.max_attempts and execution.timeout_secs must be positive".into(),
            ));
        }
        if self.execution.mode == ExecutionMode::Live
            && (self.exchange.api_key.is_empty() || self.exchange.secret_key.is_empty())
        {
            return Err(Error::Invalid("live mode requires exchange API credentials".into()));
        }
        if self.execution.mode == ExecutionMode::Paper
            && self.execution.paper.initial_balance <= Decimal::ZERO
        {
            return Err(Error::Invalid("execution.paper.initial_balance must be positive".into()));
        }

        // --- Notifier ---
        if self.notifier.telegram_token.is_some() != self.notifier.telegram_chat_id.is_some() {
            return Err(Error::Invalid(
                "telegram_token and telegram_chat_id must be set together".into(),
            ));
        }

        Ok(())
    }

    /// A copy with every credential masked, safe to log or serve.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.exchange.api_key.is_empty() {
            copy.exchange.api_key = REDACTED.to_string();
        }
        if !copy.exchange.secret_key.is_empty() {
            copy.exchange.secret_key = REDACTED.to_string();
        }
        if copy.notifier.telegram_token.is_some() {
            copy.notifier.telegram_token = Some(REDACTED.to_string());
        }
        copy
    }

    /// Renders the redacted settings as TOML.
    pub fn to_redacted_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(&self.redacted())?)
    }
}
