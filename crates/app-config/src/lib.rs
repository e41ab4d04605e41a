// In crates/app-config/src/lib.rs

use config::{Config, Environment, File};
use std::collections::HashMap;
use std::path::Path;

pub mod error;
pub mod types;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use types::{
    AppSettings, ExchangeSettings, ExecutionMode, ExecutionSettings, NotifierSettings,
    PaperSettings, ServerSettings, Settings, TradingSettings,
};

/// Flat environment variables accepted for compatibility with existing
/// deployments, and the settings key each one overrides.
pub const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("TRADING_SYMBOL", "trading.symbol"),
    ("TIMEFRAME", "trading.timeframe"),
    ("LOOP_INTERVAL", "trading.loop_interval_secs"),
    ("TRADING_ACTIVE", "trading.trading_active"),
    ("POSITION_SIZE_PERCENTAGE", "risk.position_size_percentage"),
    ("MIN_LEVERAGE", "risk.min_leverage"),
    ("MAX_LEVERAGE", "risk.max_leverage"),
    ("STOP_LOSS_PERCENTAGE", "risk.stop_loss_percentage"),
    ("MIN_TAKE_PROFIT_PERCENTAGE", "risk.min_take_profit_percentage"),
    ("MAX_TAKE_PROFIT_PERCENTAGE", "risk.max_take_profit_percentage"),
    ("MAX_DRAWDOWN_PERCENTAGE", "risk.max_drawdown_percentage"),
    ("MAX_DAILY_TRADES", "risk.max_daily_trades"),
    ("MAX_OPEN_POSITIONS", "risk.max_open_positions"),
    ("RSI_PERIOD", "scorer.rsi_period"),
    ("RSI_OVERBOUGHT", "scorer.rsi_overbought"),
    ("RSI_OVERSOLD", "scorer.rsi_oversold"),
    ("EMA_SHORT", "scorer.ema_short"),
    ("EMA_MEDIUM", "scorer.ema_medium"),
    ("EMA_LONG", "scorer.ema_long"),
    ("VOLUME_THRESHOLD", "scorer.volume_threshold"),
    ("NOTIFICATION_ACTIVE", "notifier.active"),
    ("TELEGRAM_TOKEN", "notifier.telegram_token"),
    ("TELEGRAM_CHAT_ID", "notifier.telegram_chat_id"),
    ("API_KEY", "exchange.api_key"),
    ("API_SECRET", "exchange.secret_key"),
];

/// Loads the application settings from various sources.
///
/// This function orchestrates the layered configuration loading:
/// 1. Reads from a default `config/base.toml` file, if present.
/// 2. Merges settings from an environment-specific file (e.g., `config/production.toml`).
/// 3. Merges `APP__SECTION__KEY` environment variables.
/// 4. Applies the flat variables in `LEGACY_ENV_KEYS` on top.
///
/// The result is validated before it is returned.
pub fn load_settings() -> Result<Settings> {
    // Get the current environment. Default to "development" if not set.
    let environment = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "development".into());
    let env: HashMap<String, String> = std::env::vars().collect();
    load_settings_with(Path::new("config"), &environment, env)
}

/// `load_settings` with an explicit config directory and environment map.
pub fn load_settings_with(
    config_dir: &Path,
    environment: &str,
    env: HashMap<String, String>,
) -> Result<Settings> {
    let base = config_dir.join("base");
    let specific = config_dir.join(environment);

    let mut builder = Config::builder()
        .set_default("app.environment", environment)?
        .add_source(File::with_name(&base.to_string_lossy()).required(false))
        .add_source(File::with_name(&specific.to_string_lossy()).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .source(Some(env.clone().into_iter().collect())),
        );

    for (var, key) in LEGACY_ENV_KEYS {
        let value = env.get(*var).filter(|v| !v.trim().is_empty()).cloned();
        builder = builder.set_override_option(*key, value)?;
    }

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn load(vars: &[(&str, &str)]) -> Result<Settings> {
        let env = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        load_settings_with(Path::new("no-such-config-dir"), "test", env)
    }

    #[test]
    fn defaults_load_without_any_source() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings.trading.symbol, "BTC/USDT");
        assert_eq!(settings.trading.timeframe, "5m");
        assert_eq!(settings.trading.loop_interval_secs, 30);
        assert_eq!(settings.risk.min_leverage, 5);
        assert_eq!(settings.risk.max_leverage, 20);
        assert_eq!(settings.risk.stop_loss_percentage, dec!(3));
        assert_eq!(settings.risk.max_daily_trades, 5);
        assert_eq!(settings.execution.mode, ExecutionMode::Paper);
    }

    #[test]
    fn legacy_variables_override_nested_ones() {
        let settings = load(&[
            ("APP__TRADING__TIMEFRAME", "1h"),
            ("TIMEFRAME", "15m"),
            ("MAX_LEVERAGE", "10"),
            ("TRADING_ACTIVE", "false"),
            ("STOP_LOSS_PERCENTAGE", "2.5"),
            ("TELEGRAM_TOKEN", "abc"),
            ("TELEGRAM_CHAT_ID", "42"),
        ])
        .unwrap();
        assert_eq!(settings.trading.timeframe, "15m");
        assert_eq!(settings.risk.max_leverage, 10);
        assert!(!settings.trading.trading_active);
        assert_eq!(settings.risk.stop_loss_percentage, dec!(2.5));
        assert_eq!(settings.notifier.telegram_chat_id.as_deref(), Some("42"));
    }

    #[test]
    fn nested_variables_apply() {
        let settings = load(&[("APP__SERVER__PORT", "9090"), ("APP__RISK__HALT_POLICY", "close_all")])
            .unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.risk.halt_policy, risk::HaltPolicy::CloseAll);
    }

    #[test]
    fn inverted_leverage_band_is_fatal() {
        let err = load(&[("MIN_LEVERAGE", "30")]).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn bad_symbol_and_timeframe_are_rejected() {
        assert!(matches!(load(&[("TRADING_SYMBOL", "BTCUSDT")]), Err(Error::Invalid(_))));
        assert!(matches!(load(&[("TIMEFRAME", "7m")]), Err(Error::Invalid(_))));
    }

    #[test]
    fn live_mode_requires_credentials() {
        assert!(load(&[("APP__EXECUTION__MODE", "live")]).is_err());
        assert!(
            load(&[("APP__EXECUTION__MODE", "live"), ("API_KEY", "k"), ("API_SECRET", "s")]).is_ok()
        );
    }

    #[test]
    fn redaction_masks_secrets() {
        let settings = load(&[
            ("API_KEY", "key"),
            ("API_SECRET", "secret"),
            ("TELEGRAM_TOKEN", "tok"),
            ("TELEGRAM_CHAT_ID", "1"),
        ])
        .unwrap();
        let rendered = settings.to_redacted_toml().unwrap();
        assert!(!rendered.contains("secret\""));
        assert!(!rendered.contains("tok\""));
        assert_eq!(settings.redacted().exchange.api_key, "***");
        assert_eq!(settings.exchange.api_key, "key");
    }
}
