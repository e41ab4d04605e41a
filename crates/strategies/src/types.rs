// In crates/strategies/src/types.rs

use serde::{Deserialize, Serialize};

/// Parameters for the confidence scorer. Every field has a default so a
/// config file only needs to name what it changes.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScorerSettings {
    /// Which scorer to build (currently only "indicator").
    pub name: String,

    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,

    pub ema_short: usize,
    pub ema_medium: usize,
    pub ema_long: usize,

    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,

    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,

    /// Trailing window for the average-volume comparison.
    pub volume_window: usize,
    /// Volume must exceed this multiple of its average for an entry when
    /// `trend_filters` is on.
    pub volume_threshold: f64,

    /// Below this score the signal is forced flat.
    pub min_confidence: f64,
    /// Minimum number of closes before a non-flat signal is produced.
    pub min_samples: usize,
    /// Require the RSI band, long-EMA side and volume confirmations before
    /// giving a direction.
    pub trend_filters: bool,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self {
            name: "indicator".to_string(),
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            ema_short: 9,
            ema_medium: 21,
            ema_long: 50,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            volume_window: 20,
            volume_threshold: 1.5,
            min_confidence: 0.5,
            min_samples: 50,
            trend_filters: true,
        }
    }
}
