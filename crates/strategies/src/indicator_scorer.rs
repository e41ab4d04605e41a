// In crates/strategies/src/indicator_scorer.rs

use crate::types::ScorerSettings;
use crate::{ConfidenceScorer, Error, Result};
use core_types::{ConfidenceSignal, Direction, MarketSnapshot};
use ta::Next;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage as Ema, MovingAverageConvergenceDivergence as Macd,
    RelativeStrengthIndex as Rsi,
};

// Factor weights; they sum to 1.0.
const W_RSI: f64 = 0.30;
const W_EMA: f64 = 0.20;
const W_VOLUME: f64 = 0.15;
const W_VOLATILITY: f64 = 0.15;
const W_BOLLINGER: f64 = 0.20;

/// Volatility (in percent) at which the volatility factor peaks.
const VOLATILITY_SWEET_SPOT: f64 = 0.5;

/// Longs are skipped once RSI is above this, shorts once it is below the mirror.
const RSI_LONG_CEILING: f64 = 60.0;
const RSI_SHORT_FLOOR: f64 = 40.0;

/// The latest value of every indicator the scorer looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorReadings {
    pub close: f64,
    pub rsi: f64,
    pub ema_short: f64,
    pub ema_medium: f64,
    pub ema_long: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    /// Current volume over its trailing average. `None` without volume data.
    pub volume_ratio: Option<f64>,
}

impl IndicatorReadings {
    /// Where the close sits inside the Bollinger envelope: 0 at the lower
    /// band, 1 at the upper band. A collapsed envelope reads as the middle.
    pub fn bollinger_position(&self) -> f64 {
        let width = self.bb_upper - self.bb_lower;
        if width <= f64::EPSILON {
            return 0.5;
        }
        (self.close - self.bb_lower) / width
    }
}

struct Indicators {
    rsi: Rsi,
    ema_short: Ema,
    ema_medium: Ema,
    ema_long: Ema,
    macd: Macd,
    bollinger: BollingerBands,
}

/// Weighted multi-indicator confidence scorer.
///
/// Indicators are rebuilt from the snapshot's closes on every call, so the
/// scorer carries no state between cycles.
#[derive(Debug, Clone)]
pub struct IndicatorScorer {
    settings: ScorerSettings,
}

impl IndicatorScorer {
    /// Creates a scorer, failing if any indicator period is invalid.
    pub fn new(settings: ScorerSettings) -> Result<Self> {
        if !(0.0..=1.0).contains(&settings.min_confidence) {
            return Err(Error::InvalidParameters(format!(
                "min_confidence must be within [0, 1], got {}",
                settings.min_confidence
            )));
        }
        if settings.rsi_oversold >= settings.rsi_overbought {
            return Err(Error::InvalidParameters(
                "rsi_oversold must be below rsi_overbought".to_string(),
            ));
        }
        let scorer = Self { settings };
        scorer.build_indicators()?;
        Ok(scorer)
    }

    pub fn settings(&self) -> &ScorerSettings {
        &self.settings
    }

    fn build_indicators(&self) -> Result<Indicators> {
        let s = &self.settings;
        let invalid = |what: &str| Error::InvalidParameters(format!("invalid {what} period"));
        Ok(Indicators {
            rsi: Rsi::new(s.rsi_period).map_err(|_| invalid("RSI"))?,
            ema_short: Ema::new(s.ema_short).map_err(|_| invalid("short EMA"))?,
            ema_medium: Ema::new(s.ema_medium).map_err(|_| invalid("medium EMA"))?,
            ema_long: Ema::new(s.ema_long).map_err(|_| invalid("long EMA"))?,
            macd: Macd::new(s.macd_fast, s.macd_slow, s.macd_signal).map_err(|_| invalid("MACD"))?,
            bollinger: BollingerBands::new(s.bollinger_period, s.bollinger_std_dev)
                .map_err(|_| invalid("Bollinger"))?,
        })
    }

    /// Runs every indicator across `closes` and returns the final values.
    pub fn readings(&self, closes: &[f64], volumes: &[f64]) -> Result<Option<IndicatorReadings>> {
        let Some(&close) = closes.last() else {
            return Ok(None);
        };
        let mut ind = self.build_indicators()?;

        let mut readings = IndicatorReadings {
            close,
            rsi: 50.0,
            ema_short: close,
            ema_medium: close,
            ema_long: close,
            macd: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            bb_upper: close,
            bb_middle: close,
            bb_lower: close,
            volume_ratio: None,
        };

        for &price in closes {
            readings.rsi = ind.rsi.next(price);
            readings.ema_short = ind.ema_short.next(price);
            readings.ema_medium = ind.ema_medium.next(price);
            readings.ema_long = ind.ema_long.next(price);

            let macd = ind.macd.next(price);
            readings.macd = macd.macd;
            readings.macd_signal = macd.signal;
            readings.macd_histogram = macd.histogram;

            let bands = ind.bollinger.next(price);
            readings.bb_upper = bands.upper;
            readings.bb_middle = bands.average;
            readings.bb_lower = bands.lower;
        }

        readings.volume_ratio = volume_ratio(volumes, self.settings.volume_window);
        Ok(Some(readings))
    }

    /// Weighted sum of the five confidence factors, clamped to [0, 1].
    pub fn weighted_score(&self, r: &IndicatorReadings, volatility_pct: f64) -> f64 {
        let s = &self.settings;

        // --- Factor 1: RSI extremity ---
        let rsi_factor = if r.rsi < s.rsi_oversold {
            1.0 - r.rsi / s.rsi_oversold
        } else if r.rsi > s.rsi_overbought {
            (r.rsi - s.rsi_overbought) / (100.0 - s.rsi_overbought)
        } else {
            0.3
        };

        // --- Factor 2: EMA alignment ---
        let fully_aligned = (r.ema_short > r.ema_medium && r.ema_medium > r.ema_long)
            || (r.ema_short < r.ema_medium && r.ema_medium < r.ema_long);
        let partially_aligned = r.ema_short > r.ema_medium || r.ema_medium > r.ema_long;
        let ema_factor = if fully_aligned {
            0.8
        } else if partially_aligned {
            0.5
        } else {
            0.3
        };

        // --- Factor 3: Volume participation ---
        let volume_factor = r.volume_ratio.map_or(0.5, |ratio| (ratio / 2.0).min(1.0));

        // --- Factor 4: Volatility, peaking at the sweet spot ---
        let volatility_factor = if volatility_pct < VOLATILITY_SWEET_SPOT {
            volatility_pct.max(0.0) / VOLATILITY_SWEET_SPOT
        } else {
            (1.0 - (volatility_pct - VOLATILITY_SWEET_SPOT) / 2.0).max(0.0)
        };

        // --- Factor 5: Proximity to the Bollinger bands ---
        let position = r.bollinger_position();
        let bollinger_factor = if !(0.2..=0.8).contains(&position) { 0.8 } else { 0.4 };

        let score = rsi_factor.clamp(0.0, 1.0) * W_RSI
            + ema_factor * W_EMA
            + volume_factor * W_VOLUME
            + volatility_factor * W_VOLATILITY
            + bollinger_factor * W_BOLLINGER;

        score.clamp(0.0, 1.0)
    }

    /// Trend/momentum direction, before the confidence threshold is applied.
    pub fn direction(&self, r: &IndicatorReadings) -> Direction {
        let bullish = r.ema_short > r.ema_medium && r.macd_histogram > 0.0;
        let bearish = r.ema_short < r.ema_medium && r.macd_histogram < 0.0;

        if !self.settings.trend_filters {
            return if bullish {
                Direction::Long
            } else if bearish {
                Direction::Short
            } else {
                Direction::Flat
            };
        }

        let volume_ok = r.volume_ratio.is_none_or(|v| v > self.settings.volume_threshold);

        if bullish
            && volume_ok
            && r.rsi > self.settings.rsi_oversold
            && r.rsi < RSI_LONG_CEILING
            && r.close > r.ema_long
        {
            Direction::Long
        } else if bearish
            && volume_ok
            && r.rsi < self.settings.rsi_overbought
            && r.rsi > RSI_SHORT_FLOOR
            && r.close < r.ema_long
        {
            Direction::Short
        } else {
            Direction::Flat
        }
    }
}

impl ConfidenceScorer for IndicatorScorer {
    fn name(&self) -> &'static str {
        "IndicatorScorer"
    }

    fn score(&self, snapshot: &MarketSnapshot) -> ConfidenceSignal {
        if snapshot.recent_closes.len() < self.settings.min_samples {
            tracing::debug!(
                samples = snapshot.recent_closes.len(),
                required = self.settings.min_samples,
                "Not enough history to score. Returning flat signal."
            );
            return ConfidenceSignal::flat();
        }

        let closes = snapshot.closes_f64();
        let volumes = snapshot.volumes_f64();
        let readings = match self.readings(&closes, &volumes) {
            Ok(Some(readings)) => readings,
            Ok(None) => return ConfidenceSignal::flat(),
            Err(e) => {
                tracing::error!(error = %e, "Indicator computation failed. Returning flat signal.");
                return ConfidenceSignal::flat();
            }
        };

        let score = self.weighted_score(&readings, snapshot.volatility_estimate);
        let direction = if score < self.settings.min_confidence {
            Direction::Flat
        } else {
            self.direction(&readings)
        };

        tracing::debug!(
            score,
            ?direction,
            rsi = readings.rsi,
            macd_hist = readings.macd_histogram,
            "Snapshot scored."
        );

        ConfidenceSignal::new(score, direction)
    }
}

/// Current volume divided by the mean of the trailing `window` volumes
/// (current bar included).
fn volume_ratio(volumes: &[f64], window: usize) -> Option<f64> {
    if window == 0 || volumes.len() < window {
        return None;
    }
    let tail = &volumes[volumes.len() - window..];
    let mean = tail.iter().sum::<f64>() / window as f64;
    let current = *tail.last()?;
    (mean > 0.0).then(|| current / mean)
}
