// In crates/risk/src/deriver.rs

use crate::types::RiskSettings;
use crate::{Error, Result};
use core_types::{ConfidenceSignal, RiskParameters};
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Maps confidence and volatility onto leverage and exit distances.
///
/// Leverage grows linearly with confidence and take-profit grows linearly
/// with normalized volatility, each clamped to its configured band. The
/// stop-loss distance is fixed.
#[derive(Debug, Clone)]
pub struct RiskParameterDeriver {
    min_leverage: u8,
    max_leverage: u8,
    leverage_step: u8,
    min_take_profit: Decimal,
    max_take_profit: Decimal,
    stop_loss: Decimal,
    volatility_ceiling: f64,
}

impl RiskParameterDeriver {
    /// Creates a deriver from validated bounds.
    ///
    /// # Returns
    ///
    /// `Err(Error::InvalidParameters)` when a lower bound exceeds its upper
    /// bound, the leverage step or minimum leverage is zero, the stop-loss is
    /// not positive, or the volatility ceiling is not a positive number.
    pub fn new(settings: &RiskSettings) -> Result<Self> {
        if settings.min_leverage == 0 {
            return Err(Error::InvalidParameters("min_leverage must be at least 1".into()));
        }
        if settings.min_leverage > settings.max_leverage {
            return Err(Error::InvalidParameters(format!(
                "min_leverage ({}) exceeds max_leverage ({})",
                settings.min_leverage, settings.max_leverage
            )));
        }
        if settings.leverage_step == 0 {
            return Err(Error::InvalidParameters("leverage_step must be at least 1".into()));
        }
        if settings.min_take_profit_percentage <= Decimal::ZERO
            || settings.min_take_profit_percentage > settings.max_take_profit_percentage
        {
            return Err(Error::InvalidParameters(format!(
                "take-profit band [{}, {}] is invalid",
                settings.min_take_profit_percentage, settings.max_take_profit_percentage
            )));
        }
        if settings.stop_loss_percentage <= Decimal::ZERO {
            return Err(Error::InvalidParameters("stop_loss_percentage must be positive".into()));
        }
        if !(settings.volatility_ceiling_pct.is_finite() && settings.volatility_ceiling_pct > 0.0) {
            return Err(Error::InvalidParameters(
                "volatility_ceiling_pct must be a positive number".into(),
            ));
        }

        Ok(Self {
            min_leverage: settings.min_leverage,
            max_leverage: settings.max_leverage,
            leverage_step: settings.leverage_step,
            min_take_profit: settings.min_take_profit_percentage,
            max_take_profit: settings.max_take_profit_percentage,
            stop_loss: settings.stop_loss_percentage,
            volatility_ceiling: settings.volatility_ceiling_pct,
        })
    }

    /// Derives the full parameter set for a prospective entry.
    pub fn derive(&self, signal: &ConfidenceSignal, volatility_pct: f64) -> RiskParameters {
        let params = RiskParameters {
            leverage: self.leverage_for(signal.score),
            take_profit_pct: self.take_profit_for(volatility_pct),
            stop_loss_pct: self.stop_loss,
        };
        tracing::debug!(
            score = signal.score,
            volatility_pct,
            leverage = params.leverage,
            take_profit_pct = %params.take_profit_pct,
            "Risk parameters derived."
        );
        params
    }

    /// `min + (max - min) * score`, rounded to the leverage step (ties to
    /// even) and clamped to the configured band.
    pub fn leverage_for(&self, score: f64) -> u8 {
        let score = clamp_unit(score);
        let min = Decimal::from(self.min_leverage);
        let max = Decimal::from(self.max_leverage);
        let step = Decimal::from(self.leverage_step);
        let score = Decimal::from_f64(score).unwrap_or(Decimal::ZERO);

        let raw = min + (max - min) * score;
        let stepped = (raw / step).round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven) * step;

        stepped.clamp(min, max).to_u8().unwrap_or(self.min_leverage)
    }

    /// `min + (max - min) * normalized_volatility`, clamped to the band.
    pub fn take_profit_for(&self, volatility_pct: f64) -> Decimal {
        let normalized = Decimal::from_f64(self.normalized_volatility(volatility_pct))
            .unwrap_or(Decimal::ZERO);
        let tp = self.min_take_profit + (self.max_take_profit - self.min_take_profit) * normalized;
        tp.clamp(self.min_take_profit, self.max_take_profit)
    }

    /// Volatility scaled against the ceiling into [0, 1].
    pub fn normalized_volatility(&self, volatility_pct: f64) -> f64 {
        clamp_unit(volatility_pct / self.volatility_ceiling)
    }

    pub fn stop_loss_pct(&self) -> Decimal {
        self.stop_loss
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Direction;
    use rust_decimal_macros::dec;

    fn deriver() -> RiskParameterDeriver {
        RiskParameterDeriver::new(&RiskSettings::default()).unwrap()
    }

    #[test]
    fn high_confidence_moderate_volatility() {
        // 5 + 15 * 0.9 = 18.5, which rounds to the even 18.
        let signal = ConfidenceSignal::new(0.9, Direction::Long);
        let params = deriver().derive(&signal, 1.0);
        assert_eq!(params.leverage, 18);
        assert_eq!(params.take_profit_pct, dec!(7));
        assert_eq!(params.stop_loss_pct, dec!(3));
    }

    #[test]
    fn leverage_is_monotonic_and_bounded() {
        let d = deriver();
        let mut previous = 0u8;
        for i in 0..=1000 {
            let leverage = d.leverage_for(i as f64 / 1000.0);
            assert!((5..=20).contains(&leverage));
            assert!(leverage >= previous, "leverage dropped at step {i}");
            previous = leverage;
        }
        assert_eq!(d.leverage_for(0.0), 5);
        assert_eq!(d.leverage_for(1.0), 20);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let d = deriver();
        assert_eq!(d.leverage_for(-3.0), 5);
        assert_eq!(d.leverage_for(7.0), 20);
        assert_eq!(d.leverage_for(f64::NAN), 5);
    }

    #[test]
    fn take_profit_stays_in_band() {
        let d = deriver();
        for vol in [-1.0, 0.0, 0.3, 1.99, 2.0, 50.0, f64::INFINITY, f64::NAN] {
            let tp = d.take_profit_for(vol);
            assert!(tp >= dec!(6) && tp <= dec!(8), "tp {tp} out of band for vol {vol}");
        }
        assert_eq!(d.take_profit_for(0.0), dec!(6));
        assert_eq!(d.take_profit_for(10.0), dec!(8));
    }

    #[test]
    fn coarse_leverage_step() {
        let settings = RiskSettings { leverage_step: 5, ..RiskSettings::default() };
        let d = RiskParameterDeriver::new(&settings).unwrap();
        // 12.5 / 5 = 2.5 -> 2 -> 10
        assert_eq!(d.leverage_for(0.5), 10);
        assert_eq!(d.leverage_for(1.0), 20);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let settings = RiskSettings { min_leverage: 25, ..RiskSettings::default() };
        assert!(matches!(RiskParameterDeriver::new(&settings), Err(Error::InvalidParameters(_))));

        let settings = RiskSettings {
            min_take_profit_percentage: dec!(9),
            ..RiskSettings::default()
        };
        assert!(RiskParameterDeriver::new(&settings).is_err());

        let settings = RiskSettings { leverage_step: 0, ..RiskSettings::default() };
        assert!(RiskParameterDeriver::new(&settings).is_err());
    }
}
