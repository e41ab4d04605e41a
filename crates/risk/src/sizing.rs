// In crates/risk/src/sizing.rs

use crate::governor::SessionRiskState;
use crate::types::RiskSettings;
use crate::{Error, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Margin and quantity for a new entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizedEntry {
    /// Quote-currency margin committed.
    pub margin: Decimal,
    /// Base-asset units: `margin * leverage / price`.
    pub quantity: Decimal,
}

/// Fixed-fraction sizing, scaled down while the session is in drawdown or
/// has used part of its daily trade allowance.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    position_size_pct: Decimal,
    max_drawdown_pct: Decimal,
    max_daily_trades: u32,
}

impl PositionSizer {
    pub fn new(settings: &RiskSettings) -> Self {
        Self {
            position_size_pct: settings.position_size_percentage,
            max_drawdown_pct: settings.max_drawdown_percentage,
            max_daily_trades: settings.max_daily_trades,
        }
    }

    /// Sizes an entry.
    ///
    /// # Arguments
    ///
    /// * `equity`: Current account equity in quote currency.
    /// * `price`: Expected entry price.
    /// * `leverage`: Leverage chosen by the deriver.
    /// * `session`: Current session risk state, used for the scaling factors.
    pub fn size(
        &self,
        equity: Decimal,
        price: Decimal,
        leverage: u8,
        session: &SessionRiskState,
    ) -> Result<SizedEntry> {
        if equity <= Decimal::ZERO {
            return Err(Error::Vetoed { reason: format!("no equity available ({equity})") });
        }
        if price <= Decimal::ZERO || leverage == 0 {
            return Err(Error::InvalidParameters(format!(
                "cannot size at price {price} with leverage {leverage}"
            )));
        }

        // --- Base fraction of equity ---
        let mut margin = equity * self.position_size_pct / dec!(100);

        // --- Step 1: Shrink while in drawdown, never below half ---
        if session.current_drawdown_pct > Decimal::ZERO && self.max_drawdown_pct > Decimal::ZERO {
            let factor = (Decimal::ONE - session.current_drawdown_pct / self.max_drawdown_pct).max(dec!(0.5));
            margin *= factor;
        }

        // --- Step 2: Shrink as the daily allowance is used up ---
        if self.max_daily_trades > 0 {
            let used = Decimal::from(session.trades_today.min(self.max_daily_trades))
                / Decimal::from(self.max_daily_trades);
            margin *= Decimal::ONE - used * dec!(0.5);
        }

        let margin = margin.round_dp(8);
        let quantity = (margin * Decimal::from(leverage) / price).round_dp(8);

        Ok(SizedEntry { margin, quantity })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn session() -> SessionRiskState {
        SessionRiskState::new(dec!(10000), NaiveDate::from_ymd_opt(2026, 1, 5).unwrap())
    }

    #[test]
    fn fresh_session_uses_full_fraction() {
        let sizer = PositionSizer::new(&RiskSettings::default());
        let sized = sizer.size(dec!(10000), dec!(50000), 10, &session()).unwrap();
        assert_eq!(sized.margin, dec!(2500));
        assert_eq!(sized.quantity, dec!(0.5));
    }

    #[test]
    fn drawdown_and_trade_usage_shrink_margin() {
        let sizer = PositionSizer::new(&RiskSettings::default());
        let mut state = session();
        state.current_drawdown_pct = dec!(7.5);
        state.trades_today = 2;
        let sized = sizer.size(dec!(10000), dec!(100), 5, &state).unwrap();
        // 2500 * 0.5 * 0.8
        assert_eq!(sized.margin, dec!(1000));
        assert_eq!(sized.quantity, dec!(50));
    }

    #[test]
    fn deep_drawdown_floors_at_half() {
        let sizer = PositionSizer::new(&RiskSettings::default());
        let mut state = session();
        state.current_drawdown_pct = dec!(14);
        let sized = sizer.size(dec!(10000), dec!(100), 5, &state).unwrap();
        assert_eq!(sized.margin, dec!(1250));
    }

    #[test]
    fn empty_account_is_vetoed() {
        let sizer = PositionSizer::new(&RiskSettings::default());
        assert!(matches!(
            sizer.size(Decimal::ZERO, dec!(100), 5, &session()),
            Err(Error::Vetoed { .. })
        ));
    }
}
