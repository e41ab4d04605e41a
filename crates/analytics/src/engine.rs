// In crates/analytics/src/engine.rs

use crate::types::{EquityPoint, PerformanceReport};
use core_types::TradeRecord;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;

/// The engine responsible for calculating performance metrics from trade data.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsEngine;

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self
    }

    /// Builds the realized equity curve: the starting capital, then one point
    /// per trade in close order.
    pub fn equity_curve(&self, initial_capital: Decimal, trades: &[TradeRecord]) -> Vec<EquityPoint> {
        let mut equity = initial_capital;
        let mut curve = Vec::with_capacity(trades.len() + 1);
        if let Some(first) = trades.first() {
            curve.push(EquityPoint { timestamp: first.opened_at, value: equity });
        }
        for trade in trades {
            equity += trade.pnl;
            curve.push(EquityPoint { timestamp: trade.closed_at, value: equity });
        }
        curve
    }

    /// Calculates a performance report from the session's closed trades.
    ///
    /// # Arguments
    ///
    /// * `initial_capital`: Equity at session start, the base for percentages.
    /// * `trades`: Closed trades, oldest first.
    pub fn calculate(&self, initial_capital: Decimal, trades: &[TradeRecord]) -> PerformanceReport {
        let mut report = PerformanceReport::new();
        if trades.is_empty() {
            return report;
        }

        // --- Counts and totals ---
        report.total_trades = trades.len() as u32;
        report.net_pnl_absolute = trades.iter().map(|t| t.pnl).sum();
        report.total_fees = trades.iter().map(|t| t.fees).sum();
        if initial_capital > dec!(0) {
            report.net_pnl_percentage =
                (report.net_pnl_absolute / initial_capital).to_f64().unwrap_or(0.0) * 100.0;
        }

        // --- Win rate and profit factor ---
        let gross_profit: Decimal = trades.iter().filter(|t| t.pnl > dec!(0)).map(|t| t.pnl).sum();
        let gross_loss: Decimal = trades.iter().filter(|t| t.pnl < dec!(0)).map(|t| t.pnl).sum::<Decimal>().abs();
        report.winning_trades = trades.iter().filter(|t| t.pnl > dec!(0)).count() as u32;
        report.losing_trades = trades.iter().filter(|t| t.pnl < dec!(0)).count() as u32;
        report.win_rate = report.winning_trades as f64 / report.total_trades as f64 * 100.0;
        report.profit_factor = if gross_loss > dec!(0) {
            (gross_profit / gross_loss).to_f64()
        } else {
            None
        };

        // --- Max drawdown on the realized equity curve ---
        let mut peak_equity = initial_capital;
        let mut max_drawdown = dec!(0);
        let mut max_drawdown_pct = 0.0;
        for point in self.equity_curve(initial_capital, trades) {
            peak_equity = peak_equity.max(point.value);
            let drawdown = peak_equity - point.value;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                if peak_equity > dec!(0) {
                    max_drawdown_pct = (drawdown / peak_equity).to_f64().unwrap_or(0.0) * 100.0;
                }
            }
        }
        report.max_drawdown_absolute = max_drawdown;
        report.max_drawdown_percentage = max_drawdown_pct;

        // --- Per-trade averages ---
        let n = Decimal::from(trades.len());
        report.expectancy = (report.net_pnl_absolute / n).round_dp(8);
        report.best_trade = trades.iter().map(|t| t.pnl).max().unwrap_or_default();
        report.worst_trade = trades.iter().map(|t| t.pnl).min().unwrap_or_default();
        report.avg_roi_pct =
            trades.iter().map(|t| t.roi_pct.to_f64().unwrap_or(0.0)).sum::<f64>() / trades.len() as f64;
        let total_duration_secs: i64 = trades.iter().map(|t| (t.closed_at - t.opened_at).num_seconds()).sum();
        report.avg_trade_duration_secs = total_duration_secs as f64 / trades.len() as f64;

        // --- Breakdown by exit reason ---
        for trade in trades {
            let entry = report.by_exit_reason.entry(trade.reason.to_string()).or_default();
            entry.trades += 1;
            entry.net_pnl += trade.pnl;
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use core_types::{Direction, ExitReason, PositionId, Symbol};

    fn trade(id: u64, pnl: Decimal, reason: ExitReason) -> TradeRecord {
        let opened_at = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap() + Duration::hours(id as i64);
        TradeRecord {
            position_id: PositionId(id),
            symbol: Symbol("BTC/USDT".into()),
            direction: Direction::Long,
            entry_price: dec!(100),
            exit_price: dec!(100),
            quantity: dec!(1),
            size: dec!(100),
            leverage: 10,
            fees: dec!(1),
            pnl,
            roi_pct: pnl,
            reason,
            opened_at,
            closed_at: opened_at + Duration::minutes(30),
        }
    }

    #[test]
    fn empty_session_reports_zeroes() {
        let report = AnalyticsEngine::new().calculate(dec!(1000), &[]);
        assert_eq!(report, PerformanceReport::default());
    }

    #[test]
    fn mixed_session_metrics() {
        let trades = vec![
            trade(1, dec!(50), ExitReason::TakeProfit),
            trade(2, dec!(-20), ExitReason::StopLoss),
            trade(3, dec!(-10), ExitReason::StopLoss),
            trade(4, dec!(40), ExitReason::TakeProfit),
        ];
        let report = AnalyticsEngine::new().calculate(dec!(1000), &trades);

        assert_eq!(report.total_trades, 4);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.net_pnl_absolute, dec!(60));
        assert_eq!(report.total_fees, dec!(4));
        assert!((report.net_pnl_percentage - 6.0).abs() < 1e-9);
        assert!((report.win_rate - 50.0).abs() < 1e-9);
        assert_eq!(report.profit_factor, Some(3.0));
        // Peak 1050 after trade 1, trough 1020 after trade 3.
        assert_eq!(report.max_drawdown_absolute, dec!(30));
        assert_eq!(report.expectancy, dec!(15));
        assert_eq!(report.best_trade, dec!(50));
        assert_eq!(report.worst_trade, dec!(-20));
        assert!((report.avg_trade_duration_secs - 1800.0).abs() < 1e-9);
        assert_eq!(report.by_exit_reason["Stop Loss"].trades, 2);
        assert_eq!(report.by_exit_reason["Take Profit"].net_pnl, dec!(90));
    }

    #[test]
    fn no_losses_means_no_profit_factor() {
        let report = AnalyticsEngine::new().calculate(dec!(1000), &[trade(1, dec!(5), ExitReason::TimeExit)]);
        assert_eq!(report.profit_factor, None);
        assert_eq!(report.max_drawdown_absolute, dec!(0));
    }

    #[test]
    fn equity_curve_accumulates() {
        let trades = [trade(1, dec!(10), ExitReason::Manual), trade(2, dec!(-4), ExitReason::Manual)];
        let curve = AnalyticsEngine::new().equity_curve(dec!(100), &trades);
        let values: Vec<Decimal> = curve.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![dec!(100), dec!(110), dec!(106)]);
    }
}
