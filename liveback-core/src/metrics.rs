//! Performance summary: pure functions over the equity curve, fills and the
//! closed-trade log.

use crate::domain::{ClosedTrade, EquityPoint, Fill};
use serde::{Deserialize, Serialize};

const PERIODS_PER_YEAR: f64 = 252.0;
const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub initial_equity: f64,
    pub final_equity: f64,
    /// Percent, e.g. -0.02 for a 2 bp loss.
    pub total_return_pct: f64,
    /// Percent, non-positive.
    pub max_drawdown_pct: f64,
    /// Annualised over 252 periods, zero risk-free rate.
    pub sharpe: f64,
    pub fill_count: usize,
    pub total_fees: f64,
    pub realized_pnl: f64,
    pub rejection_count: usize,
    /// Closing fills in the trade log.
    pub trade_count: usize,
    /// Percent of closed trades with positive net PnL.
    pub win_rate_pct: f64,
    /// Gross profit over gross loss. `None` when there are profits and no
    /// losses; 0.0 when nothing was closed.
    pub profit_factor: Option<f64>,
    pub avg_trade_pnl: f64,
    /// Compound annual growth, percent. 0.0 for curves shorter than a day.
    pub annualized_return_pct: f64,
    pub duration_days: f64,
}

impl PerformanceSummary {
    pub fn compute(
        initial_equity: f64,
        curve: &[EquityPoint],
        fills: &[Fill],
        trades: &[ClosedTrade],
        realized_pnl: f64,
        rejection_count: usize,
    ) -> Self {
        let equity: Vec<f64> = curve.iter().map(|p| p.equity).collect();
        let final_equity = equity.last().copied().unwrap_or(initial_equity);
        let total_return_pct = if initial_equity > 0.0 {
            (final_equity - initial_equity) / initial_equity * 100.0
        } else {
            0.0
        };
        let duration_days = duration_days(curve);
        let trade_pnl: Vec<f64> = trades.iter().map(ClosedTrade::net_pnl).collect();

        Self {
            initial_equity,
            final_equity,
            total_return_pct,
            max_drawdown_pct: max_drawdown(&equity) * 100.0,
            sharpe: sharpe_ratio(&equity),
            fill_count: fills.len(),
            total_fees: fills.iter().map(|f| f.fees).sum(),
            realized_pnl,
            rejection_count,
            trade_count: trades.len(),
            win_rate_pct: win_rate(&trade_pnl) * 100.0,
            profit_factor: profit_factor(&trade_pnl),
            avg_trade_pnl: if trade_pnl.is_empty() {
                0.0
            } else {
                trade_pnl.iter().sum::<f64>() / trade_pnl.len() as f64
            },
            annualized_return_pct: annualized_return(initial_equity, final_equity, duration_days)
                * 100.0,
            duration_days,
        }
    }
}

/// Calendar days between the first and last equity points.
pub fn duration_days(curve: &[EquityPoint]) -> f64 {
    match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => {
            let span = last.timestamp - first.timestamp;
            span.num_milliseconds() as f64 / 86_400_000.0
        }
        _ => 0.0,
    }
}

/// Compound annual growth rate as a fraction.
pub fn annualized_return(initial: f64, last: f64, days: f64) -> f64 {
    let years = days / DAYS_PER_YEAR;
    if years <= 0.0 || initial <= 0.0 {
        return 0.0;
    }
    if last <= 0.0 {
        return -1.0;
    }
    (last / initial).powf(1.0 / years) - 1.0
}

/// Fraction of trades with positive PnL.
pub fn win_rate(trade_pnl: &[f64]) -> f64 {
    if trade_pnl.is_empty() {
        return 0.0;
    }
    trade_pnl.iter().filter(|&&p| p > 0.0).count() as f64 / trade_pnl.len() as f64
}

/// Gross profit over absolute gross loss.
pub fn profit_factor(trade_pnl: &[f64]) -> Option<f64> {
    let gross_profit: f64 = trade_pnl.iter().filter(|&&p| p > 0.0).sum();
    let gross_loss: f64 = trade_pnl.iter().filter(|&&p| p < 0.0).map(|p| -p).sum();
    if gross_loss > 0.0 {
        Some(gross_profit / gross_loss)
    } else if gross_profit > 0.0 {
        None
    } else {
        Some(0.0)
    }
}

/// Simple period-over-period returns.
pub fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

/// Annualised Sharpe ratio, zero risk-free rate. 0.0 for flat or short curves.
pub fn sharpe_ratio(equity: &[f64]) -> f64 {
    let returns = period_returns(equity);
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    if std < 1e-15 {
        return 0.0;
    }
    mean / std * PERIODS_PER_YEAR.sqrt()
}

/// Maximum drawdown as a non-positive fraction of the running peak.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let Some(&first) = equity.first() else {
        return 0.0;
    };
    let mut peak = first;
    let mut max_dd = 0.0_f64;
    for &eq in equity {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            max_dd = max_dd.min((eq - peak) / peak);
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderSide};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn max_drawdown_known() {
        let eq = vec![100_000.0, 110_000.0, 90_000.0, 95_000.0];
        let expected = (90_000.0 - 110_000.0) / 110_000.0;
        assert!((max_drawdown(&eq) - expected).abs() < 1e-12);
    }

    #[test]
    fn monotonic_curve_has_no_drawdown() {
        let eq: Vec<f64> = (0..50).map(|i| 1_000.0 + i as f64).collect();
        assert_eq!(max_drawdown(&eq), 0.0);
        assert!(sharpe_ratio(&eq) > 0.0);
    }

    #[test]
    fn flat_curve_has_zero_sharpe() {
        assert_eq!(sharpe_ratio(&[100.0; 10]), 0.0);
        assert_eq!(sharpe_ratio(&[]), 0.0);
    }

    #[test]
    fn summary_of_empty_run() {
        let s = PerformanceSummary::compute(1_000.0, &[], &[], &[], 0.0, 0);
        assert_eq!(s.final_equity, 1_000.0);
        assert_eq!(s.total_return_pct, 0.0);
        assert_eq!(s.fill_count, 0);
        assert_eq!(s.trade_count, 0);
        assert_eq!(s.win_rate_pct, 0.0);
        assert_eq!(s.profit_factor, Some(0.0));
        assert_eq!(s.avg_trade_pnl, 0.0);
        assert_eq!(s.annualized_return_pct, 0.0);
        assert_eq!(s.duration_days, 0.0);
    }

    #[test]
    fn win_rate_and_profit_factor() {
        let pnl = [30.0, -10.0, 20.0, -5.0];
        assert!((win_rate(&pnl) - 0.5).abs() < 1e-12);
        let pf = profit_factor(&pnl).unwrap();
        assert!((pf - 50.0 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn profit_factor_without_losses_is_unbounded() {
        assert_eq!(profit_factor(&[5.0, 1.0]), None);
        assert_eq!(profit_factor(&[0.0]), Some(0.0));
        assert_eq!(profit_factor(&[-3.0]), Some(0.0));
    }

    #[test]
    fn annualized_return_over_one_year_is_total_return() {
        let r = annualized_return(1_000.0, 1_100.0, DAYS_PER_YEAR);
        assert!((r - 0.1).abs() < 1e-12);
        // two years of 10% compound to 21%
        let r = annualized_return(1_000.0, 1_210.0, 2.0 * DAYS_PER_YEAR);
        assert!((r - 0.1).abs() < 1e-9);
        assert_eq!(annualized_return(1_000.0, 1_100.0, 0.0), 0.0);
        assert_eq!(annualized_return(1_000.0, 0.0, 10.0), -1.0);
    }

    #[test]
    fn summary_uses_trade_log_and_curve_span() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let curve = vec![
            EquityPoint { timestamp: t0, equity: 1_000.0 },
            EquityPoint { timestamp: t0 + Duration::days(2), equity: 1_010.0 },
        ];
        let closed = |gross: f64, fees: f64| ClosedTrade {
            order_id: OrderId(1),
            symbol: "SPY".into(),
            side: OrderSide::Sell,
            timestamp: t0,
            quantity: 1.0,
            entry_price: 100.0,
            exit_price: 100.0 + gross,
            gross_pnl: gross,
            fees,
        };
        let trades = vec![closed(12.0, 1.0), closed(-3.0, 1.0)];
        let s = PerformanceSummary::compute(1_000.0, &curve, &[], &trades, 9.0, 0);

        assert_eq!(s.trade_count, 2);
        assert!((s.win_rate_pct - 50.0).abs() < 1e-12);
        assert!((s.avg_trade_pnl - 3.5).abs() < 1e-12);
        assert!((s.profit_factor.unwrap() - 11.0 / 4.0).abs() < 1e-12);
        assert!((s.duration_days - 2.0).abs() < 1e-12);
        assert!(s.annualized_return_pct > s.total_return_pct);
    }
}
