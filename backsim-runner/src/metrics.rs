//! Performance metrics — pure functions that compute run statistics.
//!
//! Every metric is a pure function of the closed-trade PnL list and/or the
//! closed-trade equity curve. No dependencies on the runner or data pipeline.

use serde::{Deserialize, Serialize};

use backsim_core::engine::RunResult;
use backsim_core::precision::round_to;

/// Aggregate performance metrics for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    /// Percent change of equity over the run (closed trades only).
    pub gains_pct: f64,
    pub total_pnl: f64,
    pub fees_paid: f64,
    pub final_equity: f64,
    /// Largest peak-to-trough fall of the closed-trade equity curve, as a fraction.
    pub max_drawdown: f64,
    /// `None` when no trade lost money.
    pub profit_factor: Option<f64>,
    /// R² of cumulative PnL against trade number; negative when the run lost money.
    pub to_the_upside: f64,
}

impl PerformanceMetrics {
    pub fn compute(result: &RunResult, initial_equity: f64) -> Self {
        let pnls = result.trade_pnls();
        let curve = equity_curve(initial_equity, &pnls);
        let final_equity = result.account.equity;
        let gains = gains_pct(initial_equity, final_equity);
        Self {
            total_trades: pnls.len(),
            wins: pnls.iter().filter(|&&p| p > 0.0).count(),
            losses: pnls.iter().filter(|&&p| p <= 0.0).count(),
            win_rate: win_rate(&pnls),
            gains_pct: gains,
            total_pnl: result.account.realized_pnl,
            fees_paid: result.account.fees_paid,
            final_equity,
            max_drawdown: max_drawdown(&curve),
            profit_factor: profit_factor(&pnls),
            to_the_upside: to_the_upside(&pnls, gains),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Equity after each closed trade, starting with `initial`.
pub fn equity_curve(initial: f64, pnls: &[f64]) -> Vec<f64> {
    std::iter::once(initial)
        .chain(pnls.iter().scan(initial, |eq, p| {
            *eq += p;
            Some(*eq)
        }))
        .collect()
}

pub fn gains_pct(initial: f64, final_equity: f64) -> f64 {
    if initial <= 0.0 {
        return 0.0;
    }
    round_to((final_equity - initial) / initial * 100.0, 3)
}

/// Fraction of trades with strictly positive PnL. 0 with no trades.
pub fn win_rate(pnls: &[f64]) -> f64 {
    if pnls.is_empty() {
        return 0.0;
    }
    let wins = pnls.iter().filter(|&&p| p > 0.0).count();
    round_to(wins as f64 / pnls.len() as f64, 3)
}

/// Maximum drawdown as a positive fraction of the running peak.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &eq in curve {
        peak = peak.max(eq);
        if peak > 0.0 {
            worst = worst.max((peak - eq) / peak);
        }
    }
    round_to(worst, 3)
}

/// Gross profit over gross loss. Undefined with no losing trades.
pub fn profit_factor(pnls: &[f64]) -> Option<f64> {
    let gross_profit: f64 = pnls.iter().filter(|&&p| p > 0.0).sum();
    let gross_loss: f64 = pnls.iter().filter(|&&p| p < 0.0).map(|p| -p).sum();
    (gross_loss > 0.0).then(|| round_to(gross_profit / gross_loss, 3))
}

/// Linearity of the cumulative PnL curve.
///
/// R² of a least-squares line through (trade number, cumulative PnL), signed
/// by the run's gains: a smooth climb scores near 1, a smooth decline near -1,
/// a choppy curve near 0.
pub fn to_the_upside(pnls: &[f64], gains_pct: f64) -> f64 {
    if pnls.len() < 2 {
        return 0.0;
    }
    let ys: Vec<f64> = pnls
        .iter()
        .scan(0.0, |acc, p| {
            *acc += p;
            Some(*acc)
        })
        .collect();
    let n = ys.len() as f64;
    let mean_x = (n + 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = (i + 1) as f64 - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return 0.0;
    }
    let r2 = round_to(sxy * sxy / (sxx * syy), 3);
    if gains_pct <= 0.0 {
        -r2
    } else {
        r2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curve_accumulates() {
        assert_eq!(equity_curve(100.0, &[10.0, -5.0]), vec![100.0, 110.0, 105.0]);
        assert_eq!(equity_curve(100.0, &[]), vec![100.0]);
    }

    #[test]
    fn gains_and_win_rate() {
        assert_eq!(gains_pct(1000.0, 1100.0), 10.0);
        assert_eq!(gains_pct(1000.0, 900.0), -10.0);
        assert_eq!(win_rate(&[1.0, -1.0, 2.0, 0.0]), 0.5);
        assert_eq!(win_rate(&[]), 0.0);
    }

    #[test]
    fn drawdown_from_peak() {
        assert_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0]), 0.25);
        assert_eq!(max_drawdown(&[100.0, 110.0]), 0.0);
    }

    #[test]
    fn profit_factor_edges() {
        assert_eq!(profit_factor(&[10.0, -5.0]), Some(2.0));
        assert_eq!(profit_factor(&[10.0]), None);
        assert_eq!(profit_factor(&[]), None);
    }

    #[test]
    fn straight_line_is_fully_upside() {
        assert_eq!(to_the_upside(&[1.0, 1.0, 1.0, 1.0], 4.0), 1.0);
        assert_eq!(to_the_upside(&[-1.0, -1.0, -1.0], -3.0), -1.0);
        assert_eq!(to_the_upside(&[5.0], 5.0), 0.0);
    }

    #[test]
    fn choppy_curve_scores_lower() {
        let choppy = to_the_upside(&[5.0, -5.0, 5.0, -5.0, 5.0, -4.0], 0.1);
        assert!(choppy < 0.5, "{choppy}");
    }
}
