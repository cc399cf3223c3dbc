//! Rolling performance metrics over a window of closed trades
//!
//! Everything here is a pure function of its inputs. The only value carried
//! between calls is the previous Sharpe ratio, which is kept when the window
//! has too few daily returns to estimate a new one.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{DailyReturn, PerformanceSnapshot, TradeRecord};

/// Trading days per year used to annualize the Sharpe ratio
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Standard deviations below this are treated as zero
const MIN_STD_DEV: f64 = 1e-12;

pub struct MetricsAggregator;

impl MetricsAggregator {
    /// Compute a fresh snapshot from `window`.
    ///
    /// `previous_sharpe` is returned unchanged when fewer than two daily
    /// returns exist or their dispersion is zero.
    pub fn compute(
        window: &[TradeRecord],
        initial_capital: Decimal,
        current_capital: Decimal,
        previous_sharpe: f64,
    ) -> PerformanceSnapshot {
        let daily_returns = Self::daily_returns(window, initial_capital);

        let sharpe_ratio = match Self::sharpe_ratio(&daily_returns) {
            Some(sharpe) => sharpe,
            None => {
                debug!(
                    days = daily_returns.len(),
                    previous = previous_sharpe,
                    "Not enough daily returns for Sharpe, keeping previous value"
                );
                previous_sharpe
            }
        };

        PerformanceSnapshot {
            win_rate: Self::win_rate(window),
            profit_factor: Self::profit_factor(window),
            sharpe_ratio,
            max_drawdown: Self::max_drawdown(&daily_returns),
            current_capital,
            trades_in_window: window.len(),
            daily_returns,
        }
    }

    /// Share of closed trades with strictly positive PnL; 0 for an empty window
    pub fn win_rate(window: &[TradeRecord]) -> f64 {
        let closed = window.iter().filter(|t| t.is_closed()).count();
        if closed == 0 {
            return 0.0;
        }
        let wins = window.iter().filter(|t| t.is_win()).count();
        wins as f64 / closed as f64
    }

    /// Gross profit / gross loss.
    ///
    /// +infinity when there are profits but no losses, 0 when there are
    /// neither. A ratio beyond the decimal range is taken in f64 instead.
    pub fn profit_factor(window: &[TradeRecord]) -> f64 {
        let profits: Vec<Decimal> = window
            .iter()
            .filter_map(|t| t.pnl)
            .filter(|p| *p > Decimal::ZERO)
            .collect();
        let losses: Vec<Decimal> = window
            .iter()
            .filter_map(|t| t.pnl)
            .filter(|p| *p < Decimal::ZERO)
            .map(|p| p.abs())
            .collect();

        if losses.is_empty() {
            return if profits.is_empty() { 0.0 } else { f64::INFINITY };
        }

        checked_sum(&profits)
            .zip(checked_sum(&losses))
            .and_then(|(gross_profit, gross_loss)| gross_profit.checked_div(gross_loss))
            .map(to_f64)
            .unwrap_or_else(|| sum_f64(&profits) / sum_f64(&losses))
    }

    /// PnL summed per UTC calendar day of exit, divided by initial capital.
    ///
    /// Days without a closed trade do not appear at all; they are not
    /// zero-filled.
    pub fn daily_returns(window: &[TradeRecord], initial_capital: Decimal) -> Vec<DailyReturn> {
        if initial_capital.is_zero() {
            return Vec::new();
        }

        let mut by_day: BTreeMap<NaiveDate, Vec<Decimal>> = BTreeMap::new();
        for trade in window {
            if let (Some(exit_time), Some(pnl)) = (trade.exit_time, trade.pnl) {
                by_day.entry(exit_time.date_naive()).or_default().push(pnl);
            }
        }

        by_day
            .into_iter()
            .map(|(date, pnls)| DailyReturn {
                date,
                value: checked_sum(&pnls)
                    .and_then(|pnl| pnl.checked_div(initial_capital))
                    .map(to_f64)
                    .unwrap_or_else(|| sum_f64(&pnls) / to_f64(initial_capital)),
            })
            .collect()
    }

    /// Annualized Sharpe: sqrt(252) * mean / sample std dev.
    /// `None` with fewer than two points or zero dispersion.
    pub fn sharpe_ratio(returns: &[DailyReturn]) -> Option<f64> {
        if returns.len() < 2 {
            return None;
        }

        let n = returns.len() as f64;
        let mean = returns.iter().map(|r| r.value).sum::<f64>() / n;
        let variance = returns
            .iter()
            .map(|r| (r.value - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        let std_dev = variance.sqrt();

        if !(std_dev > MIN_STD_DEV) {
            return None;
        }

        Some(TRADING_DAYS_PER_YEAR.sqrt() * mean / std_dev)
    }

    /// Largest relative decline of the compounded return curve from its
    /// running peak. The peak starts at the first compounded value.
    pub fn max_drawdown(returns: &[DailyReturn]) -> f64 {
        let mut cumulative = 1.0;
        let mut peak: Option<f64> = None;
        let mut max_drawdown = 0.0f64;

        for r in returns {
            cumulative *= 1.0 + r.value;
            let running_peak = peak.map_or(cumulative, |p: f64| p.max(cumulative));
            peak = Some(running_peak);

            if running_peak > 0.0 {
                let drawdown = 1.0 - cumulative / running_peak;
                max_drawdown = max_drawdown.max(drawdown);
            }
        }

        max_drawdown
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

/// `None` if the sum leaves the decimal range
fn checked_sum(values: &[Decimal]) -> Option<Decimal> {
    values
        .iter()
        .try_fold(Decimal::ZERO, |acc, v| acc.checked_add(*v))
}

fn sum_f64(values: &[Decimal]) -> f64 {
    values.iter().copied().map(to_f64).sum()
}
