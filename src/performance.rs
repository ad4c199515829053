use crate::models::{EquityPoint, PerformanceMetrics, Trade};
use statrs::statistics::Statistics;

/// Pure metrics computation over one equity curve and trade ledger.
/// Every ratio is zero-guarded: when a denominator would be zero (flat
/// curve, no losing trades, no drawdown) the metric is 0.0, never NaN
/// or infinity, so results always sort and serialize cleanly.
pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(
        equity_curve: &[EquityPoint],
        trades: &[Trade],
        initial_capital: f64,
        bars_per_year: f64,
    ) -> PerformanceMetrics {
        let final_equity = equity_curve
            .last()
            .map(|point| point.equity)
            .unwrap_or(initial_capital);
        let profit = final_equity - initial_capital;

        let returns = bar_returns(equity_curve);
        let annualized_return =
            annualized_return(initial_capital, final_equity, equity_curve.len(), bars_per_year);

        let drawdowns = drawdown_series(equity_curve);
        let max_drawdown = drawdowns.iter().copied().fold(0.0_f64, f64::max);
        let (avg_drawdown_duration, max_drawdown_duration) = drawdown_durations(&drawdowns);

        let sharpe_ratio = sharpe(&returns, bars_per_year);
        let sortino_ratio = sortino(&returns, bars_per_year);
        let calmar_ratio = safe_div(annualized_return, max_drawdown);
        let omega_ratio = omega(&returns);

        let ulcer_index = if drawdowns.is_empty() {
            0.0
        } else {
            (drawdowns.iter().map(|d| d * d).sum::<f64>() / drawdowns.len() as f64).sqrt()
        };
        let pain_index = if drawdowns.is_empty() {
            0.0
        } else {
            drawdowns.iter().sum::<f64>() / drawdowns.len() as f64
        };
        let pain_ratio = safe_div(annualized_return, pain_index);

        let total_trades = trades.len();
        let winning: Vec<f64> = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
        let losing: Vec<f64> = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl).collect();
        let winning_trades = winning.len();
        let losing_trades = losing.len();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };
        let avg_win = if winning.is_empty() {
            0.0
        } else {
            winning.iter().sum::<f64>() / winning.len() as f64
        };
        // Average loss magnitude, reported positive.
        let avg_loss = if losing.is_empty() {
            0.0
        } else {
            losing.iter().map(|pnl| pnl.abs()).sum::<f64>() / losing.len() as f64
        };
        let expectancy = win_rate * avg_win - (1.0 - win_rate) * avg_loss;

        PerformanceMetrics {
            profit,
            final_equity,
            annualized_return,
            max_drawdown,
            avg_drawdown_duration,
            max_drawdown_duration,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            omega_ratio,
            ulcer_index,
            pain_index,
            pain_ratio,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            avg_win,
            avg_loss,
            expectancy,
        }
    }
}

fn bar_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .map(|pair| {
            if pair[0].equity > 0.0 {
                pair[1].equity / pair[0].equity - 1.0
            } else {
                0.0
            }
        })
        .collect()
}

fn annualized_return(
    initial_capital: f64,
    final_equity: f64,
    num_bars: usize,
    bars_per_year: f64,
) -> f64 {
    if num_bars < 2 || initial_capital <= 0.0 || final_equity <= 0.0 || bars_per_year <= 0.0 {
        return 0.0;
    }
    let total_return = final_equity / initial_capital;
    let years = (num_bars - 1) as f64 / bars_per_year;
    if years <= 0.0 {
        return 0.0;
    }
    total_return.powf(1.0 / years) - 1.0
}

/// Peak-to-trough decline at each bar as a fraction of the running
/// peak, in [0, 1]. A capped loss means 1.0 even when equity goes
/// negative (a short running away past its entry).
fn drawdown_series(equity_curve: &[EquityPoint]) -> Vec<f64> {
    let mut peak = f64::MIN;
    equity_curve
        .iter()
        .map(|point| {
            peak = peak.max(point.equity);
            if peak > 0.0 {
                ((peak - point.equity) / peak).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// Lengths (in bars) of each stretch spent below the running peak. A
/// drawdown still open at the end of the curve counts at its current
/// length rather than being discarded.
fn drawdown_durations(drawdowns: &[f64]) -> (f64, usize) {
    let mut durations = Vec::new();
    let mut current = 0usize;
    for &depth in drawdowns {
        if depth > 0.0 {
            current += 1;
        } else if current > 0 {
            durations.push(current);
            current = 0;
        }
    }
    if current > 0 {
        durations.push(current);
    }

    if durations.is_empty() {
        return (0.0, 0);
    }
    let max = *durations.iter().max().unwrap_or(&0);
    let avg = durations.iter().sum::<usize>() as f64 / durations.len() as f64;
    (avg, max)
}

fn sharpe(returns: &[f64], bars_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.mean();
    let std = returns.std_dev();
    if std <= 0.0 || !std.is_finite() {
        return 0.0;
    }
    mean / std * bars_per_year.sqrt()
}

fn sortino(returns: &[f64], bars_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = returns.mean();
    let downside_sq: f64 = returns
        .iter()
        .map(|&r| if r < 0.0 { r * r } else { 0.0 })
        .sum::<f64>()
        / returns.len() as f64;
    let downside = downside_sq.sqrt();
    if downside <= 0.0 {
        return 0.0;
    }
    mean / downside * bars_per_year.sqrt()
}

fn omega(returns: &[f64]) -> f64 {
    let gains: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r.abs()).sum();
    safe_div(gains, losses)
}

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() <= f64::EPSILON || !denominator.is_finite() || !numerator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TradeDirection;
    use chrono::{Duration, TimeZone, Utc};

    fn curve(values: &[f64]) -> Vec<EquityPoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &equity)| EquityPoint {
                timestamp: start + Duration::days(i as i64),
                equity,
            })
            .collect()
    }

    fn trade(pnl: f64) -> Trade {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Trade {
            entry_time: start,
            exit_time: start + Duration::days(1),
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            direction: TradeDirection::Long,
            size: 1.0,
            pnl,
            fees: 0.1,
        }
    }

    fn assert_all_finite(metrics: &PerformanceMetrics) {
        for (name, value) in [
            ("profit", metrics.profit),
            ("annualizedReturn", metrics.annualized_return),
            ("maxDrawdown", metrics.max_drawdown),
            ("sharpe", metrics.sharpe_ratio),
            ("sortino", metrics.sortino_ratio),
            ("calmar", metrics.calmar_ratio),
            ("omega", metrics.omega_ratio),
            ("ulcer", metrics.ulcer_index),
            ("pain", metrics.pain_index),
            ("painRatio", metrics.pain_ratio),
            ("winRate", metrics.win_rate),
            ("expectancy", metrics.expectancy),
        ] {
            assert!(value.is_finite(), "{} is not finite: {}", name, value);
        }
    }

    #[test]
    fn flat_curve_yields_zeroed_ratios() {
        let metrics =
            PerformanceCalculator::calculate(&curve(&[1000.0; 10]), &[], 1000.0, 365.0);
        assert_eq!(metrics.profit, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.sortino_ratio, 0.0);
        assert_eq!(metrics.calmar_ratio, 0.0);
        assert_eq!(metrics.omega_ratio, 0.0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_all_finite(&metrics);
    }

    #[test]
    fn degenerate_inputs_stay_finite() {
        // Empty curve, empty trades.
        assert_all_finite(&PerformanceCalculator::calculate(&[], &[], 1000.0, 365.0));
        // Single point.
        assert_all_finite(&PerformanceCalculator::calculate(
            &curve(&[1000.0]),
            &[],
            1000.0,
            365.0,
        ));
        // Monotone gains: no drawdown, no losses.
        let metrics = PerformanceCalculator::calculate(
            &curve(&[1000.0, 1010.0, 1020.0, 1030.0]),
            &[trade(10.0), trade(10.0)],
            1000.0,
            365.0,
        );
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.calmar_ratio, 0.0);
        assert_eq!(metrics.omega_ratio, 0.0);
        assert!(metrics.sharpe_ratio > 0.0);
        assert_all_finite(&metrics);
        // Equity hits zero.
        assert_all_finite(&PerformanceCalculator::calculate(
            &curve(&[1000.0, 500.0, 0.0]),
            &[trade(-1000.0)],
            1000.0,
            365.0,
        ));
    }

    #[test]
    fn negative_equity_caps_drawdown_at_one() {
        // A short whose price runs away can push equity below zero;
        // the drawdown fraction still tops out at a full loss.
        let metrics = PerformanceCalculator::calculate(
            &curve(&[1000.0, 1300.0, 400.0, -1200.0, -500.0]),
            &[trade(-2200.0)],
            1000.0,
            365.0,
        );
        assert_eq!(metrics.max_drawdown, 1.0);
        assert!(metrics.ulcer_index <= 1.0);
        assert!(metrics.pain_index <= 1.0);
        assert_all_finite(&metrics);
    }

    #[test]
    fn max_drawdown_is_a_fraction_of_peak() {
        let metrics = PerformanceCalculator::calculate(
            &curve(&[1000.0, 1200.0, 900.0, 1100.0]),
            &[],
            1000.0,
            365.0,
        );
        assert!((metrics.max_drawdown - 0.25).abs() < 1e-12);
    }

    #[test]
    fn drawdown_duration_is_right_censored() {
        // Two bars down, recovery, then an open three-bar drawdown.
        let metrics = PerformanceCalculator::calculate(
            &curve(&[100.0, 90.0, 95.0, 101.0, 98.0, 97.0, 96.0]),
            &[],
            100.0,
            365.0,
        );
        assert_eq!(metrics.max_drawdown_duration, 3);
        assert!((metrics.avg_drawdown_duration - 2.5).abs() < 1e-12);
    }

    #[test]
    fn trade_statistics_and_expectancy() {
        let trades = vec![trade(20.0), trade(10.0), trade(-15.0), trade(0.0)];
        let metrics =
            PerformanceCalculator::calculate(&curve(&[1000.0, 1015.0]), &trades, 1000.0, 365.0);
        assert_eq!(metrics.total_trades, 4);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 0.5).abs() < 1e-12);
        assert!((metrics.avg_win - 15.0).abs() < 1e-12);
        assert!((metrics.avg_loss - 15.0).abs() < 1e-12);
        assert!((metrics.expectancy - (0.5 * 15.0 - 0.5 * 15.0)).abs() < 1e-12);
    }

    #[test]
    fn sharpe_scales_with_annualization() {
        let points = curve(&[1000.0, 1010.0, 1005.0, 1020.0, 1015.0, 1030.0]);
        let daily = PerformanceCalculator::calculate(&points, &[], 1000.0, 365.0);
        let hourly = PerformanceCalculator::calculate(&points, &[], 1000.0, 8760.0);
        assert!(daily.sharpe_ratio > 0.0);
        let ratio = hourly.sharpe_ratio / daily.sharpe_ratio;
        assert!((ratio - (8760.0_f64 / 365.0).sqrt()).abs() < 1e-9);
    }
}
