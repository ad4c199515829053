use crate::config::EngineSettings;
use crate::data::BarProvider;
use crate::error::EngineError;
use crate::models::{
    EquityPoint, Fold, ParameterRange, ParameterSet, PerformanceMetrics, RunStatus, Timeframe,
    Trade, WalkForwardRun,
};
use crate::optimizer::{CancelToken, GridOptimizer, OptimizeRequest};
use crate::performance::PerformanceCalculator;
use crate::simulator::{run_strategy_backtest, SimulationOutcome, SimulatorConfig};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metric used to pick the winning combination of each in-sample
/// optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionMetric {
    Sharpe,
    Sortino,
    Calmar,
    Profit,
}

impl SelectionMetric {
    pub fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        match self {
            SelectionMetric::Sharpe => metrics.sharpe_ratio,
            SelectionMetric::Sortino => metrics.sortino_ratio,
            SelectionMetric::Calmar => metrics.calmar_ratio,
            SelectionMetric::Profit => metrics.profit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardRequest {
    pub strategy: String,
    #[serde(default)]
    pub base_parameters: ParameterSet,
    pub parameter_ranges: Vec<ParameterRange>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub in_sample_days: i64,
    pub out_of_sample_days: i64,
    /// When set, exactly this many folds are required; fewer feasible
    /// folds is a validation error.
    pub num_folds: Option<usize>,
    pub selection_metric: SelectionMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldWindow {
    pub in_sample_start: DateTime<Utc>,
    pub in_sample_end: DateTime<Utc>,
    pub out_of_sample_start: DateTime<Utc>,
    pub out_of_sample_end: DateTime<Utc>,
}

/// Rolling fold layout: fold `i`'s in-sample window starts
/// `i * out_of_sample_days` after the total start, so consecutive
/// out-of-sample windows tile the tail of the range without gaps or
/// overlap.
pub fn partition_folds(request: &WalkForwardRequest) -> Result<Vec<FoldWindow>, EngineError> {
    if request.in_sample_days <= 0 {
        return Err(EngineError::validation(
            "inSampleDays",
            format!("must be positive (value: {})", request.in_sample_days),
        ));
    }
    if request.out_of_sample_days <= 0 {
        return Err(EngineError::validation(
            "outOfSampleDays",
            format!("must be positive (value: {})", request.out_of_sample_days),
        ));
    }
    if request.start_date >= request.end_date {
        return Err(EngineError::validation(
            "startDate",
            format!(
                "startDate {} must precede endDate {}",
                request.start_date, request.end_date
            ),
        ));
    }

    let in_sample = Duration::days(request.in_sample_days);
    let out_of_sample = Duration::days(request.out_of_sample_days);
    let mut windows = Vec::new();
    let mut fold = 0i64;
    loop {
        let in_sample_start = request.start_date + out_of_sample * fold as i32;
        let in_sample_end = in_sample_start + in_sample;
        let out_of_sample_end = in_sample_end + out_of_sample;
        if out_of_sample_end > request.end_date {
            break;
        }
        windows.push(FoldWindow {
            in_sample_start,
            in_sample_end,
            out_of_sample_start: in_sample_end,
            out_of_sample_end,
        });
        fold += 1;
    }

    if windows.is_empty() {
        return Err(EngineError::validation(
            "inSampleDays",
            format!(
                "range {} to {} does not fit one fold of {}+{} days",
                request.start_date,
                request.end_date,
                request.in_sample_days,
                request.out_of_sample_days
            ),
        ));
    }

    if let Some(num_folds) = request.num_folds {
        if num_folds == 0 {
            return Err(EngineError::validation("numFolds", "must be positive"));
        }
        if windows.len() < num_folds {
            return Err(EngineError::validation(
                "numFolds",
                format!(
                    "requested {} folds but only {} fit the date range",
                    num_folds,
                    windows.len()
                ),
            ));
        }
        windows.truncate(num_folds);
    }

    Ok(windows)
}

/// Per-fold optimize-then-validate over a rolling window, with the
/// out-of-sample results stitched into one continuous equity curve for
/// the aggregate metrics.
pub struct WalkForwardAnalyzer {
    settings: EngineSettings,
}

struct FoldOutcome {
    fold: Fold,
    out_of_sample: SimulationOutcome,
}

impl WalkForwardAnalyzer {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    pub fn run(
        &self,
        provider: &dyn BarProvider,
        request: &WalkForwardRequest,
        cancel: &CancelToken,
    ) -> Result<WalkForwardRun, EngineError> {
        let windows = partition_folds(request)?;
        info!(
            "Walk-forward on {}: {} folds of {}d in-sample / {}d out-of-sample",
            request.symbol,
            windows.len(),
            request.in_sample_days,
            request.out_of_sample_days
        );

        let outcomes: Vec<Result<FoldOutcome, EngineError>> = windows
            .par_iter()
            .enumerate()
            .map(|(fold_number, window)| {
                if cancel.is_cancelled() {
                    return Err(EngineError::Simulation("cancelled".to_string()));
                }
                self.run_fold(provider, request, fold_number, window, cancel)
            })
            .collect();

        let mut folds = Vec::new();
        let mut failed_folds = 0usize;
        let mut first_error: Option<EngineError> = None;
        for outcome in outcomes {
            match outcome {
                Ok(fold_outcome) => folds.push(fold_outcome),
                Err(error) => {
                    warn!("Fold failed: {}", error);
                    failed_folds += 1;
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
        }

        if folds.is_empty() {
            return Err(first_error
                .unwrap_or_else(|| EngineError::Simulation("no folds produced".to_string())));
        }

        let aggregated = self.aggregate(&folds, request.timeframe.bars_per_year());
        let fold_results = folds.into_iter().map(|outcome| outcome.fold).collect();

        Ok(WalkForwardRun {
            id: Uuid::new_v4(),
            status: RunStatus::Completed,
            fold_results,
            aggregated_out_of_sample_metrics: Some(aggregated),
            failed_folds,
            error: first_error.map(|error| error.to_string()),
        })
    }

    fn run_fold(
        &self,
        provider: &dyn BarProvider,
        request: &WalkForwardRequest,
        fold_number: usize,
        window: &FoldWindow,
        cancel: &CancelToken,
    ) -> Result<FoldOutcome, EngineError> {
        let optimize_request = OptimizeRequest {
            strategy: request.strategy.clone(),
            base_parameters: request.base_parameters.clone(),
            parameter_ranges: request.parameter_ranges.clone(),
            symbol: request.symbol.clone(),
            timeframe: request.timeframe,
            start_date: window.in_sample_start,
            end_date: window.in_sample_end,
        };
        let optimizer = GridOptimizer::new(self.settings.clone());
        let optimization = optimizer.run(provider, &optimize_request, cancel)?;

        // Results arrive in grid order; only a strictly better score
        // displaces the incumbent, so ties go to the earliest-generated
        // combination.
        let mut winner = None;
        let mut best_score = f64::NEG_INFINITY;
        for result in &optimization.results {
            let score = request.selection_metric.score(&result.metrics);
            if winner.is_none() || score > best_score {
                winner = Some(result);
                best_score = score;
            }
        }
        let winner = winner.ok_or_else(|| {
            EngineError::Simulation(format!(
                "fold {} produced no in-sample results",
                fold_number
            ))
        })?;

        let oos_bars = provider.bars(
            &request.symbol,
            request.timeframe,
            window.out_of_sample_start,
            window.out_of_sample_end,
        )?;
        let simulator_config = SimulatorConfig {
            initial_capital: self.settings.initial_capital,
            fee_rate: self.settings.trade_fee_rate,
            slippage_rate: self.settings.trade_slippage_rate,
        };
        let out_of_sample = run_strategy_backtest(
            &request.strategy,
            &winner.parameters,
            &oos_bars,
            simulator_config,
        )?;
        let out_of_sample_metrics = PerformanceCalculator::calculate(
            &out_of_sample.equity_curve,
            &out_of_sample.trades,
            self.settings.initial_capital,
            request.timeframe.bars_per_year(),
        );

        Ok(FoldOutcome {
            fold: Fold {
                fold_number,
                in_sample_start_date: window.in_sample_start,
                in_sample_end_date: window.in_sample_end,
                out_of_sample_start_date: window.out_of_sample_start,
                out_of_sample_end_date: window.out_of_sample_end,
                optimized_parameters: winner.parameters.clone(),
                out_of_sample_metrics,
            },
            out_of_sample,
        })
    }

    /// Concatenates the fold ledgers into one continuous out-of-sample
    /// record: each fold's equity deltas are rebased onto the running
    /// equity, then the metrics are computed once over the whole stitch.
    fn aggregate(&self, folds: &[FoldOutcome], bars_per_year: f64) -> PerformanceMetrics {
        let initial = self.settings.initial_capital;
        let mut running = initial;
        let mut curve: Vec<EquityPoint> = Vec::new();
        let mut trades: Vec<Trade> = Vec::new();

        for outcome in folds {
            for point in &outcome.out_of_sample.equity_curve {
                curve.push(EquityPoint {
                    timestamp: point.timestamp,
                    equity: running + (point.equity - initial),
                });
            }
            running += outcome.out_of_sample.final_equity - initial;
            trades.extend(outcome.out_of_sample.trades.iter().cloned());
        }

        PerformanceCalculator::calculate(&curve, &trades, initial, bars_per_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{synthetic_bars, BarStore};
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn request() -> WalkForwardRequest {
        WalkForwardRequest {
            strategy: "momentum".to_string(),
            base_parameters: HashMap::new(),
            parameter_ranges: vec![ParameterRange {
                name: "lookback".to_string(),
                start_value: 5.0,
                end_value: 15.0,
                step: 5.0,
            }],
            symbol: "BTCUSD".to_string(),
            timeframe: Timeframe::D1,
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end_date: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
            in_sample_days: 30,
            out_of_sample_days: 15,
            num_folds: None,
            selection_metric: SelectionMetric::Sharpe,
        }
    }

    #[test]
    fn folds_roll_forward_by_the_out_of_sample_length() {
        let windows = partition_folds(&request()).unwrap();
        assert_eq!(windows.len(), 4);

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            windows[0].out_of_sample_start,
            Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(
            windows[0].out_of_sample_end,
            Utc.with_ymd_and_hms(2024, 2, 15, 0, 0, 0).unwrap()
        );
        for (i, window) in windows.iter().enumerate() {
            assert_eq!(window.in_sample_start, start + Duration::days(15 * i as i64));
            assert_eq!(
                window.in_sample_end - window.in_sample_start,
                Duration::days(30)
            );
            assert_eq!(window.out_of_sample_start, window.in_sample_end);
        }
        // Consecutive out-of-sample windows tile exactly.
        for pair in windows.windows(2) {
            assert_eq!(pair[0].out_of_sample_end, pair[1].out_of_sample_start);
        }
    }

    #[test]
    fn explicit_fold_count_is_honored_or_rejected() {
        let mut req = request();
        req.num_folds = Some(3);
        assert_eq!(partition_folds(&req).unwrap().len(), 3);

        req.num_folds = Some(5);
        let err = partition_folds(&req).unwrap_err();
        assert!(err.is_validation());

        req.num_folds = Some(0);
        assert!(partition_folds(&req).unwrap_err().is_validation());
    }

    #[test]
    fn degenerate_windows_are_rejected() {
        let mut req = request();
        req.in_sample_days = 0;
        assert!(partition_folds(&req).unwrap_err().is_validation());

        let mut req = request();
        req.out_of_sample_days = -5;
        assert!(partition_folds(&req).unwrap_err().is_validation());

        let mut req = request();
        req.end_date = req.start_date;
        assert!(partition_folds(&req).unwrap_err().is_validation());

        // Range shorter than a single fold.
        let mut req = request();
        req.end_date = req.start_date + Duration::days(40);
        assert!(partition_folds(&req).unwrap_err().is_validation());
    }

    #[test]
    fn fold_without_bars_is_recorded_not_fatal() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // Fold 3's out-of-sample window is [day 75, day 90); punch that
        // hole out of the series so only that fold can fail.
        let bars: Vec<_> = synthetic_bars(55, 105, start, Timeframe::D1)
            .into_iter()
            .filter(|bar| {
                bar.timestamp < start + Duration::days(75)
                    || bar.timestamp >= start + Duration::days(90)
            })
            .collect();
        let mut store = BarStore::new();
        store.insert_series("BTCUSD", Timeframe::D1, bars);

        let settings = EngineSettings {
            worker_threads: Some(2),
            ..EngineSettings::default()
        };
        let analyzer = WalkForwardAnalyzer::new(settings);
        let run = analyzer
            .run(&store, &request(), &CancelToken::new())
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.failed_folds, 1);
        let message = run.error.expect("first cause preserved");
        assert!(message.contains("no bars available"));
        assert_eq!(run.fold_results.len(), 3);
        for (i, fold) in run.fold_results.iter().enumerate() {
            assert_eq!(fold.fold_number, i);
        }
        assert!(run.aggregated_out_of_sample_metrics.is_some());
    }

    #[test]
    fn end_to_end_walk_forward_produces_continuous_aggregate() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = synthetic_bars(33, 120, start, Timeframe::D1);
        let mut store = BarStore::new();
        store.insert_series("BTCUSD", Timeframe::D1, bars);

        let settings = EngineSettings {
            worker_threads: Some(2),
            ..EngineSettings::default()
        };
        let analyzer = WalkForwardAnalyzer::new(settings.clone());
        let mut req = request();
        req.end_date = start + Duration::days(120);
        let run = analyzer.run(&store, &req, &CancelToken::new()).unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.failed_folds, 0);
        assert!(run.error.is_none());
        assert_eq!(run.fold_results.len(), 6);
        for (i, fold) in run.fold_results.iter().enumerate() {
            assert_eq!(fold.fold_number, i);
            assert!(req
                .parameter_ranges
                .iter()
                .all(|range| fold.optimized_parameters.contains_key(&range.name)));
        }

        let aggregated = run.aggregated_out_of_sample_metrics.unwrap();
        assert!(aggregated.final_equity.is_finite());
        assert!(aggregated.max_drawdown >= 0.0 && aggregated.max_drawdown <= 1.0);

        // Aggregate profit equals the sum of per-fold profits.
        let fold_profit: f64 = run
            .fold_results
            .iter()
            .map(|fold| fold.out_of_sample_metrics.profit)
            .sum();
        assert!((aggregated.profit - fold_profit).abs() < 1e-6);
    }
}
