use crate::config::EngineSettings;
use crate::data::BarProvider;
use crate::error::EngineError;
use crate::models::{
    Bar, OptimizationResult, OptimizationRun, ParameterRange, ParameterSet, RunStatus, Timeframe,
};
use crate::optimizer_status::OptimizerStatus;
use crate::param_utils::expand_combinations;
use crate::performance::PerformanceCalculator;
use crate::simulator::{run_strategy_backtest, SimulatorConfig};
use crate::strategy::create_strategy;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub strategy: String,
    /// Parameters held fixed across the grid; ranged names override them.
    #[serde(default)]
    pub base_parameters: ParameterSet,
    pub parameter_ranges: Vec<ParameterRange>,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Cooperative cancellation flag shared between the caller and the
/// worker pool. Workers stop picking up new combinations once set;
/// results already produced are kept.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct GridTask {
    index: usize,
    parameters: ParameterSet,
}

struct GridTaskResult {
    index: usize,
    outcome: Result<OptimizationResult, EngineError>,
}

/// Expands parameter ranges into the Cartesian grid and backtests each
/// combination on a fixed pool of worker threads. Combination order in
/// the output matches the deterministic grid order regardless of which
/// worker finished first.
pub struct GridOptimizer {
    settings: EngineSettings,
    status: OptimizerStatus,
    show_progress: bool,
}

impl GridOptimizer {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            status: OptimizerStatus::new(),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status.clone()
    }

    pub fn run(
        &self,
        provider: &dyn BarProvider,
        request: &OptimizeRequest,
        cancel: &CancelToken,
    ) -> Result<OptimizationRun, EngineError> {
        self.run_with_callback(provider, request, cancel, |_| {})
    }

    /// Like [`GridOptimizer::run`] but invokes `on_complete` with the
    /// combination index after each result lands, before the next one is
    /// collected. The callback may flip the cancel token to stop the
    /// grid mid-flight.
    pub fn run_with_callback<F>(
        &self,
        provider: &dyn BarProvider,
        request: &OptimizeRequest,
        cancel: &CancelToken,
        mut on_complete: F,
    ) -> Result<OptimizationRun, EngineError>
    where
        F: FnMut(usize),
    {
        validate_request(request)?;
        let combinations = expand_combinations(&request.base_parameters, &request.parameter_ranges)?;
        let total = combinations.len();
        self.status.set_phase("Loading bars");
        let bars: Arc<Vec<Bar>> = Arc::new(provider.bars(
            &request.symbol,
            request.timeframe,
            request.start_date,
            request.end_date,
        )?);

        info!(
            "Optimizing {} over {} combinations ({} bars of {} {})",
            request.strategy,
            total,
            bars.len(),
            request.symbol,
            request.timeframe.as_str()
        );
        self.status.set_phase("Running grid");
        self.status.set_progress(total, 0, 0, None);

        let num_workers = self
            .settings
            .worker_threads
            .unwrap_or_else(num_cpus::get)
            .max(1)
            .min(total);

        let (task_tx, task_rx): (Sender<GridTask>, Receiver<GridTask>) = bounded(total);
        let (result_tx, result_rx): (Sender<GridTaskResult>, Receiver<GridTaskResult>) =
            bounded(total);

        let simulator_config = SimulatorConfig {
            initial_capital: self.settings.initial_capital,
            fee_rate: self.settings.trade_fee_rate,
            slippage_rate: self.settings.trade_slippage_rate,
        };
        let bars_per_year = request.timeframe.bars_per_year();

        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let bars = Arc::clone(&bars);
            let cancel = cancel.clone();
            let strategy_name = request.strategy.clone();
            let initial_capital = simulator_config.initial_capital;

            let handle = thread::spawn(move || {
                while let Ok(task) = task_rx.recv() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = run_strategy_backtest(
                        &strategy_name,
                        &task.parameters,
                        bars.as_slice(),
                        simulator_config,
                    )
                    .map(|sim| OptimizationResult {
                        parameters: task.parameters.clone(),
                        metrics: PerformanceCalculator::calculate(
                            &sim.equity_curve,
                            &sim.trades,
                            initial_capital,
                            bars_per_year,
                        ),
                    });
                    if result_tx
                        .send(GridTaskResult {
                            index: task.index,
                            outcome,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
            handles.push(handle);
        }
        drop(result_tx);

        for (index, parameters) in combinations.into_iter().enumerate() {
            let _ = task_tx.send(GridTask { index, parameters });
        }
        drop(task_tx);

        let progress = if self.show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                    )
                    .unwrap()
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut slots: Vec<Option<OptimizationResult>> = vec![None; total];
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut best_score: Option<f64> = None;
        let mut first_error: Option<EngineError> = None;

        while let Ok(task_result) = result_rx.recv() {
            completed += 1;
            match task_result.outcome {
                Ok(result) => {
                    let score = result.metrics.sharpe_ratio;
                    if best_score.map_or(true, |best| score > best) {
                        best_score = Some(score);
                    }
                    slots[task_result.index] = Some(result);
                }
                Err(error) => {
                    warn!("Combination {} failed: {}", task_result.index, error);
                    failed += 1;
                    if first_error.is_none() {
                        first_error = Some(error);
                    }
                }
            }
            if let Some(pb) = &progress {
                pb.set_position(completed as u64);
            }
            self.status.set_progress(total, completed, failed, best_score);
            on_complete(task_result.index);
            // Stop collecting as soon as cancellation is observed; later
            // results are discarded so the retained set is exactly what
            // completed beforehand.
            if cancel.is_cancelled() {
                break;
            }
        }
        drop(result_rx);

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        for handle in handles {
            let _ = handle.join();
        }

        let results: Vec<OptimizationResult> = slots.into_iter().flatten().collect();

        // Every attempted combination failing means the grid itself is
        // broken, not one unlucky parameter set.
        if results.is_empty() && failed > 0 {
            self.status.set_phase("Failed");
            return Err(first_error.unwrap_or_else(|| {
                EngineError::Simulation("all combinations failed".to_string())
            }));
        }

        if cancel.is_cancelled() {
            info!(
                "Optimization cancelled after {} of {} combinations",
                completed, total
            );
            self.status.set_phase("Cancelled");
        } else {
            self.status.set_phase("Completed");
        }

        Ok(OptimizationRun {
            id: Uuid::new_v4(),
            status: RunStatus::Completed,
            results,
            failed_combinations: failed,
            error: None,
        })
    }
}

fn validate_request(request: &OptimizeRequest) -> Result<(), EngineError> {
    if request.start_date >= request.end_date {
        return Err(EngineError::validation(
            "startDate",
            format!(
                "startDate {} must precede endDate {}",
                request.start_date, request.end_date
            ),
        ));
    }
    if request.symbol.trim().is_empty() {
        return Err(EngineError::validation("symbol", "symbol must not be empty"));
    }
    // Surface unknown strategies before spinning up the pool.
    create_strategy(&request.strategy, &request.base_parameters)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{synthetic_bars, BarStore};
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn store() -> (BarStore, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = synthetic_bars(21, 200, start, Timeframe::D1);
        let mut store = BarStore::new();
        store.insert_series("BTCUSD", Timeframe::D1, bars);
        (store, start)
    }

    fn request(start: DateTime<Utc>) -> OptimizeRequest {
        OptimizeRequest {
            strategy: "sma_cross".to_string(),
            base_parameters: HashMap::new(),
            parameter_ranges: vec![
                ParameterRange {
                    name: "fastPeriod".to_string(),
                    start_value: 5.0,
                    end_value: 20.0,
                    step: 5.0,
                },
                ParameterRange {
                    name: "slowPeriod".to_string(),
                    start_value: 30.0,
                    end_value: 50.0,
                    step: 10.0,
                },
            ],
            symbol: "BTCUSD".to_string(),
            timeframe: Timeframe::D1,
            start_date: start,
            end_date: start + Duration::days(200),
        }
    }

    fn settings_with_workers(workers: usize) -> EngineSettings {
        EngineSettings {
            worker_threads: Some(workers),
            ..EngineSettings::default()
        }
    }

    #[test]
    fn grid_covers_every_combination_in_order() {
        let (store, start) = store();
        let optimizer = GridOptimizer::new(settings_with_workers(4));
        let run = optimizer
            .run(&store, &request(start), &CancelToken::new())
            .unwrap();
        assert_eq!(run.results.len(), 12);
        assert_eq!(run.failed_combinations, 0);
        assert_eq!(run.status, RunStatus::Completed);

        // Results follow grid order: first range outermost.
        assert_eq!(run.results[0].parameters["fastPeriod"], 5.0);
        assert_eq!(run.results[0].parameters["slowPeriod"], 30.0);
        assert_eq!(run.results[1].parameters["slowPeriod"], 40.0);
        assert_eq!(run.results[3].parameters["fastPeriod"], 10.0);
        assert_eq!(run.results[11].parameters["fastPeriod"], 20.0);
        assert_eq!(run.results[11].parameters["slowPeriod"], 50.0);
    }

    #[test]
    fn cancellation_keeps_already_completed_results() {
        let (store, start) = store();
        // One worker makes completion order sequential and the cutoff exact.
        let optimizer = GridOptimizer::new(settings_with_workers(1));
        let cancel = CancelToken::new();
        let mut seen = 0usize;
        let run = optimizer
            .run_with_callback(&store, &request(start), &cancel, |_| {
                seen += 1;
                if seen == 3 {
                    cancel.cancel();
                }
            })
            .unwrap();
        assert_eq!(run.results.len(), 3);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn rejects_invalid_requests_before_running() {
        let (store, start) = store();
        let optimizer = GridOptimizer::new(settings_with_workers(2));

        let mut bad_dates = request(start);
        bad_dates.end_date = bad_dates.start_date;
        assert!(optimizer
            .run(&store, &bad_dates, &CancelToken::new())
            .unwrap_err()
            .is_validation());

        let mut bad_strategy = request(start);
        bad_strategy.strategy = "does_not_exist".to_string();
        assert!(optimizer
            .run(&store, &bad_strategy, &CancelToken::new())
            .unwrap_err()
            .is_validation());

        let mut bad_range = request(start);
        bad_range.parameter_ranges[0].step = -1.0;
        assert!(optimizer
            .run(&store, &bad_range, &CancelToken::new())
            .unwrap_err()
            .is_validation());

        let mut empty_ranges = request(start);
        empty_ranges.parameter_ranges.clear();
        assert!(optimizer
            .run(&store, &empty_ranges, &CancelToken::new())
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn missing_data_surfaces_as_data_unavailable() {
        let (store, start) = store();
        let mut req = request(start);
        req.symbol = "ETHUSD".to_string();
        let optimizer = GridOptimizer::new(settings_with_workers(2));
        let err = optimizer.run(&store, &req, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
    }

    #[test]
    fn reruns_are_deterministic() {
        let (store, start) = store();
        let optimizer = GridOptimizer::new(settings_with_workers(3));
        let a = optimizer
            .run(&store, &request(start), &CancelToken::new())
            .unwrap();
        let b = optimizer
            .run(&store, &request(start), &CancelToken::new())
            .unwrap();
        assert_eq!(a.results.len(), b.results.len());
        for (left, right) in a.results.iter().zip(b.results.iter()) {
            assert_eq!(left.parameters, right.parameters);
            assert_eq!(left.metrics, right.metrics);
        }
    }
}
