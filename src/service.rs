use crate::config::EngineSettings;
use crate::data::BarProvider;
use crate::error::EngineError;
use crate::models::{BacktestRequest, BacktestRun, OptimizationRun, RunStatus, WalkForwardRun};
use crate::optimizer::{CancelToken, GridOptimizer, OptimizeRequest};
use crate::performance::PerformanceCalculator;
use crate::simulator::{run_strategy_backtest, SimulatorConfig};
use crate::walk_forward::{WalkForwardAnalyzer, WalkForwardRequest};
use chrono::Utc;
use dashmap::DashMap;
use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

/// Async facade over the engine: fire-and-poll backtests plus awaited
/// optimization and walk-forward runs. All simulation work happens on
/// the blocking pool; run records live in memory for the lifetime of
/// the service.
pub struct EngineService {
    provider: Arc<dyn BarProvider>,
    settings: EngineSettings,
    backtests: Arc<DashMap<Uuid, BacktestRun>>,
}

impl EngineService {
    pub fn new(provider: Arc<dyn BarProvider>, settings: EngineSettings) -> Self {
        Self {
            provider,
            settings,
            backtests: Arc::new(DashMap::new()),
        }
    }

    /// Registers a pending run and schedules it on the blocking pool.
    /// Returns immediately with the run id for status polling.
    pub fn start_backtest(&self, request: BacktestRequest) -> Uuid {
        let run = BacktestRun::new(request);
        let id = run.id;
        self.backtests.insert(id, run);

        let provider = Arc::clone(&self.provider);
        let settings = self.settings.clone();
        let backtests = Arc::clone(&self.backtests);
        tokio::task::spawn_blocking(move || {
            if let Some(mut entry) = backtests.get_mut(&id) {
                entry.status = RunStatus::Running;
            }
            let outcome = execute_backtest(provider.as_ref(), &settings, &backtests, id);
            if let Some(mut entry) = backtests.get_mut(&id) {
                match outcome {
                    Ok(()) => {
                        entry.status = RunStatus::Completed;
                        info!("Backtest {} completed", id);
                    }
                    Err(err) => {
                        entry.status = RunStatus::Failed;
                        entry.error = Some(err.to_string());
                        error!("Backtest {} failed: {}", id, err);
                    }
                }
                entry.completed_at = Some(Utc::now());
            }
        });

        id
    }

    pub fn backtest_status(&self, id: Uuid) -> Option<RunStatus> {
        self.backtests.get(&id).map(|entry| entry.status)
    }

    /// Full run record, available once the run has completed. Running
    /// and failed runs return None; failures are visible through
    /// [`EngineService::backtest_status`] and the stored error string.
    pub fn backtest_results(&self, id: Uuid) -> Option<BacktestRun> {
        self.backtests
            .get(&id)
            .filter(|entry| entry.status == RunStatus::Completed)
            .map(|entry| entry.value().clone())
    }

    pub fn backtest_error(&self, id: Uuid) -> Option<String> {
        self.backtests.get(&id).and_then(|entry| entry.error.clone())
    }

    pub async fn optimize(
        &self,
        request: OptimizeRequest,
        cancel: CancelToken,
    ) -> Result<OptimizationRun, EngineError> {
        let provider = Arc::clone(&self.provider);
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let optimizer = GridOptimizer::new(settings);
            optimizer.run(provider.as_ref(), &request, &cancel)
        })
        .await
        .map_err(|join_error| {
            EngineError::Simulation(format!("optimization task aborted: {}", join_error))
        })?
    }

    pub async fn walk_forward(
        &self,
        request: WalkForwardRequest,
        cancel: CancelToken,
    ) -> Result<WalkForwardRun, EngineError> {
        let provider = Arc::clone(&self.provider);
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || {
            let analyzer = WalkForwardAnalyzer::new(settings);
            analyzer.run(provider.as_ref(), &request, &cancel)
        })
        .await
        .map_err(|join_error| {
            EngineError::Simulation(format!("walk-forward task aborted: {}", join_error))
        })?
    }
}

fn execute_backtest(
    provider: &dyn BarProvider,
    settings: &EngineSettings,
    backtests: &DashMap<Uuid, BacktestRun>,
    id: Uuid,
) -> Result<(), EngineError> {
    let request = backtests
        .get(&id)
        .map(|entry| entry.request.clone())
        .ok_or_else(|| EngineError::Simulation(format!("run {} vanished", id)))?;

    if request.start_date >= request.end_date {
        return Err(EngineError::validation(
            "startDate",
            format!(
                "startDate {} must precede endDate {}",
                request.start_date, request.end_date
            ),
        ));
    }

    let bars = provider.bars(
        &request.symbol,
        request.timeframe,
        request.start_date,
        request.end_date,
    )?;
    let config = SimulatorConfig {
        initial_capital: settings.initial_capital,
        fee_rate: settings.trade_fee_rate,
        slippage_rate: settings.trade_slippage_rate,
    };
    let outcome = run_strategy_backtest(&request.strategy, &request.parameters, &bars, config)?;
    let metrics = PerformanceCalculator::calculate(
        &outcome.equity_curve,
        &outcome.trades,
        settings.initial_capital,
        request.timeframe.bars_per_year(),
    );

    if let Some(mut entry) = backtests.get_mut(&id) {
        entry.metrics = Some(metrics);
        entry.trades = outcome.trades;
        entry.equity_curve = outcome.equity_curve;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{synthetic_bars, BarStore};
    use crate::models::Timeframe;
    use chrono::{Duration, TimeZone};
    use std::collections::HashMap;

    fn service() -> (EngineService, chrono::DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = synthetic_bars(5, 120, start, Timeframe::D1);
        let mut store = BarStore::new();
        store.insert_series("BTCUSD", Timeframe::D1, bars);
        let settings = EngineSettings {
            worker_threads: Some(2),
            ..EngineSettings::default()
        };
        (EngineService::new(Arc::new(store), settings), start)
    }

    fn backtest_request(start: chrono::DateTime<Utc>, symbol: &str) -> BacktestRequest {
        BacktestRequest {
            strategy: "buy_and_hold".to_string(),
            parameters: HashMap::new(),
            symbol: symbol.to_string(),
            timeframe: Timeframe::D1,
            start_date: start,
            end_date: start + Duration::days(120),
        }
    }

    async fn wait_terminal(service: &EngineService, id: Uuid) -> RunStatus {
        for _ in 0..200 {
            if let Some(status) = service.backtest_status(id) {
                if status.is_terminal() {
                    return status;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("backtest {} never reached a terminal status", id);
    }

    #[tokio::test]
    async fn backtest_lifecycle_reaches_completed() {
        let (service, start) = service();
        let id = service.start_backtest(backtest_request(start, "BTCUSD"));
        assert!(service.backtest_status(id).is_some());

        let status = wait_terminal(&service, id).await;
        assert_eq!(status, RunStatus::Completed);

        let run = service.backtest_results(id).expect("completed run");
        assert_eq!(run.id, id);
        assert!(run.metrics.is_some());
        assert_eq!(run.equity_curve.len(), 120);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_backtest_exposes_error_not_results() {
        let (service, start) = service();
        let id = service.start_backtest(backtest_request(start, "NOSUCH"));
        let status = wait_terminal(&service, id).await;
        assert_eq!(status, RunStatus::Failed);
        assert!(service.backtest_results(id).is_none());
        let message = service.backtest_error(id).expect("error recorded");
        assert!(message.contains("NOSUCH"));
    }

    #[tokio::test]
    async fn unknown_run_id_yields_none() {
        let (service, _) = service();
        let id = Uuid::new_v4();
        assert!(service.backtest_status(id).is_none());
        assert!(service.backtest_results(id).is_none());
    }
}
