pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_utils;
pub mod performance;
pub mod service;
pub mod simulator;
pub mod strategy;
pub mod walk_forward;

pub use config::EngineSettings;
pub use data::{synthetic_bars, BarProvider, BarStore};
pub use error::EngineError;
pub use models::{
    BacktestRequest, BacktestRun, Bar, EquityPoint, Fold, OptimizationResult, OptimizationRun,
    ParameterRange, ParameterSet, PerformanceMetrics, RunStatus, Timeframe, Trade, TradeDirection,
    WalkForwardRun,
};
pub use optimizer::{CancelToken, GridOptimizer, OptimizeRequest};
pub use performance::PerformanceCalculator;
pub use service::EngineService;
pub use simulator::{run_strategy_backtest, SimulationOutcome, Simulator, SimulatorConfig};
pub use strategy::{create_strategy, known_strategies, Decision, Strategy};
pub use walk_forward::{SelectionMetric, WalkForwardAnalyzer, WalkForwardRequest};
