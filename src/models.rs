use anyhow::{anyhow, Result as AnyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

/// One OHLCV sample for a fixed timeframe. Bar sequences are ordered
/// ascending by timestamp with no duplicates and are never mutated
/// after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    /// Bars per calendar year, assuming a 24/7 market.
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Timeframe::M1 => 525_600.0,
            Timeframe::M5 => 105_120.0,
            Timeframe::M15 => 35_040.0,
            Timeframe::H1 => 8_760.0,
            Timeframe::H4 => 2_190.0,
            Timeframe::D1 => 365.0,
        }
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(anyhow!("Unknown timeframe '{}'", other)),
        }
    }
}

/// Concrete parameter values keyed by name, one per grid combination.
pub type ParameterSet = HashMap<String, f64>;

/// An inclusive stepped range of candidate values for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRange {
    pub name: String,
    pub start_value: f64,
    pub end_value: f64,
    pub step: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Long => "long",
            TradeDirection::Short => "short",
        }
    }
}

/// One round-trip position from the simulation ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub direction: TradeDirection,
    pub size: f64,
    /// Realized profit and loss net of fees.
    pub pnl: f64,
    pub fees: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Risk-adjusted performance statistics derived from one equity curve
/// and one trade ledger. Every ratio is zero-guarded: degenerate inputs
/// produce 0.0, never NaN or infinity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub profit: f64,
    pub final_equity: f64,
    pub annualized_return: f64,
    /// Largest peak-to-trough decline as a fraction in [0, 1].
    pub max_drawdown: f64,
    pub avg_drawdown_duration: f64,
    pub max_drawdown_duration: usize,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub omega_ratio: f64,
    pub ulcer_index: f64,
    pub pain_index: f64,
    pub pain_ratio: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRequest {
    pub strategy: String,
    pub parameters: ParameterSet,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// One backtest invocation. Status moves Pending -> Running ->
/// {Completed | Failed} exactly once and is terminal afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestRun {
    pub id: Uuid,
    pub request: BacktestRequest,
    pub status: RunStatus,
    pub metrics: Option<PerformanceMetrics>,
    pub error: Option<String>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BacktestRun {
    pub fn new(request: BacktestRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            status: RunStatus::Pending,
            metrics: None,
            error: None,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationResult {
    pub parameters: ParameterSet,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizationRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub results: Vec<OptimizationResult>,
    pub failed_combinations: usize,
    pub error: Option<String>,
}

/// One walk-forward fold: parameters chosen on the in-sample window,
/// validated on the following out-of-sample window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fold {
    pub fold_number: usize,
    pub in_sample_start_date: DateTime<Utc>,
    pub in_sample_end_date: DateTime<Utc>,
    pub out_of_sample_start_date: DateTime<Utc>,
    pub out_of_sample_end_date: DateTime<Utc>,
    pub optimized_parameters: ParameterSet,
    pub out_of_sample_metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalkForwardRun {
    pub id: Uuid,
    pub status: RunStatus,
    pub fold_results: Vec<Fold>,
    pub aggregated_out_of_sample_metrics: Option<PerformanceMetrics>,
    pub failed_folds: usize,
    /// First underlying cause when any fold failed.
    pub error: Option<String>,
}

pub fn parse_parameter_map_from_json(json: &str) -> AnyResult<ParameterSet> {
    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_str(json).map_err(|error| anyhow!("Invalid parameter JSON: {}", error))?;
    let mut cleaned = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        let Some(num) = value.as_f64().filter(|v| v.is_finite()) else {
            return Err(anyhow!(
                "Parameter `{}` must be a finite number (value: {})",
                key,
                value
            ));
        };
        cleaned.insert(key, num);
    }
    Ok(cleaned)
}
