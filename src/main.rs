use anyhow::{anyhow, Context, Result};
use backlab::models::parse_parameter_map_from_json;
use backlab::optimizer::{CancelToken, GridOptimizer, OptimizeRequest};
use backlab::performance::PerformanceCalculator;
use backlab::simulator::{run_strategy_backtest, SimulatorConfig};
use backlab::walk_forward::{SelectionMetric, WalkForwardAnalyzer, WalkForwardRequest};
use backlab::{synthetic_bars, BarProvider, BarStore, EngineSettings, ParameterRange, Timeframe};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use log::info;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const DEFAULT_BAR_DATA_FILE: &str = "data/bars.bin";

#[derive(Parser)]
#[command(name = "backlab")]
#[command(about = "Backtesting, parameter-optimization and walk-forward validation engine")]
struct Cli {
    /// Override the number of worker threads used for grid optimization
    #[arg(long, global = true)]
    workers: Option<usize>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest and print its metrics
    Backtest {
        /// Strategy name (sma_cross, rsi_reversion, momentum, buy_and_hold)
        strategy: String,
        /// Strategy parameters as a JSON object of numbers
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1d")]
        timeframe: Timeframe,
        /// Start date (YYYY-MM-DD, inclusive)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD, exclusive)
        #[arg(long)]
        end: String,
        /// Path to the bar snapshot file
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Sweep a parameter grid and print results ranked by grid order
    Optimize {
        strategy: String,
        /// Parameters held fixed across the grid, as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Parameter ranges as a JSON array of {name, startValue, endValue, step}
        #[arg(long)]
        ranges: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1d")]
        timeframe: Timeframe,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Walk-forward validation: optimize per fold, validate out of sample
    WalkForward {
        strategy: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long)]
        ranges: String,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1d")]
        timeframe: Timeframe,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long = "in-sample-days")]
        in_sample_days: i64,
        #[arg(long = "out-of-sample-days")]
        out_of_sample_days: i64,
        /// Require exactly this many folds instead of as many as fit
        #[arg(long = "num-folds")]
        num_folds: Option<usize>,
        /// Metric used to pick each fold's winner
        #[arg(long, value_enum, default_value_t = SelectionMetricArg::Sharpe)]
        metric: SelectionMetricArg,
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
    },
    /// Generate a deterministic synthetic bar snapshot for offline runs
    ExportBars {
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1d")]
        timeframe: Timeframe,
        #[arg(long)]
        start: String,
        /// Number of bars to generate
        #[arg(long, default_value_t = 365)]
        count: usize,
        /// Seed for the price path
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SelectionMetricArg {
    Sharpe,
    Sortino,
    Calmar,
    Profit,
}

impl From<SelectionMetricArg> for SelectionMetric {
    fn from(value: SelectionMetricArg) -> Self {
        match value {
            SelectionMetricArg::Sharpe => SelectionMetric::Sharpe,
            SelectionMetricArg::Sortino => SelectionMetric::Sortino,
            SelectionMetricArg::Calmar => SelectionMetric::Calmar,
            SelectionMetricArg::Profit => SelectionMetric::Profit,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let settings = engine_settings(cli.workers)?;

    match cli.command {
        Commands::Backtest {
            strategy,
            params,
            symbol,
            timeframe,
            start,
            end,
            data_file,
        } => {
            let store = load_store(data_file)?;
            let parameters = parse_parameter_map_from_json(&params)?;
            let bars = store.bars(
                &symbol,
                timeframe,
                parse_date(&start)?,
                parse_date(&end)?,
            )?;
            let config = SimulatorConfig {
                initial_capital: settings.initial_capital,
                fee_rate: settings.trade_fee_rate,
                slippage_rate: settings.trade_slippage_rate,
            };
            let outcome = run_strategy_backtest(&strategy, &parameters, &bars, config)?;
            let metrics = PerformanceCalculator::calculate(
                &outcome.equity_curve,
                &outcome.trades,
                settings.initial_capital,
                timeframe.bars_per_year(),
            );
            info!(
                "{}: {} trades, final equity {:.2}",
                strategy,
                outcome.trades.len(),
                outcome.final_equity
            );
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Optimize {
            strategy,
            params,
            ranges,
            symbol,
            timeframe,
            start,
            end,
            data_file,
        } => {
            let store = load_store(data_file)?;
            let request = OptimizeRequest {
                strategy,
                base_parameters: parse_parameter_map_from_json(&params)?,
                parameter_ranges: parse_ranges(&ranges)?,
                symbol,
                timeframe,
                start_date: parse_date(&start)?,
                end_date: parse_date(&end)?,
            };
            let optimizer = GridOptimizer::new(settings).with_progress(true);
            let run = optimizer.run(&store, &request, &CancelToken::new())?;
            info!(
                "Optimization {} finished: {} results, {} failed combinations",
                run.id,
                run.results.len(),
                run.failed_combinations
            );
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::WalkForward {
            strategy,
            params,
            ranges,
            symbol,
            timeframe,
            start,
            end,
            in_sample_days,
            out_of_sample_days,
            num_folds,
            metric,
            data_file,
        } => {
            let store = load_store(data_file)?;
            let request = WalkForwardRequest {
                strategy,
                base_parameters: parse_parameter_map_from_json(&params)?,
                parameter_ranges: parse_ranges(&ranges)?,
                symbol,
                timeframe,
                start_date: parse_date(&start)?,
                end_date: parse_date(&end)?,
                in_sample_days,
                out_of_sample_days,
                num_folds,
                selection_metric: metric.into(),
            };
            let analyzer = WalkForwardAnalyzer::new(settings);
            let run = analyzer.run(&store, &request, &CancelToken::new())?;
            info!(
                "Walk-forward {} finished with {} folds",
                run.id,
                run.fold_results.len()
            );
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
        Commands::ExportBars {
            symbol,
            timeframe,
            start,
            count,
            seed,
            output,
        } => {
            let bars = synthetic_bars(seed, count, parse_date(&start)?, timeframe);
            let mut store = BarStore::new();
            store.insert_series(&symbol, timeframe, bars);
            let path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_BAR_DATA_FILE));
            store.save_to_file(&path)?;
            info!(
                "Exported {} synthetic {} bars for {} to {}",
                count,
                timeframe.as_str(),
                symbol,
                path.display()
            );
        }
    }

    Ok(())
}

/// Settings come from the environment when the full set is present,
/// otherwise the built-in defaults apply. A --workers flag always wins.
fn engine_settings(workers: Option<usize>) -> Result<EngineSettings> {
    let vars: HashMap<String, String> = env::vars().collect();
    let mut settings = if vars.contains_key("TRADE_FEE_RATE") {
        EngineSettings::from_settings_map(&vars)?
    } else {
        EngineSettings::default()
    };
    if workers.is_some() {
        settings.worker_threads = workers;
    }
    Ok(settings)
}

fn load_store(data_file: Option<PathBuf>) -> Result<BarStore> {
    let path = data_file.unwrap_or_else(|| PathBuf::from(DEFAULT_BAR_DATA_FILE));
    BarStore::load_from_file(&path)
        .with_context(|| format!("Bar snapshot unavailable at {}", path.display()))
}

fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("Invalid date '{}', expected YYYY-MM-DD", value))?;
    Ok(DateTime::from_naive_utc_and_offset(
        date.and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("Invalid date '{}'", value))?,
        Utc,
    ))
}

fn parse_ranges(value: &str) -> Result<Vec<ParameterRange>> {
    serde_json::from_str(value).map_err(|error| anyhow!("Invalid ranges JSON: {}", error))
}
