use crate::error::EngineError;
use crate::models::{Bar, EquityPoint, ParameterSet, Trade, TradeDirection};
use crate::strategy::{create_strategy, Decision, Strategy};
use chrono::{DateTime, Utc};
use log::debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

#[derive(Debug, Clone, Copy)]
pub struct SimulatorConfig {
    pub initial_capital: f64,
    /// Fee charged on the traded notional at entry and at exit.
    pub fee_rate: f64,
    /// Adverse price adjustment applied to every fill.
    pub slippage_rate: f64,
}

#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub final_equity: f64,
}

struct OpenPosition {
    direction: TradeDirection,
    size: f64,
    entry_price: f64,
    entry_time: DateTime<Utc>,
    entry_fee: f64,
    /// Equity committed when the position was opened; realized pnl is
    /// measured against it.
    entry_capital: f64,
}

/// Replays bars in order, asking the strategy for one decision per bar
/// and filling it at that bar's close. At most one position is open at
/// a time and the whole equity is committed to it; any position still
/// open on the final bar is force-closed there.
pub struct Simulator {
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self { config }
    }

    pub fn run(
        &self,
        strategy: &mut dyn Strategy,
        bars: &[Bar],
    ) -> Result<SimulationOutcome, EngineError> {
        if bars.is_empty() {
            return Err(EngineError::DataUnavailable {
                window: "empty bar series".to_string(),
            });
        }
        if self.config.initial_capital <= 0.0 {
            return Err(EngineError::validation(
                "initialCapital",
                format!("must be positive (value: {})", self.config.initial_capital),
            ));
        }

        let warmup = strategy.warmup_bars();
        let mut cash = self.config.initial_capital;
        let mut position: Option<OpenPosition> = None;
        let mut trades = Vec::new();
        let mut equity_curve = Vec::with_capacity(bars.len());

        for (index, bar) in bars.iter().enumerate() {
            let last_bar = index == bars.len() - 1;
            let decision = if index < warmup {
                Decision::Hold
            } else {
                strategy.decide(bars, index)
            };

            match (decision, position.is_some()) {
                (Decision::EnterLong, false) if !last_bar => {
                    position = Some(self.open(bar, TradeDirection::Long, &mut cash));
                }
                (Decision::EnterShort, false) if !last_bar => {
                    position = Some(self.open(bar, TradeDirection::Short, &mut cash));
                }
                (Decision::Exit, true) => {
                    let open = position.take().unwrap();
                    trades.push(self.close(open, bar, &mut cash));
                }
                // Entries while holding and exits while flat are no-ops.
                _ => {}
            }

            if last_bar {
                if let Some(open) = position.take() {
                    trades.push(self.close(open, bar, &mut cash));
                }
            }

            let equity = cash + position.as_ref().map_or(0.0, |open| mark(open, bar.close));
            equity_curve.push(EquityPoint {
                timestamp: bar.timestamp,
                equity,
            });
        }

        let final_equity = cash;
        debug!(
            "{}: {} bars, {} trades, final equity {:.2}",
            strategy.name(),
            bars.len(),
            trades.len(),
            final_equity
        );

        Ok(SimulationOutcome {
            trades,
            equity_curve,
            final_equity,
        })
    }

    fn open(&self, bar: &Bar, direction: TradeDirection, cash: &mut f64) -> OpenPosition {
        let fill_price = match direction {
            TradeDirection::Long => bar.close * (1.0 + self.config.slippage_rate),
            TradeDirection::Short => bar.close * (1.0 - self.config.slippage_rate),
        };
        let entry_capital = *cash;
        let entry_fee = entry_capital * self.config.fee_rate;
        let size = (entry_capital - entry_fee) / fill_price;
        *cash = 0.0;
        OpenPosition {
            direction,
            size,
            entry_price: fill_price,
            entry_time: bar.timestamp,
            entry_fee,
            entry_capital,
        }
    }

    fn close(&self, open: OpenPosition, bar: &Bar, cash: &mut f64) -> Trade {
        let fill_price = match open.direction {
            TradeDirection::Long => bar.close * (1.0 - self.config.slippage_rate),
            TradeDirection::Short => bar.close * (1.0 + self.config.slippage_rate),
        };
        let gross = match open.direction {
            TradeDirection::Long => open.size * fill_price,
            TradeDirection::Short => open.size * (2.0 * open.entry_price - fill_price),
        };
        let exit_fee = open.size * fill_price * self.config.fee_rate;
        let proceeds = gross - exit_fee;
        *cash += proceeds;

        Trade {
            entry_time: open.entry_time,
            exit_time: bar.timestamp,
            entry_price: open.entry_price,
            exit_price: fill_price,
            direction: open.direction,
            size: open.size,
            pnl: proceeds - open.entry_capital,
            fees: open.entry_fee + exit_fee,
        }
    }
}

/// Mark-to-market value of an open position at the given close.
fn mark(open: &OpenPosition, close: f64) -> f64 {
    match open.direction {
        TradeDirection::Long => open.size * close,
        TradeDirection::Short => open.size * (2.0 * open.entry_price - close),
    }
}

/// Builds the named strategy and simulates it over the bars. Strategy
/// panics are contained here and reported as simulation failures so one
/// bad parameter combination never takes down a whole optimization.
pub fn run_strategy_backtest(
    strategy_name: &str,
    parameters: &ParameterSet,
    bars: &[Bar],
    config: SimulatorConfig,
) -> Result<SimulationOutcome, EngineError> {
    let mut strategy = create_strategy(strategy_name, parameters)?;
    let simulator = Simulator::new(config);
    let result = catch_unwind(AssertUnwindSafe(|| {
        simulator.run(strategy.as_mut(), bars)
    }));
    match result {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "strategy panicked".to_string());
            Err(EngineError::Simulation(format!(
                "strategy `{}` panicked: {}",
                strategy_name, message
            )))
        }
    }
}
