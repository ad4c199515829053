use crate::error::EngineError;
use crate::models::{Bar, ParameterSet};

/// What a strategy wants done at the close of one bar. The simulator
/// ignores `EnterLong`/`EnterShort` while a position is open and `Exit`
/// while flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    EnterLong,
    EnterShort,
    Exit,
    Hold,
}

/// A trading rule evaluated once per bar. `decide` receives the full
/// history slice and the current index; implementations must only read
/// `bars[..=index]`.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Bars of history required before decisions start. The simulator
    /// forces Hold until this many bars have elapsed.
    fn warmup_bars(&self) -> usize;

    fn decide(&mut self, bars: &[Bar], index: usize) -> Decision;
}

#[path = "strategies/sma_cross.rs"]
pub mod sma_cross;

pub use sma_cross::SmaCrossStrategy;

#[path = "strategies/rsi_reversion.rs"]
pub mod rsi_reversion;

pub use rsi_reversion::RsiReversionStrategy;

#[path = "strategies/momentum.rs"]
pub mod momentum;

pub use momentum::MomentumStrategy;

#[path = "strategies/buy_and_hold.rs"]
pub mod buy_and_hold;

pub use buy_and_hold::BuyAndHoldStrategy;

pub fn create_strategy(
    name: &str,
    parameters: &ParameterSet,
) -> Result<Box<dyn Strategy>, EngineError> {
    match name {
        "sma_cross" => Ok(Box::new(SmaCrossStrategy::new(parameters))),
        "rsi_reversion" => Ok(Box::new(RsiReversionStrategy::new(parameters))),
        "momentum" => Ok(Box::new(MomentumStrategy::new(parameters))),
        "buy_and_hold" => Ok(Box::new(BuyAndHoldStrategy::new(parameters))),
        _ => Err(EngineError::validation(
            "strategy",
            format!("unknown strategy `{}`", name),
        )),
    }
}

pub fn known_strategies() -> &'static [&'static str] {
    &["sma_cross", "rsi_reversion", "momentum", "buy_and_hold"]
}
