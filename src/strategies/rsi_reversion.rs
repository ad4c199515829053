use crate::indicators::calculate_rsi;
use crate::models::{Bar, ParameterSet};
use crate::param_utils::{get_param_f64_clamped, get_param_usize};
use crate::strategy::{Decision, Strategy};

/// Mean reversion on RSI: enter long when oversold, exit once RSI
/// recovers past the neutral exit level.
pub struct RsiReversionStrategy {
    period: usize,
    oversold_level: f64,
    exit_level: f64,
}

impl RsiReversionStrategy {
    pub fn new(parameters: &ParameterSet) -> Self {
        let period = get_param_usize(parameters, "period", 14, 2);
        let oversold_level = get_param_f64_clamped(parameters, "oversoldLevel", 30.0, 1.0, 50.0);
        let exit_level = get_param_f64_clamped(parameters, "exitLevel", 55.0, 50.0, 99.0);
        Self {
            period,
            oversold_level,
            exit_level,
        }
    }
}

impl Strategy for RsiReversionStrategy {
    fn name(&self) -> &str {
        "rsi_reversion"
    }

    fn warmup_bars(&self) -> usize {
        self.period + 1
    }

    fn decide(&mut self, bars: &[Bar], index: usize) -> Decision {
        if index < self.warmup_bars() {
            return Decision::Hold;
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|bar| bar.close).collect();
        let rsi = calculate_rsi(&closes, self.period);
        let current = rsi[index];

        if current < self.oversold_level {
            Decision::EnterLong
        } else if current > self.exit_level {
            Decision::Exit
        } else {
            Decision::Hold
        }
    }
}
