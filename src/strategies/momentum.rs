use crate::indicators::calculate_roc;
use crate::models::{Bar, ParameterSet};
use crate::param_utils::{get_param_f64_clamped, get_param_usize};
use crate::strategy::{Decision, Strategy};

/// Rate-of-change momentum: long above the entry threshold, short below
/// its negative, flat inside the neutral band.
pub struct MomentumStrategy {
    lookback: usize,
    entry_threshold: f64,
}

impl MomentumStrategy {
    pub fn new(parameters: &ParameterSet) -> Self {
        let lookback = get_param_usize(parameters, "lookback", 20, 1);
        let entry_threshold =
            get_param_f64_clamped(parameters, "entryThreshold", 0.02, 0.0001, 1.0);
        Self {
            lookback,
            entry_threshold,
        }
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn warmup_bars(&self) -> usize {
        self.lookback
    }

    fn decide(&mut self, bars: &[Bar], index: usize) -> Decision {
        if index < self.warmup_bars() {
            return Decision::Hold;
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|bar| bar.close).collect();
        let roc = calculate_roc(&closes, self.lookback);
        let momentum = roc[index];

        if momentum > self.entry_threshold {
            Decision::EnterLong
        } else if momentum < -self.entry_threshold {
            Decision::EnterShort
        } else {
            // Momentum faded back into the neutral band.
            Decision::Exit
        }
    }
}
