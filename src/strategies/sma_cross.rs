use crate::indicators::calculate_sma;
use crate::models::{Bar, ParameterSet};
use crate::param_utils::get_param_usize;
use crate::strategy::{Decision, Strategy};

/// Long when the fast moving average crosses above the slow one, flat
/// when it crosses back below.
pub struct SmaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
}

impl SmaCrossStrategy {
    pub fn new(parameters: &ParameterSet) -> Self {
        let fast_period = get_param_usize(parameters, "fastPeriod", 10, 1);
        let mut slow_period = get_param_usize(parameters, "slowPeriod", 30, 2);
        if slow_period <= fast_period {
            slow_period = fast_period + 1;
        }
        Self {
            fast_period,
            slow_period,
        }
    }
}

impl Strategy for SmaCrossStrategy {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn warmup_bars(&self) -> usize {
        self.slow_period + 1
    }

    fn decide(&mut self, bars: &[Bar], index: usize) -> Decision {
        if index < self.warmup_bars() {
            return Decision::Hold;
        }

        let closes: Vec<f64> = bars[..=index].iter().map(|bar| bar.close).collect();
        let fast = calculate_sma(&closes, self.fast_period);
        let slow = calculate_sma(&closes, self.slow_period);

        let was_above = fast[index - 1] > slow[index - 1];
        let is_above = fast[index] > slow[index];

        if is_above && !was_above {
            Decision::EnterLong
        } else if !is_above && was_above {
            Decision::Exit
        } else {
            Decision::Hold
        }
    }
}
