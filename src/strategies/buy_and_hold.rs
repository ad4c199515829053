use crate::models::{Bar, ParameterSet};
use crate::strategy::{Decision, Strategy};

/// Enters long on the first decidable bar and never exits. Useful as a
/// benchmark baseline.
pub struct BuyAndHoldStrategy {
    entered: bool,
}

impl BuyAndHoldStrategy {
    pub fn new(_parameters: &ParameterSet) -> Self {
        Self { entered: false }
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn warmup_bars(&self) -> usize {
        0
    }

    fn decide(&mut self, _bars: &[Bar], _index: usize) -> Decision {
        if self.entered {
            Decision::Hold
        } else {
            self.entered = true;
            Decision::EnterLong
        }
    }
}
