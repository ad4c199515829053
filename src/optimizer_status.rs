use std::sync::{Arc, Mutex};

/// Shared progress handle for a running optimization. Cloned into
/// worker threads and polled by whoever launched the run.
#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total_combinations: usize,
    completed_combinations: usize,
    failed_combinations: usize,
    best_score: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total_combinations: usize,
    pub completed_combinations: usize,
    pub failed_combinations: usize,
    pub best_score: Option<f64>,
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(
        &self,
        total_combinations: usize,
        completed_combinations: usize,
        failed_combinations: usize,
        best_score: Option<f64>,
    ) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_combinations = total_combinations;
            data.completed_combinations = completed_combinations;
            data.failed_combinations = failed_combinations;
            data.best_score = best_score;
        }
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total_combinations: data.total_combinations,
                completed_combinations: data.completed_combinations,
                failed_combinations: data.failed_combinations,
                best_score: data.best_score,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_combinations: 0,
                completed_combinations: 0,
                failed_combinations: 0,
                best_score: None,
            }
        }
    }
}
