use chrono::{DateTime, Utc};

/// Domain errors surfaced by the engine. Validation failures always
/// name the offending field and are raised before any simulation work
/// starts; data and simulation failures are scoped to a single run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("no bars available ({window})")]
    DataUnavailable { window: String },

    #[error("simulation failed: {0}")]
    Simulation(String),
}

impl EngineError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn no_bars(symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        EngineError::DataUnavailable {
            window: format!("{} between {} and {}", symbol, start, end),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation { .. })
    }
}
