use anyhow::{anyhow, Result};
use std::collections::HashMap;

/// Runtime knobs shared by every simulation in a process: cost model,
/// default capital and worker sizing. Strategy parameters never live
/// here; they travel with each request.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub trade_fee_rate: f64,
    pub trade_slippage_rate: f64,
    pub initial_capital: f64,
    /// Overrides the core-count default for optimizer worker pools.
    pub worker_threads: Option<usize>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            trade_fee_rate: 0.001,
            trade_slippage_rate: 0.0005,
            initial_capital: 100_000.0,
            worker_threads: None,
        }
    }
}

impl EngineSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let trade_fee_rate = require_setting_f64(settings, "TRADE_FEE_RATE", Some(0.0), Some(1.0))?;
        let trade_slippage_rate =
            require_setting_f64(settings, "TRADE_SLIPPAGE_RATE", Some(0.0), Some(1.0))?;
        let initial_capital =
            require_setting_f64(settings, "BACKTEST_INITIAL_CAPITAL", Some(0.0), None)?;
        if initial_capital <= 0.0 {
            return Err(anyhow!(
                "Setting BACKTEST_INITIAL_CAPITAL must be positive (value: {})",
                initial_capital
            ));
        }
        let worker_threads = optional_setting_usize(settings, "WORKER_THREADS", 1)?;

        Ok(Self {
            trade_fee_rate,
            trade_slippage_rate,
            initial_capital,
            worker_threads,
        })
    }
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn require_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<f64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(value)
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(raw) = settings.get(key).map(|value| value.trim()) else {
        return Ok(None);
    };
    if raw.is_empty() {
        return Ok(None);
    }
    let value = raw
        .parse::<usize>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> HashMap<String, String> {
        HashMap::from([
            ("TRADE_FEE_RATE".to_string(), "0.001".to_string()),
            ("TRADE_SLIPPAGE_RATE".to_string(), "0.0005".to_string()),
            ("BACKTEST_INITIAL_CAPITAL".to_string(), "50000".to_string()),
        ])
    }

    #[test]
    fn parses_required_settings() {
        let settings = EngineSettings::from_settings_map(&base_settings()).unwrap();
        assert_eq!(settings.trade_fee_rate, 0.001);
        assert_eq!(settings.initial_capital, 50_000.0);
        assert!(settings.worker_threads.is_none());
    }

    #[test]
    fn rejects_missing_and_malformed_values() {
        let mut settings = base_settings();
        settings.remove("TRADE_FEE_RATE");
        assert!(EngineSettings::from_settings_map(&settings).is_err());

        let mut settings = base_settings();
        settings.insert("BACKTEST_INITIAL_CAPITAL".to_string(), "lots".to_string());
        assert!(EngineSettings::from_settings_map(&settings).is_err());

        let mut settings = base_settings();
        settings.insert("WORKER_THREADS".to_string(), "0".to_string());
        assert!(EngineSettings::from_settings_map(&settings).is_err());
    }
}
