use crate::error::EngineError;
use crate::models::{Bar, Timeframe};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const BAR_SNAPSHOT_VERSION: u32 = 1;

/// Read access to historical bars. Implementations return the bars
/// whose timestamps fall in the half-open window `[start, end)`, sorted
/// ascending, or `DataUnavailable` when the window is empty.
pub trait BarProvider: Send + Sync {
    fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError>;
}

/// In-memory bar series keyed by symbol and timeframe. Series are
/// sorted and deduplicated on insert so lookups are a binary-searchable
/// slice scan.
#[derive(Debug, Default)]
pub struct BarStore {
    series: HashMap<(String, Timeframe), Vec<Bar>>,
}

impl BarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_series(&mut self, symbol: &str, timeframe: Timeframe, mut bars: Vec<Bar>) {
        bars.sort_by_key(|bar| bar.timestamp);
        bars.dedup_by_key(|bar| bar.timestamp);
        self.series.insert((symbol.to_string(), timeframe), bars);
    }

    pub fn symbols(&self) -> Vec<(String, Timeframe)> {
        self.series.keys().cloned().collect()
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading bar snapshot from {}", path.display());
        let file = File::open(path)
            .with_context(|| format!("Failed to open bar snapshot at {}", path.display()))?;
        let reader = BufReader::new(file);
        let snapshot: BarSnapshot =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;
        if snapshot.version != BAR_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Bar snapshot version mismatch (found {}, expected {})",
                snapshot.version,
                BAR_SNAPSHOT_VERSION
            ));
        }

        let mut store = BarStore::new();
        for series in snapshot.series {
            store.insert_series(&series.symbol, series.timeframe, series.bars);
        }
        Ok(store)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }
        let file = File::create(path)
            .with_context(|| format!("Unable to create bar snapshot at {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        let snapshot = BarSnapshot {
            version: BAR_SNAPSHOT_VERSION,
            series: self
                .series
                .iter()
                .map(|((symbol, timeframe), bars)| SnapshotSeries {
                    symbol: symbol.clone(),
                    timeframe: *timeframe,
                    bars: bars.clone(),
                })
                .collect(),
        };
        bincode::serialize_into(&mut writer, &snapshot)
            .context("Failed to serialize bar snapshot")?;
        writer
            .flush()
            .context("Failed to flush bar snapshot to disk")?;
        info!("Saved bar snapshot to {}", path.display());
        Ok(())
    }
}

impl BarProvider for BarStore {
    fn bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, EngineError> {
        let unavailable = || EngineError::no_bars(symbol, start, end);
        let series = self
            .series
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(unavailable)?;

        let from = series.partition_point(|bar| bar.timestamp < start);
        let to = series.partition_point(|bar| bar.timestamp < end);
        if from >= to {
            return Err(unavailable());
        }
        Ok(series[from..to].to_vec())
    }
}

#[derive(Serialize, Deserialize)]
struct BarSnapshot {
    version: u32,
    series: Vec<SnapshotSeries>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotSeries {
    symbol: String,
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

/// Deterministic synthetic price series for demos and tests: a random
/// walk that alternates between up-trending and down-trending regimes
/// every 50 bars, so trend-following and mean-reversion strategies both
/// have something to chew on.
pub fn synthetic_bars(
    seed: u64,
    count: usize,
    start: DateTime<Utc>,
    timeframe: Timeframe,
) -> Vec<Bar> {
    let step = match timeframe {
        Timeframe::M1 => Duration::minutes(1),
        Timeframe::M5 => Duration::minutes(5),
        Timeframe::M15 => Duration::minutes(15),
        Timeframe::H1 => Duration::hours(1),
        Timeframe::H4 => Duration::hours(4),
        Timeframe::D1 => Duration::days(1),
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut price: f64 = 100.0;
    let mut bars = Vec::with_capacity(count);

    for i in 0..count {
        let drift = if (i / 50) % 2 == 0 { 0.0008 } else { -0.0005 };
        let noise: f64 = rng.gen_range(-0.01..0.01);
        let open = price;
        let close = (open * (1.0 + drift + noise)).max(1.0);
        let wick: f64 = rng.gen_range(0.0..0.005);
        let high = open.max(close) * (1.0 + wick);
        let low = open.min(close) * (1.0 - wick);
        let volume = rng.gen_range(1_000.0..10_000.0);

        bars.push(Bar {
            timestamp: start + step * i as i32,
            open,
            high,
            low,
            close,
            volume,
        });
        price = close;
    }

    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store_with_daily_bars(count: usize) -> (BarStore, DateTime<Utc>) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let bars = synthetic_bars(7, count, start, Timeframe::D1);
        let mut store = BarStore::new();
        store.insert_series("BTCUSD", Timeframe::D1, bars);
        (store, start)
    }

    #[test]
    fn window_is_half_open() {
        let (store, start) = store_with_daily_bars(10);
        let end = start + Duration::days(5);
        let bars = store.bars("BTCUSD", Timeframe::D1, start, end).unwrap();
        assert_eq!(bars.len(), 5);
        assert_eq!(bars[0].timestamp, start);
        assert_eq!(bars[4].timestamp, start + Duration::days(4));

        // Adjacent windows tile without overlap.
        let next = store
            .bars("BTCUSD", Timeframe::D1, end, end + Duration::days(5))
            .unwrap();
        assert_eq!(next[0].timestamp, end);
    }

    #[test]
    fn empty_window_is_data_unavailable() {
        let (store, start) = store_with_daily_bars(10);
        let err = store
            .bars("BTCUSD", Timeframe::D1, start - Duration::days(30), start)
            .unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
        assert!(store
            .bars("ETHUSD", Timeframe::D1, start, start + Duration::days(1))
            .is_err());
    }

    #[test]
    fn insert_sorts_and_dedupes() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut bars = synthetic_bars(7, 5, start, Timeframe::D1);
        bars.reverse();
        bars.push(bars[0].clone());
        let mut store = BarStore::new();
        store.insert_series("BTCUSD", Timeframe::D1, bars);
        let loaded = store
            .bars("BTCUSD", Timeframe::D1, start, start + Duration::days(10))
            .unwrap();
        assert_eq!(loaded.len(), 5);
        assert!(loaded.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn synthetic_bars_are_deterministic() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let a = synthetic_bars(42, 100, start, Timeframe::H1);
        let b = synthetic_bars(42, 100, start, Timeframe::H1);
        assert_eq!(a, b);
        assert!(a.iter().all(|bar| bar.low <= bar.open
            && bar.low <= bar.close
            && bar.high >= bar.open
            && bar.high >= bar.close));
    }

    #[test]
    fn snapshot_round_trip() {
        let (store, start) = store_with_daily_bars(20);
        let dir = std::env::temp_dir().join("backlab-snapshot-test");
        let path = dir.join("bars.bin");
        store.save_to_file(&path).unwrap();
        let loaded = BarStore::load_from_file(&path).unwrap();
        let original = store
            .bars("BTCUSD", Timeframe::D1, start, start + Duration::days(20))
            .unwrap();
        let restored = loaded
            .bars("BTCUSD", Timeframe::D1, start, start + Duration::days(20))
            .unwrap();
        assert_eq!(original, restored);
        std::fs::remove_dir_all(dir).ok();
    }
}
