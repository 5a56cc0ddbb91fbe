//! Historical bar replay sources

use super::BacktestError;
use crate::data::ParquetReader;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// OHLCV bar, stamped at its close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Loads bars for a symbol and timeframe.
///
/// Called from blocking worker threads, so implementations may do file I/O.
pub trait BarSource: Send + Sync {
    /// Bars dated `start..=end`, oldest first
    fn load(
        &self,
        symbol: &str,
        timeframe: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, BacktestError>;
}

fn in_range(bars: impl IntoIterator<Item = Bar>, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
    let mut bars: Vec<Bar> = bars
        .into_iter()
        .filter(|b| {
            let date = b.timestamp.date_naive();
            date >= start && date <= end
        })
        .collect();
    bars.sort_by_key(|b| b.timestamp);
    bars
}

/// Bars held in memory, keyed by symbol and timeframe
#[derive(Debug, Default, Clone)]
pub struct InMemoryBarSource {
    bars: HashMap<(String, String), Vec<Bar>>,
}

impl InMemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(mut self, symbol: &str, timeframe: &str, bars: Vec<Bar>) -> Self {
        self.insert(symbol, timeframe, bars);
        self
    }

    pub fn insert(&mut self, symbol: &str, timeframe: &str, bars: Vec<Bar>) {
        self.bars
            .insert((symbol.to_uppercase(), timeframe.to_string()), bars);
    }
}

impl BarSource for InMemoryBarSource {
    fn load(
        &self,
        symbol: &str,
        timeframe: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, BacktestError> {
        let bars = self
            .bars
            .get(&(symbol.to_uppercase(), timeframe.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(in_range(bars, start, end))
    }
}

/// Bars stored as `<SYMBOL>_<timeframe>.parquet` files in one directory
#[derive(Debug, Clone)]
pub struct ParquetBarSource {
    data_dir: PathBuf,
}

impl ParquetBarSource {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn path_for(&self, symbol: &str, timeframe: &str) -> PathBuf {
        self.data_dir
            .join(format!("{}_{}.parquet", symbol.to_uppercase(), timeframe))
    }
}

impl BarSource for ParquetBarSource {
    fn load(
        &self,
        symbol: &str,
        timeframe: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, BacktestError> {
        let path = self.path_for(symbol, timeframe);
        if !path.exists() {
            return Err(BacktestError::NoData {
                symbol: symbol.to_string(),
                timeframe: timeframe.to_string(),
            });
        }
        let bars = ParquetReader::new(path.clone())
            .read_bars()
            .map_err(|e| BacktestError::Data(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = ?path, count = bars.len(), "Loaded bars");
        Ok(in_range(bars, start, end))
    }
}
