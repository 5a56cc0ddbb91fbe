//! Parquet storage for bars and backtest output

use crate::backtest::{BacktestResult, Bar, EquityPoint, SimulatedTrade};
use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

/// Decimal columns are stored as strings to keep full precision
fn decimal_field(name: &str) -> Field {
    Field::new(name, DataType::Utf8, false)
}

fn timestamps(values: impl Iterator<Item = i64>) -> ArrayRef {
    Arc::new(TimestampMicrosecondArray::from(values.collect::<Vec<_>>()).with_timezone("UTC"))
}

fn strings<T: ToString>(values: impl Iterator<Item = T>) -> ArrayRef {
    let values: Vec<String> = values.map(|v| v.to_string()).collect();
    Arc::new(StringArray::from(values))
}

/// OHLCV bar schema
pub fn bar_schema() -> Schema {
    Schema::new(vec![
        timestamp_field("timestamp"),
        decimal_field("open"),
        decimal_field("high"),
        decimal_field("low"),
        decimal_field("close"),
        decimal_field("volume"),
    ])
}

/// Simulated trade log schema
pub fn trade_log_schema() -> Schema {
    Schema::new(vec![
        Field::new("symbol", DataType::Utf8, false),
        Field::new("direction", DataType::Utf8, false),
        Field::new("quantity", DataType::UInt64, false),
        timestamp_field("entry_time"),
        decimal_field("entry_price"),
        timestamp_field("exit_time"),
        decimal_field("exit_price"),
        Field::new("exit_reason", DataType::Utf8, false),
        decimal_field("pnl"),
        decimal_field("pnl_pct"),
    ])
}

/// Equity curve schema
pub fn equity_curve_schema() -> Schema {
    Schema::new(vec![timestamp_field("timestamp"), decimal_field("value")])
}

/// Writes Parquet files into one output directory
pub struct ParquetWriter {
    output_dir: PathBuf,
}

impl ParquetWriter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self { output_dir }
    }

    /// Ensure output directory exists
    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.parquet", name))
    }

    fn write(&self, path: &Path, schema: Schema, columns: Vec<ArrayRef>) -> anyhow::Result<()> {
        self.ensure_dir()?;
        let schema = Arc::new(schema);
        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        let batch = RecordBatch::try_new(schema, columns)?;
        writer.write(&batch)?;
        writer.close()?;
        Ok(())
    }

    /// Write bars, oldest first
    pub fn write_bars(&self, path: &Path, bars: &[Bar]) -> anyhow::Result<()> {
        if bars.is_empty() {
            return Ok(());
        }
        self.write(
            path,
            bar_schema(),
            vec![
                timestamps(bars.iter().map(|b| b.timestamp.timestamp_micros())),
                strings(bars.iter().map(|b| b.open)),
                strings(bars.iter().map(|b| b.high)),
                strings(bars.iter().map(|b| b.low)),
                strings(bars.iter().map(|b| b.close)),
                strings(bars.iter().map(|b| b.volume)),
            ],
        )?;
        tracing::debug!(path = ?path, count = bars.len(), "Wrote bars to Parquet");
        Ok(())
    }

    pub fn write_trade_log(&self, path: &Path, trades: &[SimulatedTrade]) -> anyhow::Result<()> {
        if trades.is_empty() {
            return Ok(());
        }
        let directions = trades.iter().map(|t| match t.direction {
            crate::signal::Direction::Long => "long",
            crate::signal::Direction::Short => "short",
        });
        self.write(
            path,
            trade_log_schema(),
            vec![
                strings(trades.iter().map(|t| t.symbol.as_str())),
                strings(directions),
                Arc::new(UInt64Array::from(
                    trades.iter().map(|t| t.quantity).collect::<Vec<_>>(),
                )),
                timestamps(trades.iter().map(|t| t.entry_time.timestamp_micros())),
                strings(trades.iter().map(|t| t.entry_price)),
                timestamps(trades.iter().map(|t| t.exit_time.timestamp_micros())),
                strings(trades.iter().map(|t| t.exit_price)),
                strings(trades.iter().map(|t| t.exit_reason.as_str())),
                strings(trades.iter().map(|t| t.pnl)),
                strings(trades.iter().map(|t| t.pnl_pct)),
            ],
        )?;
        tracing::debug!(path = ?path, count = trades.len(), "Wrote trade log to Parquet");
        Ok(())
    }

    pub fn write_equity_curve(&self, path: &Path, curve: &[EquityPoint]) -> anyhow::Result<()> {
        if curve.is_empty() {
            return Ok(());
        }
        self.write(
            path,
            equity_curve_schema(),
            vec![
                timestamps(curve.iter().map(|p| p.timestamp.timestamp_micros())),
                strings(curve.iter().map(|p| p.value)),
            ],
        )?;
        tracing::debug!(path = ?path, count = curve.len(), "Wrote equity curve to Parquet");
        Ok(())
    }

    /// Export a result's trade log and equity curve as
    /// `backtest_<id>_trades.parquet` and `backtest_<id>_equity.parquet`
    pub fn export_backtest(&self, result: &BacktestResult) -> anyhow::Result<(PathBuf, PathBuf)> {
        let trades_path = self.file_path(&format!("backtest_{}_trades", result.id));
        let equity_path = self.file_path(&format!("backtest_{}_equity", result.id));
        self.write_trade_log(&trades_path, &result.trade_log)?;
        self.write_equity_curve(&equity_path, &result.equity_curve)?;
        tracing::info!(
            backtest_id = %result.id,
            trades = ?trades_path,
            equity = ?equity_path,
            "Exported backtest"
        );
        Ok((trades_path, equity_path))
    }
}

/// Reader for Parquet files
pub struct ParquetReader {
    path: PathBuf,
}

impl ParquetReader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Read bars written by [`ParquetWriter::write_bars`]
    pub fn read_bars(&self) -> anyhow::Result<Vec<Bar>> {
        let file = File::open(&self.path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut bars = Vec::new();
        for batch in reader {
            let batch = batch?;
            let ts = batch
                .column(0)
                .as_any()
                .downcast_ref::<TimestampMicrosecondArray>()
                .ok_or_else(|| anyhow::anyhow!("Invalid timestamp column"))?;
            let column = |i: usize, name: &'static str| {
                batch
                    .column(i)
                    .as_any()
                    .downcast_ref::<StringArray>()
                    .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
            };
            let open = column(1, "open")?;
            let high = column(2, "high")?;
            let low = column(3, "low")?;
            let close = column(4, "close")?;
            let volume = column(5, "volume")?;

            for i in 0..batch.num_rows() {
                bars.push(Bar {
                    timestamp: DateTime::from_timestamp_micros(ts.value(i))
                        .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))?,
                    open: Decimal::from_str(open.value(i))?,
                    high: Decimal::from_str(high.value(i))?,
                    low: Decimal::from_str(low.value(i))?,
                    close: Decimal::from_str(close.value(i))?,
                    volume: Decimal::from_str(volume.value(i))?,
                });
            }
        }

        Ok(bars)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}
