//! Backtest command implementation

use super::print_json;
use crate::backtest::{BacktestParams, BacktestPool, BacktestStatus, ParquetBarSource};
use crate::config::{Config, ConfigHandle};
use crate::data::ParquetWriter;
use chrono::NaiveDate;
use clap::Args;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct BacktestArgs {
    /// Symbol to replay
    #[arg(long)]
    pub symbol: String,

    /// Signal rule: breakout, momentum or sma_cross
    #[arg(long, default_value = "breakout")]
    pub strategy: String,

    /// Bar timeframe, e.g. 1d or 1h
    #[arg(long, default_value = "1d")]
    pub timeframe: String,

    /// First date (YYYY-MM-DD)
    #[arg(long)]
    pub start: NaiveDate,

    /// Last date (YYYY-MM-DD)
    #[arg(long)]
    pub end: NaiveDate,

    /// Initial capital
    #[arg(long, default_value = "100000")]
    pub capital: Decimal,

    /// Percent of equity per trade
    #[arg(long, default_value = "10")]
    pub position_pct: Decimal,

    /// Directory containing Parquet bar files (overrides config)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Write trade log and equity curve to this directory
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Output format: json or table
    #[arg(long, default_value = "table")]
    pub format: String,
}

impl BacktestArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let params = BacktestParams {
            symbol: self.symbol.clone(),
            strategy: self.strategy.clone(),
            timeframe: self.timeframe.clone(),
            start: self.start,
            end: self.end,
            initial_capital: self.capital,
            position_pct: self.position_pct,
        };
        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| config.backtest.data_dir.clone());

        let pool = BacktestPool::new(
            &config.backtest,
            ConfigHandle::new(config.bot.clone())?,
            Arc::new(ParquetBarSource::new(data_dir)),
        );
        tracing::info!(symbol = %params.symbol, strategy = %params.strategy, "Running backtest");
        let id = pool.submit(params).await?;
        let result = pool.wait(id).await?;

        if let Some(dir) = &self.output {
            if result.status == BacktestStatus::Completed {
                ParquetWriter::new(dir.clone()).export_backtest(&result)?;
            }
        }

        match self.format.as_str() {
            "json" => print_json(&result)?,
            _ => println!("{}", result.format_table()),
        }

        if result.status == BacktestStatus::Failed {
            anyhow::bail!(
                "Backtest failed: {}",
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(())
    }
}
