//! Data storage module
//!
//! Historical bars for backtests and Parquet export of backtest results

mod parquet;

pub use parquet::{
    bar_schema, equity_curve_schema, trade_log_schema, ParquetReader, ParquetWriter,
};
