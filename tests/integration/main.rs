//! Integration tests for tradegate

mod backtest_test;
mod common;
mod config_test;
mod pipeline_test;
