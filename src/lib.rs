//! tradegate: automated execution layer for trading signals
//!
//! This library provides the core components for:
//! - Pre-trade risk gateway and position sizing
//! - Bracket order execution with retries and reconciliation
//! - Position monitoring with stop, target, trailing and end-of-day exits
//! - Circuit breaker on consecutive losses and daily loss
//! - Backtesting on historical bars with a bounded run pool
//! - Parquet storage for bars and backtest output
//! - Structured logging and Prometheus metrics

pub mod backtest;
pub mod bot;
pub mod cli;
pub mod config;
pub mod data;
pub mod execution;
pub mod feed;
pub mod monitor;
pub mod risk;
pub mod signal;
pub mod telemetry;
pub mod trade;
