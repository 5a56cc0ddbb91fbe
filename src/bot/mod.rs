//! Trading bot
//!
//! Session state, the single-writer ledger, and the operator-facing
//! [`TradingBot`] with its control loop

mod ledger;
mod service;
mod state;

pub use ledger::{EntryRequest, ExitSettlement, Ledger};
pub use service::{BotServices, CycleReport, Preview, TradingBot};
pub use state::{BotState, BotStatus};

use crate::backtest::BacktestError;
use crate::config::ConfigError;
use crate::execution::{BrokerError, ExecutionError};
use crate::trade::TradeError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced at the operator boundary
#[derive(Debug, Error)]
pub enum BotError {
    /// Risk gateway or sizer declined the signal
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Circuit breaker halted: {0}")]
    CircuitHalted(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    StateInvariant(#[from] TradeError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("Signal {0} not found")]
    SignalNotFound(Uuid),
    #[error("Backtest {0} not found")]
    BacktestNotFound(Uuid),
    #[error(transparent)]
    Backtest(BacktestError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// Signal source or price feed unavailable
    #[error("Data source error: {0}")]
    Source(String),
}

impl From<BacktestError> for BotError {
    fn from(e: BacktestError) -> Self {
        match e {
            BacktestError::NotFound(id) => BotError::BacktestNotFound(id),
            other => BotError::Backtest(other),
        }
    }
}
