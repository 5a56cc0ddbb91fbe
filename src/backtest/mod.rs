//! Backtesting module
//!
//! Replays historical bars through the live risk gateway and position sizer
//! with a synthetic clock and a simplified fill model.

mod analytics;
mod execution_model;
mod pool;
mod replay;
mod rules;
mod simulator;

pub use analytics::{compute_metrics, periods_per_year, BacktestMetrics};
pub use execution_model::{FillModel, SimulatedPosition};
pub use pool::BacktestPool;
pub use replay::{Bar, BarSource, InMemoryBarSource, ParquetBarSource};
pub use rules::SignalRule;
pub use simulator::{BacktestSimulator, SimulationOutput};

use crate::signal::Direction;
use crate::trade::ExitReason;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Parameters of one backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub symbol: String,
    /// Signal rule name, also checked against allowed strategies
    pub strategy: String,
    pub timeframe: String,
    /// First bar date, inclusive
    pub start: NaiveDate,
    /// Last bar date, inclusive
    pub end: NaiveDate,
    pub initial_capital: Decimal,
    /// Percent of equity committed per trade
    pub position_pct: Decimal,
}

impl BacktestParams {
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.symbol.trim().is_empty() {
            return Err(BacktestError::InvalidParams("symbol is empty".into()));
        }
        if self.end < self.start {
            return Err(BacktestError::InvalidParams(format!(
                "end {} is before start {}",
                self.end, self.start
            )));
        }
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::InvalidParams(format!(
                "initial_capital must be positive (got {})",
                self.initial_capital
            )));
        }
        if self.position_pct <= Decimal::ZERO || self.position_pct > Decimal::ONE_HUNDRED {
            return Err(BacktestError::InvalidParams(format!(
                "position_pct must be in (0, 100] (got {})",
                self.position_pct
            )));
        }
        if SignalRule::from_strategy(&self.strategy).is_none() {
            return Err(BacktestError::UnknownStrategy(self.strategy.clone()));
        }
        Ok(())
    }
}

/// Run lifecycle: `pending -> running -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacktestStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BacktestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BacktestStatus::Completed | BacktestStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BacktestStatus::Pending => "pending",
            BacktestStatus::Running => "running",
            BacktestStatus::Completed => "completed",
            BacktestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BacktestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One point of the equity curve, marked at bar close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

/// A round trip taken by the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub symbol: String,
    pub direction: Direction,
    pub quantity: u64,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    pub exit_reason: ExitReason,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
}

/// Outcome of a backtest run. Frozen once `status` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: Uuid,
    pub params: BacktestParams,
    pub status: BacktestStatus,
    pub metrics: Option<BacktestMetrics>,
    pub equity_curve: Vec<EquityPoint>,
    pub trade_log: Vec<SimulatedTrade>,
    /// Signals the risk gateway turned away
    pub rejected_signals: u32,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BacktestResult {
    /// A freshly queued run
    pub fn pending(id: Uuid, params: BacktestParams, now: DateTime<Utc>) -> Self {
        Self {
            id,
            params,
            status: BacktestStatus::Pending,
            metrics: None,
            equity_curve: Vec::new(),
            trade_log: Vec::new(),
            rejected_signals: 0,
            error: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Format as table for CLI output
    pub fn format_table(&self) -> String {
        let Some(m) = &self.metrics else {
            return format!(
                "Backtest {} {}: {}\n",
                self.id,
                self.status,
                self.error.as_deref().unwrap_or("no results yet")
            );
        };
        let profit_factor = m
            .profit_factor
            .map(|pf| format!("{:.2}", pf))
            .unwrap_or_else(|| "n/a".to_string());

        format!(
            r#"
══════════════════════════════════════════════════════
               BACKTEST RESULTS
══════════════════════════════════════════════════════
{} {} {} ({} to {})

PERFORMANCE
───────────────────────────────────────────────────────
Final Equity:     {:.2}
Total Return:     {:+.2}%
Sharpe Ratio:     {:.2}
Max Drawdown:     {:.2}%
Win Rate:         {:.1}%
Profit Factor:    {}

ACTIVITY
───────────────────────────────────────────────────────
Total Trades:     {}
Winning Trades:   {}
Losing Trades:    {}
Rejected Signals: {}
══════════════════════════════════════════════════════
"#,
            self.params.symbol,
            self.params.strategy,
            self.params.timeframe,
            self.params.start,
            self.params.end,
            m.final_equity,
            m.total_return_pct,
            m.sharpe_ratio,
            m.max_drawdown_pct,
            m.win_rate,
            profit_factor,
            m.total_trades,
            m.winning_trades,
            m.losing_trades,
            self.rejected_signals,
        )
    }
}

/// Backtest errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("Invalid backtest parameters: {0}")]
    InvalidParams(String),
    #[error("Unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error("No bars for {symbol} {timeframe} in range")]
    NoData { symbol: String, timeframe: String },
    #[error("Failed to load bars: {0}")]
    Data(String),
    #[error("Backtest cancelled")]
    Cancelled,
    #[error("Backtest timed out after {0}s")]
    TimedOut(u64),
    #[error("Backtest {0} not found")]
    NotFound(Uuid),
    #[error("Backtest {0} already finished")]
    AlreadyFinished(Uuid),
    #[error("Backtest worker failed: {0}")]
    Worker(String),
}
