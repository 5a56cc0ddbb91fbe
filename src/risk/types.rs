//! Risk management types

use crate::bot::BotStatus;
use crate::signal::SignalStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Outcome of the risk gateway for one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub approved: bool,
    /// Concrete reason for a rejection
    pub reason: Option<String>,
    /// Non-blocking near-threshold notices
    pub warnings: Vec<String>,
}

impl RiskCheck {
    pub fn approve(warnings: Vec<String>) -> Self {
        Self {
            approved: true,
            reason: None,
            warnings,
        }
    }

    pub fn reject(reason: &RejectReason, warnings: Vec<String>) -> Self {
        Self {
            approved: false,
            reason: Some(reason.to_string()),
            warnings,
        }
    }
}

/// Hard gate failures, in gateway check order
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("Circuit breaker halted: {0}")]
    CircuitBreakerHalted(String),
    #[error("Bot is {} and not accepting signals", .0.as_str())]
    BotNotRunning(BotStatus),
    #[error("Signal is not active (status {0:?})")]
    SignalInactive(SignalStatus),
    #[error("Signal expired")]
    SignalExpired,
    #[error("Strategy '{0}' is not in allowed strategies")]
    StrategyNotAllowed(String),
    #[error("Timeframe '{0}' is not in allowed timeframes")]
    TimeframeNotAllowed(String),
    #[error("Options trading is disabled")]
    OptionsDisabled,
    #[error("Confidence score {score} below minimum {min}")]
    ConfidenceTooLow { score: Decimal, min: Decimal },
    #[error("Risk/reward {ratio} below minimum {min}")]
    RiskRewardTooLow { ratio: Decimal, min: Decimal },
    #[error("Max daily trades reached ({count}/{max})")]
    DailyTradeLimit { count: u32, max: u32 },
    #[error("Max open positions reached ({open}/{max})")]
    MaxOpenPositions { open: u32, max: u32 },
    #[error("Daily loss limit reached (P&L {pl}, limit -{max})")]
    DailyLossLimit { pl: Decimal, max: Decimal },
    #[error("Max drawdown reached ({drawdown_pct}% >= {max}%)")]
    MaxDrawdown { drawdown_pct: Decimal, max: Decimal },
}

impl RejectReason {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RejectReason::CircuitBreakerHalted(_) => "circuit_breaker",
            RejectReason::BotNotRunning(_) => "bot_not_running",
            RejectReason::SignalInactive(_) => "signal_inactive",
            RejectReason::SignalExpired => "signal_expired",
            RejectReason::StrategyNotAllowed(_) => "strategy",
            RejectReason::TimeframeNotAllowed(_) => "timeframe",
            RejectReason::OptionsDisabled => "options_disabled",
            RejectReason::ConfidenceTooLow { .. } => "confidence",
            RejectReason::RiskRewardTooLow { .. } => "risk_reward",
            RejectReason::DailyTradeLimit { .. } => "daily_trades",
            RejectReason::MaxOpenPositions { .. } => "open_positions",
            RejectReason::DailyLossLimit { .. } => "daily_loss",
            RejectReason::MaxDrawdown { .. } => "drawdown",
        }
    }
}

/// Output of the position sizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    /// Shares, or contracts for options
    pub quantity: u64,
    /// Capital committed: quantity * entry price * contract multiplier
    pub notional: Decimal,
    pub rejected: bool,
    pub reject_reason: Option<String>,
    /// Sizing mode that produced this result
    pub mode: String,
}

impl SizingResult {
    pub fn sized(quantity: u64, notional: Decimal, mode: &str) -> Self {
        Self {
            quantity,
            notional,
            rejected: false,
            reject_reason: None,
            mode: mode.to_string(),
        }
    }

    pub fn rejected(reason: &SizingRejection, mode: &str) -> Self {
        Self {
            quantity: 0,
            notional: Decimal::ZERO,
            rejected: true,
            reject_reason: Some(reason.to_string()),
            mode: mode.to_string(),
        }
    }
}

/// Reasons the sizer declines a signal
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SizingRejection {
    #[error("Invalid entry price {0}")]
    InvalidEntryPrice(Decimal),
    #[error("Stop loss equals entry price; risk per share is zero")]
    ZeroStopDistance,
    #[error("Sized quantity is zero (budget {budget} < unit cost {unit_cost})")]
    ZeroQuantity { budget: Decimal, unit_cost: Decimal },
    #[error("Position cap {cap} leaves less than one unit at {unit_cost}")]
    CappedToZero { cap: Decimal, unit_cost: Decimal },
    #[error("Position cap {cap} leaves less than one option contract at {unit_cost}")]
    BelowOneContract { cap: Decimal, unit_cost: Decimal },
    #[error("Option premium {premium} per contract exceeds max {max}")]
    OptionPremiumTooHigh { premium: Decimal, max: Decimal },
    #[error("No buying power available")]
    NoBuyingPower,
}
