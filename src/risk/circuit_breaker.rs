//! Loss-driven circuit breaker

use crate::bot::BotState;
use crate::config::BotConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Breaker level. Ordered so that `max` picks the worse state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitBreakerState {
    None,
    Warning,
    Halted,
}

impl CircuitBreakerState {
    /// Numeric level for gauges
    pub fn level(&self) -> f64 {
        match self {
            CircuitBreakerState::None => 0.0,
            CircuitBreakerState::Warning => 1.0,
            CircuitBreakerState::Halted => 2.0,
        }
    }
}

/// Reason for a breaker trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HaltReason {
    /// Loss streak reached the configured limit
    ConsecutiveLosses { count: u32, limit: u32 },
    /// Daily P&L fell to or below the configured percentage
    DailyLoss { pl_pct: Decimal, limit_pct: Decimal },
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::ConsecutiveLosses { count, limit } => {
                write!(f, "{} consecutive losses (limit {})", count, limit)
            }
            HaltReason::DailyLoss { pl_pct, limit_pct } => {
                write!(f, "daily P&L {}% at or below -{}%", pl_pct, limit_pct)
            }
        }
    }
}

/// A state change produced by [`CircuitBreaker::apply`]
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerTransition {
    pub from: CircuitBreakerState,
    pub to: CircuitBreakerState,
    pub reason: Option<HaltReason>,
}

/// Evaluates breaker thresholds against bot state after each trade close.
///
/// Within a session the breaker only ever worsens; only
/// [`BotState::reset_session`] or an explicit operator override clears it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    /// Loss streak that halts trading
    pub consecutive_losses: u32,
    /// Daily loss percentage that halts trading
    pub daily_loss_pct: Decimal,
    /// Fraction of either limit that raises a warning
    pub warning_ratio: Decimal,
}

impl CircuitBreaker {
    pub fn new(consecutive_losses: u32, daily_loss_pct: Decimal, warning_ratio: Decimal) -> Self {
        Self {
            consecutive_losses,
            daily_loss_pct,
            warning_ratio,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            config.circuit_breaker_consecutive_losses,
            config.circuit_breaker_daily_loss_pct,
            config.warning_ratio,
        )
    }

    /// Level implied by the current counters alone
    pub fn evaluate(&self, state: &BotState) -> (CircuitBreakerState, Option<HaltReason>) {
        if state.consecutive_losses >= self.consecutive_losses {
            return (
                CircuitBreakerState::Halted,
                Some(HaltReason::ConsecutiveLosses {
                    count: state.consecutive_losses,
                    limit: self.consecutive_losses,
                }),
            );
        }

        if state.daily_pl_pct <= -self.daily_loss_pct {
            return (
                CircuitBreakerState::Halted,
                Some(HaltReason::DailyLoss {
                    pl_pct: state.daily_pl_pct,
                    limit_pct: self.daily_loss_pct,
                }),
            );
        }

        let losses_warn = state.consecutive_losses > 0
            && Decimal::from(state.consecutive_losses)
                >= Decimal::from(self.consecutive_losses) * self.warning_ratio;
        let loss_warn = state.daily_pl_pct < Decimal::ZERO
            && -state.daily_pl_pct >= self.daily_loss_pct * self.warning_ratio;
        if losses_warn || loss_warn {
            return (CircuitBreakerState::Warning, None);
        }

        (CircuitBreakerState::None, None)
    }

    /// Move the breaker in `state` to the worse of its current and implied level
    pub fn apply(&self, state: &mut BotState) -> Option<BreakerTransition> {
        let (implied, reason) = self.evaluate(state);
        let from = state.circuit_breaker;
        let to = from.max(implied);
        if to == from {
            return None;
        }

        state.circuit_breaker = to;
        if to == CircuitBreakerState::Halted {
            state.halt_reason = reason.as_ref().map(|r| r.to_string());
            tracing::error!(
                reason = ?state.halt_reason,
                consecutive_losses = state.consecutive_losses,
                daily_pl_pct = %state.daily_pl_pct,
                "Circuit breaker HALTED"
            );
        } else {
            tracing::warn!(
                consecutive_losses = state.consecutive_losses,
                daily_pl_pct = %state.daily_pl_pct,
                "Circuit breaker warning"
            );
        }

        Some(BreakerTransition { from, to, reason })
    }
}
