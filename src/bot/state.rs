//! Bot-wide session state

use crate::risk::CircuitBreakerState;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operating status of the bot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Running,
    Paused,
    Halted,
    Stopped,
}

impl BotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Running => "running",
            BotStatus::Paused => "paused",
            BotStatus::Halted => "halted",
            BotStatus::Stopped => "stopped",
        }
    }
}

/// Singleton session state. Daily counters reset at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub status: BotStatus,
    pub circuit_breaker: CircuitBreakerState,
    /// Why the bot or the breaker halted, if it did
    pub halt_reason: Option<String>,
    pub consecutive_losses: u32,
    pub daily_pl: Decimal,
    pub daily_pl_pct: Decimal,
    pub daily_trades: u32,
    pub daily_wins: u32,
    pub daily_losses: u32,
    pub open_positions: u32,
    pub start_equity: Decimal,
    pub current_equity: Decimal,
    /// Largest drawdown from `start_equity` seen this session, in percent
    pub max_drawdown_today: Decimal,
    pub session_started_at: DateTime<Utc>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BotState {
    /// Fresh running state for a session starting with `start_equity`
    pub fn new(start_equity: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            status: BotStatus::Running,
            circuit_breaker: CircuitBreakerState::None,
            halt_reason: None,
            consecutive_losses: 0,
            daily_pl: Decimal::ZERO,
            daily_pl_pct: Decimal::ZERO,
            daily_trades: 0,
            daily_wins: 0,
            daily_losses: 0,
            open_positions: 0,
            start_equity,
            current_equity: start_equity,
            max_drawdown_today: Decimal::ZERO,
            session_started_at: now,
            last_trade_at: None,
            updated_at: now,
        }
    }

    /// Decline of current equity from session start, in percent
    pub fn drawdown_pct(&self) -> Decimal {
        if self.start_equity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.start_equity - self.current_equity) / self.start_equity * Decimal::ONE_HUNDRED
    }

    /// Count a filled entry
    pub fn record_entry(&mut self, now: DateTime<Utc>) {
        self.daily_trades += 1;
        self.last_trade_at = Some(now);
        self.updated_at = now;
    }

    /// Fold a realized P&L into the daily aggregates.
    ///
    /// A win (`pl > 0`) resets the loss streak; anything else extends it.
    /// `daily_trades` is not touched here: it counts entry fills and is
    /// incremented by [`BotState::record_entry`].
    pub fn record_close(&mut self, realized_pl: Decimal, now: DateTime<Utc>) {
        self.daily_pl += realized_pl;
        self.current_equity += realized_pl;
        self.daily_pl_pct = if self.start_equity > Decimal::ZERO {
            (self.daily_pl / self.start_equity * Decimal::ONE_HUNDRED).round_dp(4)
        } else {
            Decimal::ZERO
        };

        if realized_pl > Decimal::ZERO {
            self.daily_wins += 1;
            self.consecutive_losses = 0;
        } else {
            self.daily_losses += 1;
            self.consecutive_losses += 1;
        }

        self.max_drawdown_today = self.max_drawdown_today.max(self.drawdown_pct());
        self.last_trade_at = Some(now);
        self.updated_at = now;
    }

    /// Start a new trading session: clear daily counters and the breaker
    pub fn reset_session(&mut self, equity: Decimal, now: DateTime<Utc>) {
        let open_positions = self.open_positions;
        let status = match self.status {
            BotStatus::Stopped => BotStatus::Stopped,
            BotStatus::Paused => BotStatus::Paused,
            BotStatus::Running | BotStatus::Halted => BotStatus::Running,
        };
        *self = Self::new(equity, now);
        self.open_positions = open_positions;
        self.status = status;
    }
}
