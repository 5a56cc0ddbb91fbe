//! Shared bot state and trade book
//!
//! [`BotState`] and every [`Trade`] live behind one lock. Each method holds it
//! exclusively for exactly one trade transition, so concurrent closes cannot
//! lose updates to the daily counters and `open_positions` always matches the
//! number of active trades.

use super::{BotState, BotStatus};
use crate::config::BotConfig;
use crate::execution::{BrokerError, ExecutionError};
use crate::risk::{BreakerTransition, CircuitBreaker, CircuitBreakerState};
use crate::signal::TradingSignal;
use crate::trade::{ExitReason, Trade, TradeError, TradeFilter, TradeStatus, TradeStore};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Book {
    state: BotState,
    trades: TradeStore,
}

impl Book {
    fn sync_open_positions(&mut self) {
        self.state.open_positions = u32::try_from(self.trades.active_count()).unwrap_or(u32::MAX);
    }
}

/// Entry reservation parameters
#[derive(Debug, Clone)]
pub struct EntryRequest<'a> {
    pub signal: &'a TradingSignal,
    pub quantity: u64,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
}

/// Result of settling an exit
#[derive(Debug, Clone)]
pub struct ExitSettlement {
    pub trade: Trade,
    pub breaker: Option<BreakerTransition>,
}

/// Single-writer store for bot state and trades
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<RwLock<Book>>,
}

impl Ledger {
    pub fn new(start_equity: Decimal, now: DateTime<Utc>) -> Self {
        Self::from_state(BotState::new(start_equity, now))
    }

    pub fn from_state(state: BotState) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Book {
                state,
                trades: TradeStore::new(),
            })),
        }
    }

    /// Snapshot of the bot state
    pub async fn state(&self) -> BotState {
        self.inner.read().await.state.clone()
    }

    pub async fn trade(&self, id: Uuid) -> Option<Trade> {
        self.inner.read().await.trades.get(id).cloned()
    }

    pub async fn trade_for_signal(&self, signal_id: Uuid) -> Option<Trade> {
        self.inner.read().await.trades.for_signal(signal_id).cloned()
    }

    pub async fn list_trades(&self, filter: &TradeFilter) -> Vec<Trade> {
        self.inner.read().await.trades.list(filter)
    }

    /// Trades holding a position
    pub async fn active_trades(&self) -> Vec<Trade> {
        self.inner.read().await.trades.active()
    }

    pub async fn awaiting_reconciliation(&self) -> Vec<Trade> {
        self.inner.read().await.trades.awaiting_reconciliation()
    }

    /// Record a risk-approved signal awaiting operator approval
    pub async fn queue_for_approval(
        &self,
        request: EntryRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        let mut book = self.inner.write().await;
        if let Some(existing) = book.trades.for_signal(request.signal.id) {
            return Err(ExecutionError::Duplicate {
                signal_id: request.signal.id,
                trade_id: existing.id,
            });
        }
        let trade = Trade::from_signal(
            request.signal,
            request.quantity,
            request.stop_loss_price,
            request.take_profit_price,
            TradeStatus::PendingApproval,
            now,
        );
        insert(&mut book, trade)
    }

    /// Reserve an entry slot for `signal` and move its trade to `pending_entry`.
    ///
    /// Re-checks the halt and limit gates under the lock, counting entries
    /// already in flight, so concurrent executions cannot overshoot the limits
    /// the gateway saw. A queued `pending_approval` trade for the signal is
    /// promoted; any other existing trade is a duplicate.
    pub async fn reserve_entry(
        &self,
        request: EntryRequest<'_>,
        config: &BotConfig,
        now: DateTime<Utc>,
    ) -> Result<Trade, ExecutionError> {
        let mut book = self.inner.write().await;

        if book.state.circuit_breaker == CircuitBreakerState::Halted {
            let reason = book.state.halt_reason.clone().unwrap_or_default();
            return Err(ExecutionError::CircuitHalted(reason));
        }
        if book.state.status != BotStatus::Running {
            return Err(ExecutionError::NotRunning(book.state.status));
        }

        let queued = match book.trades.for_signal(request.signal.id) {
            Some(t) if t.status == TradeStatus::PendingApproval => Some(t.id),
            Some(t) => {
                return Err(ExecutionError::Duplicate {
                    signal_id: request.signal.id,
                    trade_id: t.id,
                })
            }
            None => None,
        };

        let in_flight = u32::try_from(book.trades.in_flight_entries()).unwrap_or(u32::MAX);
        if book.state.daily_trades.saturating_add(in_flight) >= config.max_daily_trades {
            return Err(ExecutionError::LimitReached(format!(
                "Max daily trades reached ({} filled, {} in flight, max {})",
                book.state.daily_trades, in_flight, config.max_daily_trades
            )));
        }
        if book.state.open_positions.saturating_add(in_flight) >= config.max_open_positions {
            return Err(ExecutionError::LimitReached(format!(
                "Max open positions reached ({} open, {} in flight, max {})",
                book.state.open_positions, in_flight, config.max_open_positions
            )));
        }

        match queued {
            Some(id) => {
                let trade = book.trades.get_mut(id)?;
                trade.quantity = request.quantity;
                trade.transition(TradeStatus::PendingEntry, now)?;
                Ok(trade.clone())
            }
            None => {
                let trade = Trade::from_signal(
                    request.signal,
                    request.quantity,
                    request.stop_loss_price,
                    request.take_profit_price,
                    TradeStatus::PendingEntry,
                    now,
                );
                insert(&mut book, trade)
            }
        }
    }

    /// Broker confirmed the entry: `pending_entry -> open`
    pub async fn settle_entry(
        &self,
        trade_id: Uuid,
        fill_price: Decimal,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.mark_open(fill_price, order_id, now)?;
        let trade = trade.clone();
        book.state.record_entry(now);
        book.sync_open_positions();
        Ok(trade)
    }

    /// Broker failed the entry: `pending_entry -> error`.
    ///
    /// No loss counters change. Ambiguous failures are flagged for
    /// reconciliation against the broker.
    pub async fn fail_entry(
        &self,
        trade_id: Uuid,
        error: &BrokerError,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.mark_error(error.to_string(), now)?;
        trade.needs_reconciliation = error.is_ambiguous();
        Ok(trade.clone())
    }

    /// Reconciliation found a fill for a timed-out entry: `error -> open`
    pub async fn reconcile_fill(
        &self,
        trade_id: Uuid,
        fill_price: Decimal,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.reconcile_fill(fill_price, order_id, now)?;
        let trade = trade.clone();
        book.state.record_entry(now);
        book.sync_open_positions();
        Ok(trade)
    }

    /// Reconciliation found no fill: the trade stays in `error`
    pub async fn clear_reconciliation(&self, trade_id: Uuid) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.needs_reconciliation = false;
        Ok(trade.clone())
    }

    /// Move a pre-open trade to `cancelled`.
    ///
    /// A trade is `pending_entry` only while its bracket order is at the
    /// broker, so cancelling one is refused; it settles to `open` or `error`
    /// and is closed from there.
    pub async fn cancel(&self, trade_id: Uuid, now: DateTime<Utc>) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        if trade.status == TradeStatus::PendingEntry {
            return Err(TradeError::OrderInFlight(trade_id));
        }
        trade.transition(TradeStatus::Cancelled, now)?;
        Ok(trade.clone())
    }

    /// Claim the exit of a trade: `open -> pending_exit`, recording the
    /// intended exit reason.
    ///
    /// A `pending_exit` trade whose last exit attempt failed is claimed again
    /// with its original reason. Only one caller holds the claim; any other
    /// gets [`TradeError::OrderInFlight`] until the exit settles or fails.
    pub async fn begin_exit(
        &self,
        trade_id: Uuid,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        if trade.quarantined {
            return Err(TradeError::Quarantined(trade_id));
        }
        if trade.exit_in_flight {
            return Err(TradeError::OrderInFlight(trade_id));
        }
        if trade.status != TradeStatus::PendingExit {
            trade.transition(TradeStatus::PendingExit, now)?;
            trade.exit_reason = Some(reason);
        }
        trade.exit_in_flight = true;
        Ok(trade.clone())
    }

    /// Broker confirmed the exit: `pending_exit -> closed`, then fold the
    /// realized P&L into the daily aggregates and evaluate the breaker.
    ///
    /// Settling a trade that is already closed by the same exit order is a
    /// no-op and folds nothing a second time.
    pub async fn settle_exit(
        &self,
        trade_id: Uuid,
        exit_price: Decimal,
        reason: ExitReason,
        order_id: String,
        breaker: &CircuitBreaker,
        now: DateTime<Utc>,
    ) -> Result<ExitSettlement, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        if trade.status == TradeStatus::Closed
            && trade.exit_order_id.as_ref() == Some(&order_id)
        {
            return Ok(ExitSettlement {
                trade: trade.clone(),
                breaker: None,
            });
        }
        trade.mark_closed(exit_price, reason, order_id, now)?;
        trade.exit_in_flight = false;
        let trade = trade.clone();

        let realized = trade.realized_pl.unwrap_or_default();
        book.state.record_close(realized, now);
        book.sync_open_positions();
        let transition = breaker.apply(&mut book.state);

        Ok(ExitSettlement {
            trade,
            breaker: transition,
        })
    }

    /// Record a transient exit failure; the trade stays `pending_exit`
    pub async fn note_exit_error(&self, trade_id: Uuid, message: String) -> Result<(), TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.error = Some(message);
        trade.exit_in_flight = false;
        Ok(())
    }

    /// Permanent exit failure: move to `error` and quarantine for review
    pub async fn fail_exit(
        &self,
        trade_id: Uuid,
        message: String,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.exit_in_flight = false;
        trade.mark_error(message, now)?;
        trade.quarantined = true;
        let trade = trade.clone();
        book.sync_open_positions();
        Ok(trade)
    }

    /// Persist a trailing stop update
    pub async fn update_trailing(
        &self,
        trade_id: Uuid,
        high_water_mark: Decimal,
        trailing_stop: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.high_water_mark = Some(high_water_mark);
        trade.trailing_stop_price = trailing_stop;
        trade.updated_at = now;
        Ok(())
    }

    /// Exclude a trade from automated handling
    pub async fn quarantine(&self, trade_id: Uuid, reason: String) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.quarantined = true;
        trade.error = Some(reason);
        Ok(trade.clone())
    }

    /// Return a quarantined trade to automated handling. Any exit claim left
    /// by the failed attempt is dropped.
    pub async fn release_quarantine(&self, trade_id: Uuid) -> Result<Trade, TradeError> {
        let mut book = self.inner.write().await;
        let trade = book.trades.get_mut(trade_id)?;
        trade.quarantined = false;
        trade.exit_in_flight = false;
        Ok(trade.clone())
    }

    /// Operator halt: stop dispatching new entries immediately
    pub async fn halt(&self, reason: String, now: DateTime<Utc>) -> BotState {
        let mut book = self.inner.write().await;
        book.state.status = BotStatus::Halted;
        book.state.halt_reason = Some(reason);
        book.state.updated_at = now;
        book.state.clone()
    }

    pub async fn pause(&self, now: DateTime<Utc>) -> BotState {
        self.set_status(BotStatus::Paused, now).await
    }

    pub async fn resume(&self, now: DateTime<Utc>) -> BotState {
        self.set_status(BotStatus::Running, now).await
    }

    pub async fn stop(&self, now: DateTime<Utc>) -> BotState {
        self.set_status(BotStatus::Stopped, now).await
    }

    async fn set_status(&self, status: BotStatus, now: DateTime<Utc>) -> BotState {
        let mut book = self.inner.write().await;
        book.state.status = status;
        if status == BotStatus::Running && book.state.circuit_breaker != CircuitBreakerState::Halted
        {
            book.state.halt_reason = None;
        }
        book.state.updated_at = now;
        book.state.clone()
    }

    /// Daily session start: reset counters and the breaker
    pub async fn reset_session(&self, equity: Decimal, now: DateTime<Utc>) -> BotState {
        let mut book = self.inner.write().await;
        book.state.reset_session(equity, now);
        book.sync_open_positions();
        book.state.clone()
    }

    /// Operator override of a tripped breaker
    pub async fn override_breaker(&self, now: DateTime<Utc>) -> BotState {
        let mut book = self.inner.write().await;
        book.state.circuit_breaker = CircuitBreakerState::None;
        book.state.consecutive_losses = 0;
        if book.state.status != BotStatus::Halted {
            book.state.halt_reason = None;
        }
        book.state.updated_at = now;
        book.state.clone()
    }
}

fn insert(book: &mut Book, trade: Trade) -> Result<Trade, ExecutionError> {
    let signal_id = trade.signal_id;
    match book.trades.insert(trade) {
        Ok(trade) => Ok(trade.clone()),
        Err(trade_id) => Err(ExecutionError::Duplicate {
            signal_id,
            trade_id,
        }),
    }
}
