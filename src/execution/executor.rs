//! Order executor
//!
//! Places bracket entries and exit orders through the [`Broker`], driving each
//! [`Trade`] through its lifecycle in the [`Ledger`].

use super::{
    with_retry, BracketOrder, Broker, BrokerError, ExecutionResult, ExitOrder, OrderAck,
    OrderSide, OrderStatus, RetryPolicy,
};
use crate::bot::{BotStatus, EntryRequest, Ledger};
use crate::config::{BotConfig, ExecutionMode};
use crate::risk::{CircuitBreaker, SizingResult};
use crate::signal::TradingSignal;
use crate::telemetry;
use crate::trade::{ExitReason, Trade, TradeError};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from executor operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("Signal {signal_id} already executed as trade {trade_id}")]
    Duplicate { signal_id: Uuid, trade_id: Uuid },
    #[error("Circuit breaker halted: {0}")]
    CircuitHalted(String),
    #[error("Bot is {} and not accepting orders", .0.as_str())]
    NotRunning(BotStatus),
    #[error("{0}")]
    LimitReached(String),
    #[error("Sizing rejected: {0}")]
    SizingRejected(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    StateInvariant(#[from] TradeError),
}

/// Places and settles orders for trades
pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    ledger: Ledger,
    retry: RetryPolicy,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Broker>, ledger: Ledger, retry: RetryPolicy) -> Self {
        Self {
            broker,
            ledger,
            retry,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Bracket order that `signal` would be entered with
    pub fn bracket_for(
        signal: &TradingSignal,
        sizing: &SizingResult,
        config: &BotConfig,
    ) -> BracketOrder {
        BracketOrder {
            symbol: signal.symbol.clone(),
            side: OrderSide::entry(signal.direction),
            quantity: sizing.quantity,
            asset_type: signal.asset_type,
            entry_price: signal.entry_price,
            stop_price: signal.effective_stop(config.default_stop_loss_pct),
            take_profit_price: signal.effective_target(config.default_take_profit_pct),
            idempotency_key: signal.id.to_string(),
        }
    }

    /// Execute a sized signal.
    ///
    /// In `signal_only` mode this only returns the order that would be sent.
    /// Otherwise the entry is reserved in the ledger, submitted with retries
    /// under the signal id as idempotency key, and settled to `open` or
    /// `error`. Broker failures never count as losses.
    pub async fn execute(
        &self,
        signal: &TradingSignal,
        sizing: &SizingResult,
        config: &BotConfig,
    ) -> ExecutionResult {
        if sizing.rejected {
            let reason = sizing.reject_reason.clone().unwrap_or_default();
            return ExecutionResult::failed(None, ExecutionError::SizingRejected(reason).to_string());
        }

        let order = Self::bracket_for(signal, sizing, config);
        if config.execution_mode == ExecutionMode::SignalOnly {
            tracing::info!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                quantity = order.quantity,
                "Signal-only mode, order not placed"
            );
            return ExecutionResult::preview(order);
        }

        let request = EntryRequest {
            signal,
            quantity: sizing.quantity,
            stop_loss_price: order.stop_price,
            take_profit_price: order.take_profit_price,
        };
        let trade = match self.ledger.reserve_entry(request, config, Utc::now()).await {
            Ok(trade) => trade,
            Err(e) => {
                tracing::info!(signal_id = %signal.id, error = %e, "Entry not reserved");
                return ExecutionResult::failed(None, e.to_string());
            }
        };

        let broker = &self.broker;
        let order_ref = &order;
        let placed = with_retry(&self.retry, "place_bracket_order", move || {
            broker.place_bracket_order(order_ref)
        })
        .await
        .and_then(accepted);

        match placed {
            Ok(ack) => {
                telemetry::record_order_placed("entry");
                let fill_price = ack.filled_avg_price.unwrap_or(order.entry_price);
                match self
                    .ledger
                    .settle_entry(trade.id, fill_price, ack.order_id.clone(), Utc::now())
                    .await
                {
                    Ok(trade) => {
                        tracing::info!(
                            trade_id = %trade.id,
                            symbol = %trade.symbol,
                            quantity = trade.quantity,
                            entry_price = %trade.entry_price,
                            order_id = %ack.order_id,
                            "Trade opened"
                        );
                        telemetry::update_bot_gauges(&self.ledger.state().await);
                        ExecutionResult::filled(trade)
                    }
                    Err(e) => {
                        self.quarantine(trade.id, &e).await;
                        ExecutionResult::failed(self.ledger.trade(trade.id).await, e.to_string())
                    }
                }
            }
            Err(e) => {
                telemetry::record_broker_error("place_bracket_order", e.kind());
                tracing::error!(
                    trade_id = %trade.id,
                    symbol = %trade.symbol,
                    error = %e,
                    "Entry order failed"
                );
                let trade = match self.ledger.fail_entry(trade.id, &e, Utc::now()).await {
                    Ok(trade) => Some(trade),
                    Err(invariant) => {
                        self.quarantine(trade.id, &invariant).await;
                        self.ledger.trade(trade.id).await
                    }
                };
                ExecutionResult::failed(trade, e.to_string())
            }
        }
    }

    /// Record a risk-approved signal for operator approval (semi-auto mode)
    pub async fn queue_for_approval(
        &self,
        signal: &TradingSignal,
        sizing: &SizingResult,
        config: &BotConfig,
    ) -> Result<Trade, ExecutionError> {
        if sizing.rejected {
            return Err(ExecutionError::SizingRejected(
                sizing.reject_reason.clone().unwrap_or_default(),
            ));
        }
        let order = Self::bracket_for(signal, sizing, config);
        let request = EntryRequest {
            signal,
            quantity: sizing.quantity,
            stop_loss_price: order.stop_price,
            take_profit_price: order.take_profit_price,
        };
        let trade = self.ledger.queue_for_approval(request, Utc::now()).await?;
        tracing::info!(trade_id = %trade.id, symbol = %trade.symbol, "Queued for approval");
        Ok(trade)
    }

    /// Cancel a trade awaiting approval. Entries already sent to the broker
    /// are refused.
    pub async fn cancel(&self, trade_id: Uuid) -> Result<Trade, ExecutionError> {
        let trade = self.ledger.cancel(trade_id, Utc::now()).await?;
        tracing::info!(trade_id = %trade.id, "Trade cancelled");
        Ok(trade)
    }

    /// Close an active trade.
    ///
    /// The exit order key is derived from the trade id, so a retry after an
    /// earlier transient failure cannot double-close. Transient failures
    /// leave the trade `pending_exit` for the next attempt; permanent ones
    /// move it to `error` and quarantine it.
    pub async fn close(
        &self,
        trade_id: Uuid,
        reason: ExitReason,
        trigger_price: Decimal,
        breaker: &CircuitBreaker,
    ) -> Result<Trade, ExecutionError> {
        let trade = self.ledger.begin_exit(trade_id, reason, Utc::now()).await?;
        // A retried exit keeps the reason it was started with
        let reason = trade.exit_reason.unwrap_or(reason);
        let order = ExitOrder {
            symbol: trade.symbol.clone(),
            side: OrderSide::exit(trade.direction),
            quantity: trade.quantity,
            asset_type: trade.asset_type,
            idempotency_key: trade.exit_key(),
        };

        let broker = &self.broker;
        let order_ref = &order;
        let placed = with_retry(&self.retry, "place_exit_order", move || {
            broker.place_exit_order(order_ref)
        })
        .await
        .and_then(accepted);

        let ack = match placed {
            Ok(ack) => ack,
            Err(e) => {
                telemetry::record_broker_error("place_exit_order", e.kind());
                if e.is_retryable() {
                    tracing::warn!(trade_id = %trade.id, error = %e, "Exit order failed, will retry");
                    self.ledger.note_exit_error(trade.id, e.to_string()).await?;
                } else {
                    tracing::error!(trade_id = %trade.id, error = %e, "Exit order rejected, quarantining trade");
                    self.ledger
                        .fail_exit(trade.id, e.to_string(), Utc::now())
                        .await?;
                }
                return Err(e.into());
            }
        };
        telemetry::record_order_placed("exit");

        let exit_price = ack.filled_avg_price.unwrap_or(trigger_price);
        let settled = match self
            .ledger
            .settle_exit(
                trade.id,
                exit_price,
                reason,
                ack.order_id.clone(),
                breaker,
                Utc::now(),
            )
            .await
        {
            Ok(settled) => settled,
            Err(e) => {
                self.quarantine(trade.id, &e).await;
                return Err(e.into());
            }
        };

        let closed = settled.trade;
        let realized = closed.realized_pl.unwrap_or_default();
        tracing::info!(
            trade_id = %closed.id,
            symbol = %closed.symbol,
            exit_reason = reason.as_str(),
            exit_price = %exit_price,
            realized_pl = %realized,
            "Trade closed"
        );
        telemetry::record_trade_closed(reason.as_str(), realized);
        telemetry::update_bot_gauges(&self.ledger.state().await);

        Ok(closed)
    }

    /// Resolve entries whose outcome is unknown after a broker timeout.
    ///
    /// Returns the trades that were updated.
    pub async fn reconcile(&self) -> Vec<Trade> {
        let mut resolved = Vec::new();

        for trade in self.ledger.awaiting_reconciliation().await {
            let key = trade.signal_id.to_string();
            let broker = &self.broker;
            let key_ref = key.as_str();
            let report = with_retry(&self.retry, "get_order_status", move || {
                broker.get_order_status(key_ref)
            })
            .await;

            let outcome = match report {
                Ok(report) if report.status.is_filled() => {
                    match self.holds_position(&trade).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(trade_id = %trade.id, symbol = %trade.symbol, "Entry reported filled but broker holds no matching position");
                            let reason = "entry filled without a broker position".to_string();
                            if let Err(e) = self.ledger.quarantine(trade.id, reason).await {
                                tracing::error!(trade_id = %trade.id, error = %e, "Failed to quarantine trade");
                            }
                            continue;
                        }
                        Err(e) => {
                            tracing::warn!(trade_id = %trade.id, error = %e, "Position lookup failed");
                            continue;
                        }
                    }
                    let price = report.filled_avg_price.unwrap_or(trade.entry_price);
                    tracing::info!(trade_id = %trade.id, order_id = %report.order_id, "Reconciled timed-out entry as filled");
                    self.ledger
                        .reconcile_fill(trade.id, price, report.order_id, Utc::now())
                        .await
                }
                Ok(report) if report.status == OrderStatus::Accepted => {
                    tracing::debug!(trade_id = %trade.id, "Entry still working at broker");
                    continue;
                }
                Ok(report) => {
                    tracing::info!(trade_id = %trade.id, status = ?report.status, "Timed-out entry never filled");
                    self.ledger.clear_reconciliation(trade.id).await
                }
                Err(BrokerError::NotFound(_)) => {
                    tracing::info!(trade_id = %trade.id, "Timed-out entry never reached broker");
                    self.ledger.clear_reconciliation(trade.id).await
                }
                Err(e) => {
                    tracing::warn!(trade_id = %trade.id, error = %e, "Reconciliation lookup failed");
                    continue;
                }
            };

            match outcome {
                Ok(trade) => resolved.push(trade),
                Err(e) => self.quarantine(trade.id, &e).await,
            }
        }

        if !resolved.is_empty() {
            telemetry::update_bot_gauges(&self.ledger.state().await);
        }
        resolved
    }

    /// Whether the broker holds at least `trade.quantity` on the trade's side
    async fn holds_position(&self, trade: &Trade) -> Result<bool, BrokerError> {
        let broker = &self.broker;
        let symbol = trade.symbol.as_str();
        let position = with_retry(&self.retry, "get_position", move || {
            broker.get_position(symbol)
        })
        .await?;

        let wanted = i64::try_from(trade.quantity).unwrap_or(i64::MAX);
        Ok(position.is_some_and(|p| match OrderSide::entry(trade.direction) {
            OrderSide::Buy => p.quantity >= wanted,
            OrderSide::Sell => p.quantity <= -wanted,
        }))
    }

    async fn quarantine(&self, trade_id: Uuid, error: &TradeError) {
        tracing::error!(trade_id = %trade_id, error = %error, "State invariant violated, quarantining trade");
        if let Err(e) = self.ledger.quarantine(trade_id, error.to_string()).await {
            tracing::error!(trade_id = %trade_id, error = %e, "Failed to quarantine trade");
        }
    }
}

/// Treat broker-side rejection statuses as errors
fn accepted(ack: OrderAck) -> Result<OrderAck, BrokerError> {
    match ack.status {
        OrderStatus::Rejected | OrderStatus::Cancelled => Err(BrokerError::Rejected(format!(
            "order {} {:?}",
            ack.order_id, ack.status
        ))),
        _ => Ok(ack),
    }
}
