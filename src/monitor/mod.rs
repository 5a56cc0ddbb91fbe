//! Position monitor
//!
//! Polls active trades, evaluates exit conditions against current quotes and
//! closes trades through the order executor.

mod exit;
mod session;

pub use exit::{evaluate_exit, ExitDecision, ExitRules};
pub use session::MarketSession;

use crate::bot::Ledger;
use crate::config::{BotConfig, ConfigHandle, MonitorConfig};
use crate::execution::{ExecutionError, OrderExecutor};
use crate::feed::PriceFeed;
use crate::risk::CircuitBreaker;
use crate::trade::{ExitReason, Trade, TradeError, TradeStatus};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

/// Outcome of one monitor pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorReport {
    /// Trades evaluated against a fresh quote
    pub checked: usize,
    pub closed: Vec<Trade>,
    /// Quarantined trades left alone
    pub skipped_quarantined: usize,
    /// Trades skipped for a missing or stale quote
    pub stale_quotes: usize,
    /// Trades whose exit failed this pass
    pub failed_exits: Vec<Uuid>,
}

/// Long-lived exit monitoring loop
pub struct PositionMonitor {
    ledger: Ledger,
    executor: Arc<OrderExecutor>,
    feed: Arc<dyn PriceFeed>,
    config: ConfigHandle,
    session: MarketSession,
    settings: MonitorConfig,
}

impl PositionMonitor {
    pub fn new(
        ledger: Ledger,
        executor: Arc<OrderExecutor>,
        feed: Arc<dyn PriceFeed>,
        config: ConfigHandle,
        settings: MonitorConfig,
    ) -> Self {
        Self {
            ledger,
            executor,
            feed,
            config,
            session: MarketSession::from_config(&settings),
            settings,
        }
    }

    pub fn session(&self) -> &MarketSession {
        &self.session
    }

    fn rules(&self, config: &BotConfig, now: DateTime<Utc>) -> ExitRules {
        ExitRules {
            trailing_stop_pct: config
                .enable_trailing_stop
                .then_some(config.trailing_stop_pct),
            eod_close: config.eod_close_enabled
                && self
                    .session
                    .in_eod_window(now, config.eod_close_minutes_before),
        }
    }

    /// Evaluate every active trade once
    pub async fn poll_once(&self, now: DateTime<Utc>) -> MonitorReport {
        let config = self.config.snapshot().await;
        let breaker = CircuitBreaker::from_config(&config);
        let rules = self.rules(&config, now);
        let max_age = chrono::Duration::seconds(
            i64::try_from(self.settings.max_quote_age_secs).unwrap_or(i64::MAX),
        );
        let mut report = MonitorReport::default();

        let trades = self.ledger.active_trades().await;
        let quotes = join_all(trades.iter().map(|t| self.feed.get_quote(&t.symbol))).await;

        for (trade, quote) in trades.into_iter().zip(quotes) {
            if trade.quarantined {
                report.skipped_quarantined += 1;
                continue;
            }

            let quote = match quote {
                Ok(quote) if quote.age(now) <= max_age => quote,
                Ok(quote) => {
                    tracing::warn!(
                        trade_id = %trade.id,
                        symbol = %trade.symbol,
                        age_secs = quote.age(now).num_seconds(),
                        "Stale quote, skipping exit evaluation"
                    );
                    report.stale_quotes += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(trade_id = %trade.id, symbol = %trade.symbol, error = %e, "No quote");
                    report.stale_quotes += 1;
                    continue;
                }
            };
            report.checked += 1;

            let reason = if trade.status == TradeStatus::PendingExit {
                // Retry an exit that failed on an earlier pass
                Some(trade.exit_reason.unwrap_or(ExitReason::Manual))
            } else {
                let decision = evaluate_exit(&trade, quote.price, &rules);
                if decision.trailing_updated {
                    if let Err(e) = self
                        .ledger
                        .update_trailing(
                            trade.id,
                            decision.high_water_mark,
                            decision.trailing_stop,
                            now,
                        )
                        .await
                    {
                        tracing::error!(trade_id = %trade.id, error = %e, "Failed to update trailing stop");
                    }
                }
                decision.reason
            };

            let Some(reason) = reason else {
                continue;
            };

            tracing::info!(
                trade_id = %trade.id,
                symbol = %trade.symbol,
                price = %quote.price,
                exit_reason = reason.as_str(),
                "Exit condition met"
            );
            match self
                .executor
                .close(trade.id, reason, quote.price, &breaker)
                .await
            {
                Ok(closed) => report.closed.push(closed),
                Err(ExecutionError::StateInvariant(TradeError::OrderInFlight(_))) => {
                    tracing::debug!(trade_id = %trade.id, "Exit already in flight");
                }
                Err(e) => {
                    tracing::warn!(trade_id = %trade.id, error = %e, "Exit not completed");
                    report.failed_exits.push(trade.id);
                }
            }
        }

        report
    }

    /// Poll until `shutdown` flips to true.
    ///
    /// Outside market hours the pass is skipped unless `market_hours_only` is
    /// off. Timed-out entries are reconciled before each pass.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            poll_interval_secs = self.settings.poll_interval_secs,
            "Position monitor started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if self.settings.market_hours_only && !self.session.is_open(now) {
                        tracing::trace!("Market closed, monitor idle");
                        continue;
                    }
                    self.executor.reconcile().await;
                    let report = self.poll_once(now).await;
                    if !report.closed.is_empty() || !report.failed_exits.is_empty() {
                        tracing::info!(
                            checked = report.checked,
                            closed = report.closed.len(),
                            failed = report.failed_exits.len(),
                            "Monitor pass complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Position monitor stopping");
                        break;
                    }
                }
            }
        }
    }
}
