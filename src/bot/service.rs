//! Operator boundary and control loop

use super::{BotError, BotState, BotStatus, Ledger};
use crate::backtest::{BacktestParams, BacktestPool, BacktestResult, BarSource};
use crate::config::{
    BacktestPoolConfig, BotConfig, BotConfigPatch, BrokerConfig, ConfigHandle, ExecutionMode,
    MonitorConfig,
};
use crate::execution::{
    with_retry, Account, Broker, ExecutionResult, OrderExecutor, RetryPolicy,
};
use crate::feed::PriceFeed;
use crate::monitor::{MarketSession, PositionMonitor};
use crate::risk::{CircuitBreaker, PositionSizer, RejectReason, RiskCheck, RiskGateway, SizingResult};
use crate::signal::{SignalSource, TradingSignal};
use crate::telemetry;
use crate::trade::{ExitReason, Trade, TradeFilter};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

/// External collaborators the bot talks to
#[derive(Clone)]
pub struct BotServices {
    pub broker: Arc<dyn Broker>,
    pub signals: Arc<dyn SignalSource>,
    pub feed: Arc<dyn PriceFeed>,
    pub bars: Arc<dyn BarSource>,
}

/// Everything the operator sees before deciding to execute a signal
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub signal: TradingSignal,
    /// Latest quote, if the feed has one
    pub current_price: Option<Decimal>,
    pub risk_check: RiskCheck,
    pub sizing: SizingResult,
    pub config: BotConfig,
    pub account: Account,
}

/// What one control loop cycle did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub evaluated: usize,
    pub rejected: usize,
    pub opened: usize,
    pub queued: usize,
    pub previewed: usize,
    pub failed: usize,
    pub reconciled: usize,
}

/// The trading bot: risk gateway, sizer, executor and monitor wired to one
/// ledger.
pub struct TradingBot {
    ledger: Ledger,
    executor: Arc<OrderExecutor>,
    broker: Arc<dyn Broker>,
    signals: Arc<dyn SignalSource>,
    feed: Arc<dyn PriceFeed>,
    config: ConfigHandle,
    monitor_settings: MonitorConfig,
    session: MarketSession,
    retry: RetryPolicy,
    backtests: BacktestPool,
}

impl TradingBot {
    /// Build a bot whose session starts at the broker's current equity
    pub async fn connect(
        services: BotServices,
        config: ConfigHandle,
        monitor: MonitorConfig,
        broker: &BrokerConfig,
        backtest: &BacktestPoolConfig,
    ) -> Result<Self, BotError> {
        let retry = RetryPolicy::from_config(broker);
        let broker_ref = &services.broker;
        let account =
            with_retry(&retry, "get_account", move || broker_ref.get_account()).await?;
        let ledger = Ledger::new(account.equity, Utc::now());
        let executor = Arc::new(OrderExecutor::new(
            services.broker.clone(),
            ledger.clone(),
            retry.clone(),
        ));

        tracing::info!(
            equity = %account.equity,
            buying_power = %account.buying_power,
            "Trading bot connected"
        );

        Ok(Self {
            ledger,
            executor,
            broker: services.broker,
            signals: services.signals,
            feed: services.feed,
            backtests: BacktestPool::new(backtest, config.clone(), services.bars),
            config,
            session: MarketSession::from_config(&monitor),
            monitor_settings: monitor,
            retry,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn executor(&self) -> &Arc<OrderExecutor> {
        &self.executor
    }

    async fn account(&self) -> Result<Account, BotError> {
        let broker = &self.broker;
        Ok(with_retry(&self.retry, "get_account", move || broker.get_account()).await?)
    }

    async fn signal(&self, signal_id: Uuid) -> Result<TradingSignal, BotError> {
        self.signals
            .get_signal(signal_id)
            .await
            .map_err(|e| BotError::Source(e.to_string()))?
            .ok_or(BotError::SignalNotFound(signal_id))
    }

    /// Evaluate a signal without side effects
    pub async fn preview(&self, signal_id: Uuid) -> Result<Preview, BotError> {
        let signal = self.signal(signal_id).await?;
        let config = self.config.snapshot().await;
        let account = self.account().await?;
        let state = self.ledger.state().await;

        let risk_check = RiskGateway::new(&config).evaluate(&signal, &state, &account, Utc::now());
        let sizing = PositionSizer::new(&config).size(&signal, &account);
        let current_price = match self.feed.get_quote(&signal.symbol).await {
            Ok(quote) => Some(quote.price),
            Err(e) => {
                tracing::debug!(symbol = %signal.symbol, error = %e, "No quote for preview");
                None
            }
        };

        tracing::info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            approved = risk_check.approved,
            reason = ?risk_check.reason,
            quantity = sizing.quantity,
            "Signal previewed"
        );

        Ok(Preview {
            signal,
            current_price,
            risk_check,
            sizing,
            config: (*config).clone(),
            account,
        })
    }

    /// Execute a signal on operator request.
    ///
    /// Re-runs the risk gateway and sizer on fresh snapshots; a rejection
    /// returns an error and never reaches the broker. A queued
    /// `pending_approval` trade for the signal is promoted.
    pub async fn execute(&self, signal_id: Uuid) -> Result<ExecutionResult, BotError> {
        let signal = self.signal(signal_id).await?;
        let config = self.config.snapshot().await;
        let account = self.account().await?;
        let state = self.ledger.state().await;

        let sizing = self.approve(&signal, &config, &state, &account, Utc::now())?;
        Ok(self.executor.execute(&signal, &sizing, &config).await)
    }

    /// Gateway then sizer; the first failure becomes a typed rejection
    fn approve(
        &self,
        signal: &TradingSignal,
        config: &BotConfig,
        state: &BotState,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<SizingResult, BotError> {
        if let Err(reason) = RiskGateway::new(config).check(signal, state, now) {
            telemetry::record_signal_evaluated(false, Some(reason.kind()));
            tracing::info!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                reason = %reason,
                "Signal rejected by risk gateway"
            );
            return Err(match reason {
                RejectReason::CircuitBreakerHalted(why) => BotError::CircuitHalted(why),
                other => BotError::Rejected(other.to_string()),
            });
        }
        telemetry::record_signal_evaluated(true, None);

        let sizing = PositionSizer::new(config).size(signal, account);
        if sizing.rejected {
            telemetry::record_sizing_rejected(&sizing.mode);
            let reason = sizing.reject_reason.clone().unwrap_or_default();
            tracing::info!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                mode = %sizing.mode,
                reason = %reason,
                "Signal rejected by position sizer"
            );
            return Err(BotError::Rejected(reason));
        }
        Ok(sizing)
    }

    pub async fn bot_status(&self) -> BotState {
        self.ledger.state().await
    }

    pub async fn bot_config(&self) -> Arc<BotConfig> {
        self.config.snapshot().await
    }

    pub async fn update_bot_config(
        &self,
        patch: &BotConfigPatch,
    ) -> Result<Arc<BotConfig>, BotError> {
        Ok(self.config.update(patch).await?)
    }

    pub async fn list_trades(&self, filter: &TradeFilter) -> Vec<Trade> {
        self.ledger.list_trades(filter).await
    }

    pub async fn active_trades(&self) -> Vec<Trade> {
        self.ledger.active_trades().await
    }

    /// Operator halt. In-flight broker calls still settle.
    pub async fn halt(&self, reason: &str) -> BotState {
        tracing::warn!(reason, "Operator halt");
        let state = self.ledger.halt(reason.to_string(), Utc::now()).await;
        telemetry::update_bot_gauges(&state);
        state
    }

    pub async fn pause(&self) -> BotState {
        tracing::info!("Bot paused");
        self.ledger.pause(Utc::now()).await
    }

    pub async fn resume(&self) -> BotState {
        tracing::info!("Bot resumed");
        self.ledger.resume(Utc::now()).await
    }

    /// Daily session start: counters and breaker reset, start equity taken
    /// from the broker
    pub async fn reset_session(&self) -> Result<BotState, BotError> {
        let account = self.account().await?;
        let state = self.ledger.reset_session(account.equity, Utc::now()).await;
        tracing::info!(start_equity = %state.start_equity, "Trading session reset");
        telemetry::update_bot_gauges(&state);
        Ok(state)
    }

    pub async fn override_circuit_breaker(&self) -> BotState {
        let state = self.ledger.override_breaker(Utc::now()).await;
        tracing::warn!("Circuit breaker overridden by operator");
        telemetry::update_bot_gauges(&state);
        state
    }

    /// Cancel a queued trade; entries already at the broker are refused
    pub async fn cancel_trade(&self, trade_id: Uuid) -> Result<Trade, BotError> {
        Ok(self.executor.cancel(trade_id).await?)
    }

    pub async fn release_quarantine(&self, trade_id: Uuid) -> Result<Trade, BotError> {
        let trade = self.ledger.release_quarantine(trade_id).await?;
        tracing::info!(trade_id = %trade_id, "Trade released from quarantine");
        Ok(trade)
    }

    /// Close an active trade at market on operator request
    pub async fn close_trade(&self, trade_id: Uuid) -> Result<Trade, BotError> {
        let trade = self
            .ledger
            .trade(trade_id)
            .await
            .ok_or(crate::trade::TradeError::NotFound(trade_id))?;
        let price = self
            .feed
            .get_quote(&trade.symbol)
            .await
            .map_err(|e| BotError::Source(e.to_string()))?
            .price;
        let config = self.config.snapshot().await;
        let breaker = CircuitBreaker::from_config(&config);
        Ok(self
            .executor
            .close(trade_id, ExitReason::Manual, price, &breaker)
            .await?)
    }

    pub async fn run_backtest(&self, params: BacktestParams) -> Result<Uuid, BotError> {
        Ok(self.backtests.submit(params).await?)
    }

    pub async fn backtest(&self, id: Uuid) -> Result<BacktestResult, BotError> {
        self.backtests
            .get(id)
            .await
            .ok_or(BotError::BacktestNotFound(id))
    }

    pub async fn wait_backtest(&self, id: Uuid) -> Result<BacktestResult, BotError> {
        Ok(self.backtests.wait(id).await?)
    }

    pub async fn list_backtests(&self) -> Vec<BacktestResult> {
        self.backtests.list().await
    }

    pub async fn cancel_backtest(&self, id: Uuid) -> Result<(), BotError> {
        self.backtests.cancel(id).await?;
        Ok(())
    }

    /// One control loop cycle: reconcile, then route every new active
    /// signal by execution mode.
    ///
    /// Full-auto entries run as separate tasks and the cycle waits for them
    /// before returning.
    pub async fn cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            reconciled: self.executor.reconcile().await.len(),
            ..CycleReport::default()
        };

        let status = self.ledger.state().await.status;
        if status != BotStatus::Running {
            tracing::debug!(status = status.as_str(), "Bot not running, skipping signals");
            return report;
        }

        let signals = match self.signals.list_active_signals(now).await {
            Ok(signals) => signals,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list active signals");
                return report;
            }
        };
        if signals.is_empty() {
            return report;
        }

        let config = self.config.snapshot().await;
        let account = match self.account().await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to fetch account, skipping cycle");
                return report;
            }
        };

        let mut entries = JoinSet::new();
        for signal in signals {
            if self.ledger.trade_for_signal(signal.id).await.is_some() {
                continue;
            }
            report.evaluated += 1;

            let state = self.ledger.state().await;
            let sizing = match self.approve(&signal, &config, &state, &account, now) {
                Ok(sizing) => sizing,
                Err(_) => {
                    report.rejected += 1;
                    continue;
                }
            };

            match config.execution_mode {
                ExecutionMode::SignalOnly => {
                    let order = OrderExecutor::bracket_for(&signal, &sizing, &config);
                    tracing::info!(
                        signal_id = %signal.id,
                        symbol = %order.symbol,
                        side = ?order.side,
                        quantity = order.quantity,
                        entry = %order.entry_price,
                        stop = %order.stop_price,
                        target = %order.take_profit_price,
                        "Signal-only preview"
                    );
                    report.previewed += 1;
                }
                ExecutionMode::SemiAuto => {
                    match self.executor.queue_for_approval(&signal, &sizing, &config).await {
                        Ok(_) => report.queued += 1,
                        Err(e) => {
                            tracing::warn!(signal_id = %signal.id, error = %e, "Failed to queue signal");
                            report.failed += 1;
                        }
                    }
                }
                ExecutionMode::FullAuto => {
                    let executor = self.executor.clone();
                    let config = config.clone();
                    entries.spawn(async move { executor.execute(&signal, &sizing, &config).await });
                }
            }
        }

        while let Some(joined) = entries.join_next().await {
            match joined {
                Ok(result) if result.success => report.opened += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "Execution task failed");
                    report.failed += 1;
                }
            }
        }

        if report.evaluated > 0 {
            tracing::info!(
                evaluated = report.evaluated,
                rejected = report.rejected,
                opened = report.opened,
                queued = report.queued,
                "Signal cycle complete"
            );
        }
        report
    }

    /// Run the control loop and the position monitor until `shutdown`
    /// flips to true
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let monitor = PositionMonitor::new(
            self.ledger.clone(),
            self.executor.clone(),
            self.feed.clone(),
            self.config.clone(),
            self.monitor_settings.clone(),
        );
        let monitor_shutdown = shutdown.clone();
        let monitor_task = tokio::spawn(async move { monitor.run(monitor_shutdown).await });

        let mut interval = tokio::time::interval(Duration::from_secs(
            self.monitor_settings.signal_interval_secs.max(1),
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            signal_interval_secs = self.monitor_settings.signal_interval_secs,
            "Control loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = Utc::now();
                    if self.monitor_settings.market_hours_only && !self.session.is_open(now) {
                        continue;
                    }
                    self.cycle(now).await;
                    telemetry::update_bot_gauges(&self.ledger.state().await);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = monitor_task.await {
            tracing::error!(error = %e, "Position monitor task failed");
        }
        self.ledger.stop(Utc::now()).await;
        tracing::info!("Control loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::InMemoryBarSource;
    use crate::config::tests::test_bot_config;
    use crate::execution::PaperBroker;
    use crate::feed::StaticPriceFeed;
    use crate::risk::CircuitBreakerState;
    use crate::signal::{test_signal, InMemorySignalSource};
    use crate::trade::TradeStatus;
    use rust_decimal_macros::dec;

    struct Harness {
        bot: TradingBot,
        broker: Arc<PaperBroker>,
        signals: Arc<InMemorySignalSource>,
        feed: StaticPriceFeed,
    }

    async fn harness(config: BotConfig) -> Harness {
        let feed = StaticPriceFeed::new();
        let broker = Arc::new(PaperBroker::new(dec!(100000)).with_feed(Arc::new(feed.clone())));
        let signals = Arc::new(InMemorySignalSource::new());
        let services = BotServices {
            broker: broker.clone(),
            signals: signals.clone(),
            feed: Arc::new(feed.clone()),
            bars: Arc::new(InMemoryBarSource::new()),
        };
        let broker_config = BrokerConfig {
            request_timeout_ms: 200,
            max_retries: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            ..BrokerConfig::default()
        };
        let monitor = MonitorConfig {
            market_hours_only: false,
            ..MonitorConfig::default()
        };
        let bot = TradingBot::connect(
            services,
            ConfigHandle::new(config).unwrap(),
            monitor,
            &broker_config,
            &BacktestPoolConfig::default(),
        )
        .await
        .unwrap();
        Harness {
            bot,
            broker,
            signals,
            feed,
        }
    }

    impl Harness {
        async fn add(&self, signal: &TradingSignal) {
            self.signals.insert(signal.clone()).await;
            self.feed.set_price(&signal.symbol, signal.entry_price).await;
        }
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let h = harness(test_bot_config()).await;
        let signal = test_signal("AAPL", dec!(185.50));
        h.add(&signal).await;

        let before = h.bot.bot_status().await;
        let preview = h.bot.preview(signal.id).await.unwrap();
        let again = h.bot.preview(signal.id).await.unwrap();

        assert!(preview.risk_check.approved);
        assert_eq!(preview.sizing.quantity, 13);
        assert_eq!(preview.sizing.notional, dec!(2411.50));
        assert_eq!(preview.current_price, Some(dec!(185.50)));
        assert_eq!(preview.account.equity, dec!(100000));
        assert_eq!(again.risk_check, preview.risk_check);
        assert_eq!(h.broker.order_count().await, 0);
        assert!(h.bot.list_trades(&TradeFilter::default()).await.is_empty());
        assert_eq!(h.bot.bot_status().await, before);
    }

    #[tokio::test]
    async fn test_execute_refuses_rejected_signal() {
        let h = harness(test_bot_config()).await;
        let mut signal = test_signal("AAPL", dec!(185.50));
        signal.confidence_score = dec!(40);
        h.add(&signal).await;

        assert!(!h.bot.preview(signal.id).await.unwrap().risk_check.approved);
        let err = h.bot.execute(signal.id).await.unwrap_err();

        assert!(matches!(err, BotError::Rejected(ref r) if r.contains("Confidence")));
        assert_eq!(h.broker.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_execute_twice_creates_one_trade() {
        let h = harness(test_bot_config()).await;
        let signal = test_signal("AAPL", dec!(185.50));
        h.add(&signal).await;

        let first = h.bot.execute(signal.id).await.unwrap();
        assert!(first.success);
        assert_eq!(first.trade.unwrap().status, TradeStatus::Open);

        let second = h.bot.execute(signal.id).await.unwrap();
        assert!(!second.success);
        assert!(second.error.unwrap().contains("already executed"));
        assert_eq!(h.bot.list_trades(&TradeFilter::default()).await.len(), 1);
        assert_eq!(h.broker.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_signal() {
        let h = harness(test_bot_config()).await;
        let id = Uuid::new_v4();
        assert!(matches!(
            h.bot.preview(id).await,
            Err(BotError::SignalNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_full_auto_cycle_opens_trades() {
        let h = harness(test_bot_config()).await;
        h.add(&test_signal("AAPL", dec!(185.50))).await;
        h.add(&test_signal("MSFT", dec!(410))).await;

        let report = h.bot.cycle(Utc::now()).await;
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.opened, 2);
        assert_eq!(h.bot.active_trades().await.len(), 2);
        assert_eq!(h.bot.bot_status().await.open_positions, 2);

        // Already-handled signals are not evaluated again
        let report = h.bot.cycle(Utc::now()).await;
        assert_eq!(report.evaluated, 0);
    }

    #[tokio::test]
    async fn test_full_auto_cycle_respects_open_position_limit() {
        let mut config = test_bot_config();
        config.max_open_positions = 1;
        let h = harness(config).await;
        h.add(&test_signal("AAPL", dec!(185.50))).await;
        h.add(&test_signal("MSFT", dec!(410))).await;

        let report = h.bot.cycle(Utc::now()).await;
        assert_eq!(report.opened, 1);
        assert_eq!(h.bot.bot_status().await.open_positions, 1);
    }

    #[tokio::test]
    async fn test_signal_only_cycle_places_nothing() {
        let mut config = test_bot_config();
        config.execution_mode = ExecutionMode::SignalOnly;
        let h = harness(config).await;
        let signal = test_signal("AAPL", dec!(185.50));
        h.add(&signal).await;

        let report = h.bot.cycle(Utc::now()).await;
        assert_eq!(report.previewed, 1);
        assert_eq!(h.broker.order_count().await, 0);

        let result = h.bot.execute(signal.id).await.unwrap();
        assert!(result.preview.is_some());
        assert_eq!(h.broker.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_semi_auto_queue_then_approve() {
        let mut config = test_bot_config();
        config.execution_mode = ExecutionMode::SemiAuto;
        let h = harness(config).await;
        let signal = test_signal("AAPL", dec!(185.50));
        h.add(&signal).await;

        let report = h.bot.cycle(Utc::now()).await;
        assert_eq!(report.queued, 1);
        let queued = h.bot.list_trades(&TradeFilter::default()).await;
        assert_eq!(queued[0].status, TradeStatus::PendingApproval);
        assert_eq!(h.broker.order_count().await, 0);

        let result = h.bot.execute(signal.id).await.unwrap();
        assert!(result.success);
        let trade = result.trade.unwrap();
        assert_eq!(trade.id, queued[0].id);
        assert_eq!(trade.status, TradeStatus::Open);
    }

    #[tokio::test]
    async fn test_semi_auto_cancel_queued_trade() {
        let mut config = test_bot_config();
        config.execution_mode = ExecutionMode::SemiAuto;
        let h = harness(config).await;
        h.add(&test_signal("AAPL", dec!(185.50))).await;
        h.bot.cycle(Utc::now()).await;

        let queued = h.bot.list_trades(&TradeFilter::default()).await;
        let cancelled = h.bot.cancel_trade(queued[0].id).await.unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_halt_blocks_dispatch_until_resumed() {
        let h = harness(test_bot_config()).await;
        let signal = test_signal("AAPL", dec!(185.50));
        h.add(&signal).await;

        let state = h.bot.halt("manual review").await;
        assert_eq!(state.status, BotStatus::Halted);
        assert_eq!(h.bot.cycle(Utc::now()).await.evaluated, 0);
        assert!(matches!(
            h.bot.execute(signal.id).await,
            Err(BotError::Rejected(_))
        ));

        h.bot.resume().await;
        assert_eq!(h.bot.cycle(Utc::now()).await.opened, 1);
    }

    #[tokio::test]
    async fn test_breaker_reset_and_override() {
        let h = harness(test_bot_config()).await;
        for symbol in ["AAPL", "MSFT", "NVDA"] {
            let signal = test_signal(symbol, dec!(100));
            h.add(&signal).await;
            let trade = h.bot.execute(signal.id).await.unwrap().trade.unwrap();
            h.feed.set_price(symbol, dec!(97)).await;
            h.bot.close_trade(trade.id).await.unwrap();
        }
        assert_eq!(
            h.bot.bot_status().await.circuit_breaker,
            CircuitBreakerState::Halted
        );

        let signal = test_signal("AMD", dec!(150));
        h.add(&signal).await;
        let err = h.bot.execute(signal.id).await.unwrap_err();
        assert!(matches!(err, BotError::CircuitHalted(ref r) if r.contains("consecutive losses")));

        let state = h.bot.override_circuit_breaker().await;
        assert_eq!(state.circuit_breaker, CircuitBreakerState::None);
        assert_eq!(state.consecutive_losses, 0);
        assert!(h.bot.execute(signal.id).await.unwrap().success);

        let state = h.bot.reset_session().await.unwrap();
        assert_eq!(state.daily_trades, 0);
        assert_eq!(state.open_positions, 1);
        assert!(state.start_equity < dec!(100000));
    }

    #[tokio::test]
    async fn test_manual_close() {
        let h = harness(test_bot_config()).await;
        let signal = test_signal("AAPL", dec!(100));
        h.add(&signal).await;
        let trade = h.bot.execute(signal.id).await.unwrap().trade.unwrap();
        h.feed.set_price("AAPL", dec!(101)).await;

        let closed = h.bot.close_trade(trade.id).await.unwrap();
        assert_eq!(closed.exit_reason, Some(ExitReason::Manual));
        assert_eq!(closed.realized_pl, Some(dec!(25)));
        assert_eq!(h.bot.bot_status().await.daily_wins, 1);
    }

    #[tokio::test]
    async fn test_invalid_config_update_rejected() {
        let h = harness(test_bot_config()).await;
        let patch = BotConfigPatch {
            max_position_size: Some(dec!(-5)),
            ..BotConfigPatch::default()
        };
        assert!(matches!(
            h.bot.update_bot_config(&patch).await,
            Err(BotError::Config(_))
        ));
        assert_eq!(h.bot.bot_config().await.max_position_size, dec!(10000));

        let patch = BotConfigPatch {
            max_daily_trades: Some(20),
            ..BotConfigPatch::default()
        };
        assert_eq!(h.bot.update_bot_config(&patch).await.unwrap().max_daily_trades, 20);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(test_bot_config()).await;
        let (tx, rx) = watch::channel(false);
        let bot = Arc::new(h.bot);
        let runner = bot.clone();
        let task = tokio::spawn(async move { runner.run(rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bot.bot_status().await.status, BotStatus::Stopped);
    }
}
