//! Shared builders for integration tests

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tradegate::backtest::{Bar, InMemoryBarSource};
use tradegate::bot::{BotServices, TradingBot};
use tradegate::config::{
    BacktestPoolConfig, BotConfig, BrokerConfig, ConfigHandle, MonitorConfig,
};
use tradegate::execution::PaperBroker;
use tradegate::feed::StaticPriceFeed;
use tradegate::monitor::PositionMonitor;
use tradegate::signal::{
    AssetType, Direction, InMemorySignalSource, SignalStatus, TradingSignal,
};
use uuid::Uuid;

pub const BOT_TOML: &str = r#"
    execution_mode = "full_auto"
    sizing_mode = "fixed_dollar"
    fixed_dollar_amount = 2500
    max_position_size = 10000
    max_daily_trades = 10
    max_daily_loss = 1000
    max_open_positions = 20
    max_drawdown_pct = 10
    min_confidence_score = 60
    min_risk_reward = 1.5
    allowed_strategies = ["breakout", "momentum"]
    allowed_timeframes = ["1d", "1h"]
    eod_close_enabled = false
    circuit_breaker_consecutive_losses = 3
    circuit_breaker_daily_loss_pct = 3
"#;

pub fn bot_config() -> BotConfig {
    toml::from_str(BOT_TOML).unwrap()
}

/// Active long breakout signal with a 2% stop and 4% target
pub fn signal(symbol: &str, entry_price: Decimal) -> TradingSignal {
    let now = Utc::now();
    TradingSignal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        direction: Direction::Long,
        strategy: "breakout".to_string(),
        timeframe: "1d".to_string(),
        asset_type: AssetType::Stock,
        confidence_score: dec!(75),
        entry_price,
        stop_loss: Some(entry_price * dec!(0.98)),
        target_1: Some(entry_price * dec!(1.04)),
        target_2: None,
        risk_reward_ratio: dec!(2),
        status: SignalStatus::Active,
        created_at: now,
        expires_at: Some(now + Duration::hours(4)),
    }
}

/// Paper trading stack around one bot
pub struct Desk {
    pub bot: TradingBot,
    pub broker: Arc<PaperBroker>,
    pub signals: Arc<InMemorySignalSource>,
    pub feed: StaticPriceFeed,
    pub config: ConfigHandle,
}

impl Desk {
    pub async fn new(config: BotConfig) -> Self {
        let feed = StaticPriceFeed::new();
        let broker = Arc::new(PaperBroker::new(dec!(100000)).with_feed(Arc::new(feed.clone())));
        let signals = Arc::new(InMemorySignalSource::new());
        let config = ConfigHandle::new(config).unwrap();
        let services = BotServices {
            broker: broker.clone(),
            signals: signals.clone(),
            feed: Arc::new(feed.clone()),
            bars: Arc::new(InMemoryBarSource::new()),
        };
        let broker_config = BrokerConfig {
            request_timeout_ms: 500,
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..BrokerConfig::default()
        };
        let bot = TradingBot::connect(
            services,
            config.clone(),
            monitor_config(),
            &broker_config,
            &BacktestPoolConfig::default(),
        )
        .await
        .unwrap();
        Self {
            bot,
            broker,
            signals,
            feed,
            config,
        }
    }

    /// Publish a signal and quote its symbol at the entry price
    pub async fn publish(&self, signal: &TradingSignal) {
        self.signals.insert(signal.clone()).await;
        self.feed.set_price(&signal.symbol, signal.entry_price).await;
    }

    pub fn monitor(&self) -> PositionMonitor {
        PositionMonitor::new(
            self.bot.ledger().clone(),
            self.bot.executor().clone(),
            Arc::new(self.feed.clone()),
            self.config.clone(),
            monitor_config(),
        )
    }
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        market_hours_only: false,
        ..MonitorConfig::default()
    }
}

/// Daily bars from 2024-01-01; open is the previous close
pub fn daily_bars(closes: &[Decimal]) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).unwrap();
    let mut prev = closes.first().copied().unwrap_or(dec!(100));
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = prev;
            prev = close;
            Bar {
                timestamp: start + Duration::days(i as i64),
                open,
                high: open.max(close) + dec!(1),
                low: open.min(close) - dec!(1),
                close,
                volume: dec!(1000000),
            }
        })
        .collect()
}

/// Flat at 100 for 25 days, breakout to 110, then the given closes
pub fn breakout_then(after: &[Decimal]) -> Vec<Bar> {
    let mut closes = vec![dec!(100); 25];
    closes.push(dec!(110));
    closes.extend_from_slice(after);
    daily_bars(&closes)
}
