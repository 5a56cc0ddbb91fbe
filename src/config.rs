//! Configuration types for tradegate

use chrono::{NaiveTime, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub backtest: BacktestPoolConfig,
    pub telemetry: TelemetryConfig,
}

/// Configuration validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be positive (got {value})")]
    NotPositive { field: &'static str, value: Decimal },
    #[error("{field} must be a percentage in (0, 100] (got {value})")]
    PercentOutOfRange { field: &'static str, value: Decimal },
    #[error("kelly_multiplier must be in (0, 1] (got {0})")]
    KellyMultiplierOutOfRange(Decimal),
    #[error("warning_ratio must be in (0, 1) (got {0})")]
    WarningRatioOutOfRange(Decimal),
    #[error("{0} must not be empty")]
    EmptySet(&'static str),
    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}

/// How far the bot is allowed to act on signals on its own
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Evaluate and preview only, never place orders
    SignalOnly,
    /// Queue approved signals for operator approval
    SemiAuto,
    /// Place orders for approved signals automatically
    FullAuto,
}

/// Position sizing algorithm
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    #[default]
    FixedDollar,
    PctPortfolio,
    RiskBased,
}

/// Risk limits and sizing rules for one trading session.
///
/// Percentages are expressed on a 0-100 scale (`2.5` means 2.5%).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub sizing_mode: SizingMode,

    /// Dollar amount per trade in fixed_dollar mode
    #[serde(default = "default_fixed_dollar_amount")]
    pub fixed_dollar_amount: Decimal,
    /// Percent of equity per trade in pct_portfolio mode
    #[serde(default = "default_portfolio_pct")]
    pub portfolio_pct: Decimal,
    /// Percent of equity risked per trade in risk_based mode
    #[serde(default = "default_risk_per_trade_pct")]
    pub risk_per_trade_pct: Decimal,
    /// Safety multiplier applied to the raw risk-based size
    #[serde(default = "default_kelly_multiplier")]
    pub kelly_multiplier: Decimal,

    pub max_position_size: Decimal,
    #[serde(default = "default_max_portfolio_pct")]
    pub max_portfolio_pct: Decimal,
    pub max_daily_trades: u32,
    pub max_daily_loss: Decimal,
    pub max_open_positions: u32,
    pub max_drawdown_pct: Decimal,

    #[serde(default = "default_stop_loss_pct")]
    pub default_stop_loss_pct: Decimal,
    #[serde(default = "default_take_profit_pct")]
    pub default_take_profit_pct: Decimal,
    #[serde(default)]
    pub enable_trailing_stop: bool,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: Decimal,

    #[serde(default)]
    pub min_confidence_score: Decimal,
    #[serde(default)]
    pub min_risk_reward: Decimal,
    pub allowed_strategies: BTreeSet<String>,
    pub allowed_timeframes: BTreeSet<String>,

    #[serde(default = "default_true")]
    pub eod_close_enabled: bool,
    #[serde(default = "default_eod_minutes")]
    pub eod_close_minutes_before: u32,

    #[serde(default = "default_cb_losses")]
    pub circuit_breaker_consecutive_losses: u32,
    #[serde(default = "default_cb_daily_loss_pct")]
    pub circuit_breaker_daily_loss_pct: Decimal,
    /// Fraction of a limit at which warnings start (0.8 = 80%)
    #[serde(default = "default_warning_ratio")]
    pub warning_ratio: Decimal,

    #[serde(default)]
    pub enable_options_trading: bool,
    #[serde(default = "default_max_option_contracts")]
    pub max_option_contracts: u32,
    /// Maximum premium per contract (per-share price times multiplier)
    #[serde(default = "default_max_option_premium")]
    pub max_option_premium: Decimal,
}

fn default_true() -> bool {
    true
}
fn default_fixed_dollar_amount() -> Decimal {
    dec!(1000)
}
fn default_portfolio_pct() -> Decimal {
    dec!(5)
}
fn default_risk_per_trade_pct() -> Decimal {
    dec!(1)
}
fn default_kelly_multiplier() -> Decimal {
    dec!(0.5)
}
fn default_max_portfolio_pct() -> Decimal {
    dec!(100)
}
fn default_stop_loss_pct() -> Decimal {
    dec!(2)
}
fn default_take_profit_pct() -> Decimal {
    dec!(4)
}
fn default_trailing_stop_pct() -> Decimal {
    dec!(1.5)
}
fn default_eod_minutes() -> u32 {
    15
}
fn default_cb_losses() -> u32 {
    3
}
fn default_cb_daily_loss_pct() -> Decimal {
    dec!(3)
}
fn default_warning_ratio() -> Decimal {
    dec!(0.8)
}
fn default_max_option_contracts() -> u32 {
    10
}
fn default_max_option_premium() -> Decimal {
    dec!(500)
}

impl BotConfig {
    /// Check field ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("fixed_dollar_amount", self.fixed_dollar_amount),
            ("max_position_size", self.max_position_size),
            ("max_daily_loss", self.max_daily_loss),
            ("max_option_premium", self.max_option_premium),
        ] {
            if value <= Decimal::ZERO {
                return Err(ConfigError::NotPositive { field, value });
            }
        }

        for (field, value) in [
            ("portfolio_pct", self.portfolio_pct),
            ("risk_per_trade_pct", self.risk_per_trade_pct),
            ("max_portfolio_pct", self.max_portfolio_pct),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("default_stop_loss_pct", self.default_stop_loss_pct),
            ("default_take_profit_pct", self.default_take_profit_pct),
            ("trailing_stop_pct", self.trailing_stop_pct),
            (
                "circuit_breaker_daily_loss_pct",
                self.circuit_breaker_daily_loss_pct,
            ),
        ] {
            if value <= Decimal::ZERO || value > dec!(100) {
                return Err(ConfigError::PercentOutOfRange { field, value });
            }
        }

        if self.kelly_multiplier <= Decimal::ZERO || self.kelly_multiplier > Decimal::ONE {
            return Err(ConfigError::KellyMultiplierOutOfRange(self.kelly_multiplier));
        }
        if self.warning_ratio <= Decimal::ZERO || self.warning_ratio >= Decimal::ONE {
            return Err(ConfigError::WarningRatioOutOfRange(self.warning_ratio));
        }
        if self.allowed_strategies.is_empty() {
            return Err(ConfigError::EmptySet("allowed_strategies"));
        }
        if self.allowed_timeframes.is_empty() {
            return Err(ConfigError::EmptySet("allowed_timeframes"));
        }
        if self.max_daily_trades == 0 {
            return Err(ConfigError::ZeroLimit("max_daily_trades"));
        }
        if self.max_open_positions == 0 {
            return Err(ConfigError::ZeroLimit("max_open_positions"));
        }
        if self.circuit_breaker_consecutive_losses == 0 {
            return Err(ConfigError::ZeroLimit("circuit_breaker_consecutive_losses"));
        }
        Ok(())
    }

    /// Return a copy with `patch` applied, rejecting the result if invalid
    pub fn apply(&self, patch: &BotConfigPatch) -> Result<BotConfig, ConfigError> {
        let mut next = self.clone();

        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &patch.$field {
                        next.$field = value.clone();
                    }
                )*
            };
        }

        merge!(
            execution_mode,
            sizing_mode,
            fixed_dollar_amount,
            portfolio_pct,
            risk_per_trade_pct,
            kelly_multiplier,
            max_position_size,
            max_portfolio_pct,
            max_daily_trades,
            max_daily_loss,
            max_open_positions,
            max_drawdown_pct,
            default_stop_loss_pct,
            default_take_profit_pct,
            enable_trailing_stop,
            trailing_stop_pct,
            min_confidence_score,
            min_risk_reward,
            allowed_strategies,
            allowed_timeframes,
            eod_close_enabled,
            eod_close_minutes_before,
            circuit_breaker_consecutive_losses,
            circuit_breaker_daily_loss_pct,
            warning_ratio,
            enable_options_trading,
            max_option_contracts,
            max_option_premium,
        );

        next.validate()?;
        Ok(next)
    }
}

/// Partial update to [`BotConfig`]; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfigPatch {
    pub execution_mode: Option<ExecutionMode>,
    pub sizing_mode: Option<SizingMode>,
    pub fixed_dollar_amount: Option<Decimal>,
    pub portfolio_pct: Option<Decimal>,
    pub risk_per_trade_pct: Option<Decimal>,
    pub kelly_multiplier: Option<Decimal>,
    pub max_position_size: Option<Decimal>,
    pub max_portfolio_pct: Option<Decimal>,
    pub max_daily_trades: Option<u32>,
    pub max_daily_loss: Option<Decimal>,
    pub max_open_positions: Option<u32>,
    pub max_drawdown_pct: Option<Decimal>,
    pub default_stop_loss_pct: Option<Decimal>,
    pub default_take_profit_pct: Option<Decimal>,
    pub enable_trailing_stop: Option<bool>,
    pub trailing_stop_pct: Option<Decimal>,
    pub min_confidence_score: Option<Decimal>,
    pub min_risk_reward: Option<Decimal>,
    pub allowed_strategies: Option<BTreeSet<String>>,
    pub allowed_timeframes: Option<BTreeSet<String>>,
    pub eod_close_enabled: Option<bool>,
    pub eod_close_minutes_before: Option<u32>,
    pub circuit_breaker_consecutive_losses: Option<u32>,
    pub circuit_breaker_daily_loss_pct: Option<Decimal>,
    pub warning_ratio: Option<Decimal>,
    pub enable_options_trading: Option<bool>,
    pub max_option_contracts: Option<u32>,
    pub max_option_premium: Option<Decimal>,
}

/// Shared, swappable handle to the live bot configuration.
///
/// Readers take an `Arc` snapshot and keep it for the whole cycle, so an
/// update never changes limits halfway through a decision.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<BotConfig>>>,
}

impl ConfigHandle {
    /// Wrap a validated configuration
    pub fn new(config: BotConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Snapshot of the current configuration
    pub async fn snapshot(&self) -> Arc<BotConfig> {
        self.inner.read().await.clone()
    }

    /// Validate and install a patched configuration
    pub async fn update(&self, patch: &BotConfigPatch) -> Result<Arc<BotConfig>, ConfigError> {
        let mut guard = self.inner.write().await;
        let next = Arc::new(guard.apply(patch)?);
        *guard = next.clone();
        tracing::info!(?patch, "Bot configuration updated");
        Ok(next)
    }
}

/// Position monitor and market session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Signal evaluation cycle for the control loop
    #[serde(default = "default_signal_interval")]
    pub signal_interval_secs: u64,
    #[serde(default = "default_session_open")]
    pub session_open_utc: NaiveTime,
    #[serde(default = "default_session_close")]
    pub session_close_utc: NaiveTime,
    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<Weekday>,
    #[serde(default = "default_true")]
    pub market_hours_only: bool,
    /// Quotes older than this are treated as unavailable
    #[serde(default = "default_max_quote_age")]
    pub max_quote_age_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_signal_interval() -> u64 {
    30
}
fn default_max_quote_age() -> u64 {
    60
}
fn default_session_open() -> NaiveTime {
    NaiveTime::from_hms_opt(13, 30, 0).unwrap_or_default()
}
fn default_session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(20, 0, 0).unwrap_or_default()
}
fn default_trading_days() -> Vec<Weekday> {
    vec![
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            signal_interval_secs: default_signal_interval(),
            session_open_utc: default_session_open(),
            session_close_utc: default_session_close(),
            trading_days: default_trading_days(),
            market_hours_only: true,
            max_quote_age_secs: default_max_quote_age(),
        }
    }
}

/// Broker call timeouts and retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Starting equity for the paper broker
    #[serde(default = "default_paper_equity")]
    pub paper_equity: Decimal,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    5_000
}
fn default_paper_equity() -> Decimal {
    dec!(100000)
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            paper_equity: default_paper_equity(),
        }
    }
}

/// Backtest pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BacktestPoolConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Finished runs kept for lookup; the oldest beyond this are dropped
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
    /// Directory containing `<SYMBOL>_<timeframe>.parquet` bar files
    #[serde(default = "default_bars_dir")]
    pub data_dir: PathBuf,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_run_timeout() -> u64 {
    300
}
fn default_max_retained() -> usize {
    100
}
fn default_bars_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for BacktestPoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            run_timeout_secs: default_run_timeout(),
            max_retained: default_max_retained(),
            data_dir: default_bars_dir(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    pub metrics_port: Option<u16>,
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.bot.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Baseline configuration shared by unit tests across the crate
    pub(crate) fn test_bot_config() -> BotConfig {
        BotConfig {
            execution_mode: ExecutionMode::FullAuto,
            sizing_mode: SizingMode::FixedDollar,
            fixed_dollar_amount: dec!(2500),
            portfolio_pct: dec!(5),
            risk_per_trade_pct: dec!(1),
            kelly_multiplier: dec!(0.5),
            max_position_size: dec!(10000),
            max_portfolio_pct: dec!(100),
            max_daily_trades: 10,
            max_daily_loss: dec!(1000),
            max_open_positions: 5,
            max_drawdown_pct: dec!(10),
            default_stop_loss_pct: dec!(2),
            default_take_profit_pct: dec!(4),
            enable_trailing_stop: false,
            trailing_stop_pct: dec!(1.5),
            min_confidence_score: dec!(60),
            min_risk_reward: dec!(1.5),
            allowed_strategies: ["breakout".to_string(), "momentum".to_string()].into(),
            allowed_timeframes: ["1d".to_string(), "1h".to_string()].into(),
            eod_close_enabled: true,
            eod_close_minutes_before: 15,
            circuit_breaker_consecutive_losses: 3,
            circuit_breaker_daily_loss_pct: dec!(3),
            warning_ratio: dec!(0.8),
            enable_options_trading: false,
            max_option_contracts: 10,
            max_option_premium: dec!(500),
        }
    }

    const FULL_TOML: &str = r#"
        [bot]
        execution_mode = "semi_auto"
        sizing_mode = "risk_based"
        max_position_size = 5000
        max_daily_trades = 10
        max_daily_loss = 500
        max_open_positions = 3
        max_drawdown_pct = 8
        allowed_strategies = ["breakout"]
        allowed_timeframes = ["1d"]

        [monitor]
        poll_interval_secs = 10
        session_open_utc = "14:30:00"
        session_close_utc = "21:00:00"

        [broker]
        max_retries = 5

        [backtest]
        max_concurrent = 2

        [telemetry]
        log_level = "info"
        log_format = "json"
    "#;

    #[test]
    fn test_config_deserialize() {
        let config: Config = toml::from_str(FULL_TOML).unwrap();
        assert_eq!(config.bot.execution_mode, ExecutionMode::SemiAuto);
        assert_eq!(config.bot.sizing_mode, SizingMode::RiskBased);
        assert_eq!(config.bot.kelly_multiplier, dec!(0.5));
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(
            config.monitor.session_close_utc,
            NaiveTime::from_hms_opt(21, 0, 0).unwrap()
        );
        assert_eq!(config.broker.max_retries, 5);
        assert_eq!(config.broker.request_timeout_ms, 10_000);
        assert_eq!(config.backtest.max_concurrent, 2);
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert!(config.telemetry.metrics_port.is_none());
        assert!(config.bot.validate().is_ok());
    }

    #[test]
    fn test_config_load_nonexistent() {
        let result = Config::load("/nonexistent/path/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, FULL_TOML).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bot.max_open_positions, 3);
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let mut config = test_bot_config();
        config.kelly_multiplier = dec!(1.5);
        assert_eq!(
            config.validate(),
            Err(ConfigError::KellyMultiplierOutOfRange(dec!(1.5)))
        );
    }

    #[test]
    fn test_validate_rejects_empty_strategies() {
        let mut config = test_bot_config();
        config.allowed_strategies.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptySet("allowed_strategies"))
        );
    }

    #[test]
    fn test_patch_applies_only_present_fields() {
        let config = test_bot_config();
        let patch = BotConfigPatch {
            max_daily_trades: Some(4),
            sizing_mode: Some(SizingMode::PctPortfolio),
            ..Default::default()
        };

        let next = config.apply(&patch).unwrap();
        assert_eq!(next.max_daily_trades, 4);
        assert_eq!(next.sizing_mode, SizingMode::PctPortfolio);
        assert_eq!(next.max_position_size, config.max_position_size);
    }

    #[test]
    fn test_patch_rejects_invalid_result() {
        let config = test_bot_config();
        let patch = BotConfigPatch {
            max_drawdown_pct: Some(dec!(150)),
            ..Default::default()
        };

        assert!(matches!(
            config.apply(&patch),
            Err(ConfigError::PercentOutOfRange {
                field: "max_drawdown_pct",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_config_handle_snapshot_is_stable() {
        let handle = ConfigHandle::new(test_bot_config()).unwrap();
        let before = handle.snapshot().await;

        let patch = BotConfigPatch {
            max_open_positions: Some(1),
            ..Default::default()
        };
        handle.update(&patch).await.unwrap();

        assert_eq!(before.max_open_positions, 5);
        assert_eq!(handle.snapshot().await.max_open_positions, 1);
    }

    #[tokio::test]
    async fn test_config_handle_keeps_old_config_on_invalid_patch() {
        let handle = ConfigHandle::new(test_bot_config()).unwrap();
        let patch = BotConfigPatch {
            max_daily_trades: Some(0),
            ..Default::default()
        };

        assert!(handle.update(&patch).await.is_err());
        assert_eq!(handle.snapshot().await.max_daily_trades, 10);
    }
}
