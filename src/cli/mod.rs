//! CLI interface for tradegate
//!
//! Provides subcommands for:
//! - `run`: Run the control loop against a paper broker, taking operator
//!   commands (halt, status, approve, close, ...) on stdin
//! - `preview` / `execute`: Operator actions on a single signal
//! - `config`, `trades`: Inspect configuration and a one-shot signal cycle
//! - `backtest`: Replay historical bars

mod backtest;
mod console;
mod operator;
mod run;

pub use backtest::BacktestArgs;
pub use console::{Console, OperatorCommand};
pub use operator::{SessionArgs, SignalArgs, TradesArgs};
pub use run::RunArgs;

use crate::backtest::ParquetBarSource;
use crate::bot::{BotServices, TradingBot};
use crate::config::{Config, ConfigHandle};
use crate::execution::PaperBroker;
use crate::feed::StaticPriceFeed;
use crate::signal::{InMemorySignalSource, SignalSource};
use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "tradegate")]
#[command(about = "Risk-gated execution of trading signals as bracket orders")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop and position monitor
    Run(RunArgs),
    /// Show risk check and sizing for a signal without placing anything
    Preview(SignalArgs),
    /// Risk-check, size and execute a signal
    Execute(SignalArgs),
    /// Show the active bot configuration
    Config,
    /// Run one signal cycle and list the resulting trades
    Trades(TradesArgs),
    /// Run a backtest on stored bars
    Backtest(BacktestArgs),
}

/// Paper trading session: signals from a JSON file, a paper broker filling
/// at signal entry prices, and the configured bar directory for backtests
pub(crate) async fn paper_session(
    config: &Config,
    signals_path: &Path,
) -> anyhow::Result<TradingBot> {
    let signals = InMemorySignalSource::from_json_file(signals_path)
        .with_context(|| format!("Failed to load signals from {}", signals_path.display()))?;

    let feed = StaticPriceFeed::new();
    for signal in signals.list_active_signals(Utc::now()).await? {
        feed.set_price(&signal.symbol, signal.entry_price).await;
    }

    let broker = PaperBroker::new(config.broker.paper_equity).with_feed(Arc::new(feed.clone()));
    let services = BotServices {
        broker: Arc::new(broker),
        signals: Arc::new(signals),
        feed: Arc::new(feed),
        bars: Arc::new(ParquetBarSource::new(config.backtest.data_dir.clone())),
    };

    let bot = TradingBot::connect(
        services,
        ConfigHandle::new(config.bot.clone())?,
        config.monitor.clone(),
        &config.broker,
        &config.backtest,
    )
    .await?;
    Ok(bot)
}

/// Print a value as pretty JSON
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
