//! Run command implementation

use super::console::Console;
use super::paper_session;
use crate::config::Config;
use crate::telemetry;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON file with the signals to trade
    #[arg(long, default_value = "signals.json")]
    pub signals: PathBuf,

    /// Do not read operator commands from stdin
    #[arg(long)]
    pub no_console: bool,
}

impl RunArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let bot = paper_session(config, &self.signals).await?;
        telemetry::update_bot_gauges(&bot.bot_status().await);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);
        let ctrl_c_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutdown requested");
            let _ = ctrl_c_tx.send(true);
        });

        tracing::info!(
            mode = ?config.bot.execution_mode,
            signals = ?self.signals,
            console = !self.no_console,
            "Starting paper trading"
        );
        if self.no_console {
            bot.run(shutdown_rx).await;
        } else {
            eprintln!("Operator console ready, type 'help' for commands");
            tokio::join!(
                bot.run(shutdown_rx),
                Console::stdin().serve(&bot, &shutdown_tx)
            );
        }

        let state = bot.bot_status().await;
        tracing::info!(
            daily_pl = %state.daily_pl,
            daily_trades = state.daily_trades,
            open_positions = state.open_positions,
            "Paper trading stopped"
        );
        Ok(())
    }
}
