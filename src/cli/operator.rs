//! One-shot operator commands on a fresh paper session

use super::{paper_session, print_json};
use crate::bot::BotError;
use crate::config::Config;
use crate::trade::{TradeFilter, TradeStatus};
use anyhow::Context;
use chrono::Utc;
use clap::Args;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// JSON file with the signals to trade
    #[arg(long, default_value = "signals.json")]
    pub signals: PathBuf,
}

#[derive(Args, Debug)]
pub struct SignalArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Signal id
    pub signal_id: Uuid,
}

#[derive(Args, Debug)]
pub struct TradesArgs {
    #[command(flatten)]
    pub session: SessionArgs,

    /// Only trades in this status (e.g. open, pending_approval)
    #[arg(long)]
    pub status: Option<String>,

    /// Only trades for this symbol
    #[arg(long)]
    pub symbol: Option<String>,

    /// Maximum number of trades to show
    #[arg(long)]
    pub limit: Option<usize>,
}

impl SignalArgs {
    pub async fn preview(&self, config: &Config) -> anyhow::Result<()> {
        let bot = paper_session(config, &self.session.signals).await?;
        let preview = bot.preview(self.signal_id).await?;
        print_json(&preview)
    }

    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let bot = paper_session(config, &self.session.signals).await?;
        match bot.execute(self.signal_id).await {
            Ok(result) => print_json(&result),
            Err(BotError::Rejected(reason)) => {
                println!("Signal {} rejected: {}", self.signal_id, reason);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl TradesArgs {
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let status = self
            .status
            .as_deref()
            .map(parse_status)
            .transpose()?;

        let bot = paper_session(config, &self.session.signals).await?;
        let report = bot.cycle(Utc::now()).await;
        tracing::info!(?report, "Signal cycle finished");

        let filter = TradeFilter {
            status,
            symbol: self.symbol.clone(),
            since: None,
            limit: self.limit,
        };
        print_json(&bot.list_trades(&filter).await)
    }
}

fn parse_status(value: &str) -> anyhow::Result<TradeStatus> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("Unknown trade status '{}'", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("open").unwrap(), TradeStatus::Open);
        assert_eq!(
            parse_status("pending_approval").unwrap(),
            TradeStatus::PendingApproval
        );
        assert!(parse_status("opened").is_err());
    }
}
