//! Operator console for a running bot
//!
//! Lines typed on stdin while `run` is active are parsed into
//! [`OperatorCommand`]s and applied to the live [`TradingBot`].

use super::print_json;
use crate::bot::{BotError, TradingBot};
use anyhow::{bail, Context};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

const HELP: &str = "\
Commands:
  status                 show bot state
  trades                 list active trades
  halt [reason]          stop new entries
  pause | resume         pause or resume the control loop
  reset                  start a new trading session
  override               clear a tripped circuit breaker
  approve <signal_id>    execute a queued signal
  cancel <trade_id>      cancel a trade awaiting approval
  close <trade_id>       close an active trade at market
  release <trade_id>     release a quarantined trade
  quit                   shut down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Status,
    Trades,
    Halt(String),
    Pause,
    Resume,
    Reset,
    Override,
    Approve(Uuid),
    Cancel(Uuid),
    Close(Uuid),
    Release(Uuid),
    Help,
    Quit,
}

impl OperatorCommand {
    /// Parse one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_ascii_lowercase().as_str() {
            "status" => Self::Status,
            "trades" => Self::Trades,
            "halt" => {
                let reason = words.collect::<Vec<_>>().join(" ");
                Self::Halt(if reason.is_empty() {
                    "operator halt".to_string()
                } else {
                    reason
                })
            }
            "pause" => Self::Pause,
            "resume" => Self::Resume,
            "reset" => Self::Reset,
            "override" => Self::Override,
            "approve" => Self::Approve(parse_id(verb, words.next())?),
            "cancel" => Self::Cancel(parse_id(verb, words.next())?),
            "close" => Self::Close(parse_id(verb, words.next())?),
            "release" => Self::Release(parse_id(verb, words.next())?),
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("Unknown command '{other}', try 'help'"),
        };
        Ok(Some(command))
    }

    /// Apply to the live bot and print the outcome
    pub async fn apply(&self, bot: &TradingBot) -> anyhow::Result<()> {
        match self {
            Self::Status => print_json(&bot.bot_status().await),
            Self::Trades => print_json(&bot.active_trades().await),
            Self::Halt(reason) => print_json(&bot.halt(reason).await),
            Self::Pause => print_json(&bot.pause().await),
            Self::Resume => print_json(&bot.resume().await),
            Self::Reset => print_json(&bot.reset_session().await?),
            Self::Override => print_json(&bot.override_circuit_breaker().await),
            Self::Approve(signal_id) => match bot.execute(*signal_id).await {
                Ok(result) => print_json(&result),
                Err(BotError::Rejected(reason)) => {
                    println!("Signal {} rejected: {}", signal_id, reason);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            Self::Cancel(trade_id) => print_json(&bot.cancel_trade(*trade_id).await?),
            Self::Close(trade_id) => print_json(&bot.close_trade(*trade_id).await?),
            Self::Release(trade_id) => print_json(&bot.release_quarantine(*trade_id).await?),
            Self::Help => {
                println!("{HELP}");
                Ok(())
            }
            Self::Quit => Ok(()),
        }
    }
}

fn parse_id(verb: &str, word: Option<&str>) -> anyhow::Result<Uuid> {
    let raw = word.with_context(|| format!("'{verb}' needs an id"))?;
    raw.parse().with_context(|| format!("Invalid id '{raw}'"))
}

/// Line-oriented command input
pub struct Console {
    lines: mpsc::Receiver<String>,
}

impl Console {
    /// Read stdin on a plain thread so a pending read never holds up
    /// runtime shutdown
    pub fn stdin() -> Self {
        let (tx, rx) = mpsc::channel(16);
        std::thread::spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
        Self { lines: rx }
    }

    pub fn from_channel(lines: mpsc::Receiver<String>) -> Self {
        Self { lines }
    }

    /// Apply commands to `bot` until input ends, `quit` is entered, or
    /// `shutdown` flips to true. `quit` requests shutdown of the bot.
    pub async fn serve(mut self, bot: &TradingBot, shutdown: &watch::Sender<bool>) {
        let mut stopped = shutdown.subscribe();
        loop {
            tokio::select! {
                line = self.lines.recv() => {
                    let Some(line) = line else {
                        tracing::debug!("Operator console input closed");
                        return;
                    };
                    let command = match OperatorCommand::parse(&line) {
                        Ok(Some(command)) => command,
                        Ok(None) => continue,
                        Err(e) => {
                            eprintln!("{e:#}");
                            continue;
                        }
                    };
                    tracing::info!(?command, "Operator command");
                    if command == OperatorCommand::Quit {
                        let _ = shutdown.send(true);
                        return;
                    }
                    if let Err(e) = command.apply(bot).await {
                        eprintln!("{e:#}");
                    }
                }
                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
