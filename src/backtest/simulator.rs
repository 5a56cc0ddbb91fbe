//! Backtest simulator engine

use super::{
    Bar, BacktestError, BacktestParams, EquityPoint, FillModel, SignalRule, SimulatedPosition,
    SimulatedTrade,
};
use crate::bot::BotState;
use crate::config::{BotConfig, SizingMode};
use crate::execution::Account;
use crate::risk::{CircuitBreaker, PositionSizer, RiskGateway};
use crate::signal::{AssetType, Direction, SignalStatus, TradingSignal};
use crate::trade::ExitReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Equity curve and trade log of one run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutput {
    pub equity_curve: Vec<EquityPoint>,
    pub trade_log: Vec<SimulatedTrade>,
    pub rejected_signals: u32,
}

/// Runs one backtest over a bar series.
///
/// Each simulator owns its configuration copy and synthetic bot state, so
/// concurrent runs share nothing. Output depends only on the bars and
/// parameters.
pub struct BacktestSimulator {
    config: BotConfig,
    params: BacktestParams,
    rule: SignalRule,
    fill: FillModel,
}

impl BacktestSimulator {
    /// Sizing is forced to `pct_portfolio` at the run's `position_pct`; every
    /// other limit comes from `config`.
    pub fn new(config: &BotConfig, params: BacktestParams) -> Result<Self, BacktestError> {
        params.validate()?;
        let rule = SignalRule::from_strategy(&params.strategy)
            .ok_or_else(|| BacktestError::UnknownStrategy(params.strategy.clone()))?;

        let mut config = config.clone();
        config.sizing_mode = SizingMode::PctPortfolio;
        config.portfolio_pct = params.position_pct;

        Ok(Self {
            config,
            params,
            rule,
            fill: FillModel,
        })
    }

    pub fn params(&self) -> &BacktestParams {
        &self.params
    }

    /// Replay `bars`, checking `cancel` before every bar
    pub fn run(&self, bars: &[Bar], cancel: &AtomicBool) -> Result<SimulationOutput, BacktestError> {
        let first = bars.first().ok_or_else(|| BacktestError::NoData {
            symbol: self.params.symbol.clone(),
            timeframe: self.params.timeframe.clone(),
        })?;

        let gateway = RiskGateway::new(&self.config);
        let sizer = PositionSizer::new(&self.config);
        let breaker = CircuitBreaker::from_config(&self.config);
        let session_close = self.config.eod_close_enabled && is_intraday(&self.params.timeframe);

        let mut realized = self.params.initial_capital;
        let mut state = BotState::new(realized, first.timestamp);
        let mut position: Option<SimulatedPosition> = None;
        let mut pending: Option<SimulatedPosition> = None;
        let mut output = SimulationOutput {
            equity_curve: Vec::with_capacity(bars.len()),
            trade_log: Vec::new(),
            rejected_signals: 0,
        };

        for (i, bar) in bars.iter().enumerate() {
            if cancel.load(Ordering::Relaxed) {
                return Err(BacktestError::Cancelled);
            }
            let now = bar.timestamp;
            if i > 0 && bars[i - 1].timestamp.date_naive() != now.date_naive() {
                state.reset_session(realized, now);
            }

            if let Some(entry) = pending.take() {
                position = Some(entry);
            }

            if let Some(open) = &position {
                let last_of_session = bars
                    .get(i + 1)
                    .map_or(true, |next| next.timestamp.date_naive() != now.date_naive());
                let exit = self.fill.exit_within(open, bar).or_else(|| {
                    if session_close && last_of_session {
                        Some((self.fill.close_out(bar), ExitReason::EodClose))
                    } else if i + 1 == bars.len() {
                        Some((self.fill.close_out(bar), ExitReason::Manual))
                    } else {
                        None
                    }
                });

                if let Some((price, reason)) = exit {
                    let trade = self.settle(open, price, reason, now);
                    realized += trade.pnl;
                    state.record_close(trade.pnl, now);
                    state.open_positions = 0;
                    breaker.apply(&mut state);
                    output.trade_log.push(trade);
                    position = None;
                }
            }

            let marked = position
                .as_ref()
                .map_or(realized, |p| realized + p.pnl_at(bar.close));
            output.equity_curve.push(EquityPoint {
                timestamp: now,
                value: marked,
            });

            if position.is_some() {
                continue;
            }
            let (Some(direction), Some(next)) = (self.rule.signal_at(bars, i), bars.get(i + 1))
            else {
                continue;
            };

            let signal = self.signal(i, direction, self.fill.entry_fill(next), now);
            let account = Account {
                equity: realized,
                buying_power: realized,
                cash: realized,
            };
            let check = gateway.evaluate(&signal, &state, &account, now);
            if !check.approved {
                tracing::debug!(bar = i, reason = ?check.reason, "Backtest signal rejected");
                output.rejected_signals += 1;
                continue;
            }
            let sizing = sizer.size(&signal, &account);
            if sizing.rejected {
                tracing::debug!(bar = i, reason = ?sizing.reject_reason, "Backtest sizing rejected");
                output.rejected_signals += 1;
                continue;
            }

            state.record_entry(now);
            state.open_positions = 1;
            pending = Some(SimulatedPosition {
                direction,
                quantity: sizing.quantity,
                entry_price: signal.entry_price,
                stop_price: signal.effective_stop(self.config.default_stop_loss_pct),
                target_price: signal.effective_target(self.config.default_take_profit_pct),
                entry_time: next.timestamp,
            });
        }

        Ok(output)
    }

    fn signal(
        &self,
        bar_index: usize,
        direction: Direction,
        entry_price: Decimal,
        now: DateTime<Utc>,
    ) -> TradingSignal {
        let risk_reward = if self.config.default_stop_loss_pct > Decimal::ZERO {
            (self.config.default_take_profit_pct / self.config.default_stop_loss_pct).round_dp(2)
        } else {
            Decimal::ZERO
        };
        TradingSignal {
            id: Uuid::from_u128(bar_index as u128),
            symbol: self.params.symbol.clone(),
            direction,
            strategy: self.params.strategy.clone(),
            timeframe: self.params.timeframe.clone(),
            asset_type: AssetType::Stock,
            confidence_score: Decimal::ONE_HUNDRED,
            entry_price,
            stop_loss: None,
            target_1: None,
            target_2: None,
            risk_reward_ratio: risk_reward,
            status: SignalStatus::Active,
            created_at: now,
            expires_at: None,
        }
    }

    fn settle(
        &self,
        position: &SimulatedPosition,
        exit_price: Decimal,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
    ) -> SimulatedTrade {
        let pnl = position.pnl_at(exit_price);
        let cost = position.cost_basis();
        SimulatedTrade {
            symbol: self.params.symbol.clone(),
            direction: position.direction,
            quantity: position.quantity,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time: now,
            exit_price,
            exit_reason,
            pnl,
            pnl_pct: if cost.is_zero() {
                Decimal::ZERO
            } else {
                (pnl / cost * Decimal::ONE_HUNDRED).round_dp(4)
            },
        }
    }
}

/// Minute and hour bars close out at the end of each session
fn is_intraday(timeframe: &str) -> bool {
    timeframe.ends_with('m') || timeframe.ends_with('h')
}
