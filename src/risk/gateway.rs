//! Pre-trade risk gateway

use super::{CircuitBreakerState, RejectReason, RiskCheck};
use crate::bot::{BotState, BotStatus};
use crate::config::BotConfig;
use crate::execution::Account;
use crate::signal::{AssetType, SignalStatus, TradingSignal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Approves or rejects signals against the session's risk limits.
///
/// Pure: reads the supplied snapshots and never mutates anything.
pub struct RiskGateway<'a> {
    config: &'a BotConfig,
}

impl<'a> RiskGateway<'a> {
    pub fn new(config: &'a BotConfig) -> Self {
        Self { config }
    }

    /// Run every check and collect near-threshold warnings
    pub fn evaluate(
        &self,
        signal: &TradingSignal,
        state: &BotState,
        account: &Account,
        now: DateTime<Utc>,
    ) -> RiskCheck {
        let warnings = self.warnings(state, account);
        match self.check(signal, state, now) {
            Ok(()) => RiskCheck::approve(warnings),
            Err(reason) => RiskCheck::reject(&reason, warnings),
        }
    }

    /// Hard gates in order, stopping at the first failure
    pub fn check(
        &self,
        signal: &TradingSignal,
        state: &BotState,
        now: DateTime<Utc>,
    ) -> Result<(), RejectReason> {
        let config = self.config;

        if state.circuit_breaker == CircuitBreakerState::Halted {
            let reason = state
                .halt_reason
                .clone()
                .unwrap_or_else(|| "loss threshold breached".to_string());
            return Err(RejectReason::CircuitBreakerHalted(reason));
        }
        if state.status != BotStatus::Running {
            return Err(RejectReason::BotNotRunning(state.status));
        }

        if signal.status != SignalStatus::Active {
            return Err(RejectReason::SignalInactive(signal.status));
        }
        if signal.is_expired(now) {
            return Err(RejectReason::SignalExpired);
        }

        if !config.allowed_strategies.contains(&signal.strategy) {
            return Err(RejectReason::StrategyNotAllowed(signal.strategy.clone()));
        }
        if !config.allowed_timeframes.contains(&signal.timeframe) {
            return Err(RejectReason::TimeframeNotAllowed(signal.timeframe.clone()));
        }
        if signal.asset_type == AssetType::Option && !config.enable_options_trading {
            return Err(RejectReason::OptionsDisabled);
        }

        if signal.confidence_score < config.min_confidence_score {
            return Err(RejectReason::ConfidenceTooLow {
                score: signal.confidence_score,
                min: config.min_confidence_score,
            });
        }
        if signal.risk_reward_ratio < config.min_risk_reward {
            return Err(RejectReason::RiskRewardTooLow {
                ratio: signal.risk_reward_ratio,
                min: config.min_risk_reward,
            });
        }

        if state.daily_trades >= config.max_daily_trades {
            return Err(RejectReason::DailyTradeLimit {
                count: state.daily_trades,
                max: config.max_daily_trades,
            });
        }
        if state.open_positions >= config.max_open_positions {
            return Err(RejectReason::MaxOpenPositions {
                open: state.open_positions,
                max: config.max_open_positions,
            });
        }

        // Daily loss and drawdown are independent gates; either one rejects.
        if state.daily_pl <= -config.max_daily_loss {
            return Err(RejectReason::DailyLossLimit {
                pl: state.daily_pl,
                max: config.max_daily_loss,
            });
        }
        let drawdown = state.drawdown_pct();
        if drawdown >= config.max_drawdown_pct {
            return Err(RejectReason::MaxDrawdown {
                drawdown_pct: drawdown.round_dp(2),
                max: config.max_drawdown_pct,
            });
        }

        Ok(())
    }

    /// Non-blocking notices for limits at or above `warning_ratio` of their cap
    pub fn warnings(&self, state: &BotState, account: &Account) -> Vec<String> {
        let config = self.config;
        let ratio = config.warning_ratio;
        let mut warnings = Vec::new();

        if state.circuit_breaker == CircuitBreakerState::Warning {
            warnings.push(format!(
                "Circuit breaker in warning state ({} consecutive losses, daily P&L {}%)",
                state.consecutive_losses, state.daily_pl_pct
            ));
        }

        let near = |value: Decimal, limit: Decimal| value < limit && value >= limit * ratio;

        if near(
            Decimal::from(state.daily_trades),
            Decimal::from(config.max_daily_trades),
        ) {
            warnings.push(format!(
                "Approaching daily trades limit ({}/{})",
                state.daily_trades, config.max_daily_trades
            ));
        }
        if near(
            Decimal::from(state.open_positions),
            Decimal::from(config.max_open_positions),
        ) {
            warnings.push(format!(
                "Approaching max open positions ({}/{})",
                state.open_positions, config.max_open_positions
            ));
        }
        if state.daily_pl < Decimal::ZERO && near(-state.daily_pl, config.max_daily_loss) {
            warnings.push(format!(
                "Approaching daily loss limit (P&L {}, limit -{})",
                state.daily_pl, config.max_daily_loss
            ));
        }
        let drawdown = state.drawdown_pct();
        if drawdown > Decimal::ZERO && near(drawdown, config.max_drawdown_pct) {
            warnings.push(format!(
                "Approaching max drawdown ({}% of {}%)",
                drawdown.round_dp(2),
                config.max_drawdown_pct
            ));
        }
        if account.buying_power <= Decimal::ZERO {
            warnings.push("No buying power available".to_string());
        }

        warnings
    }
}
