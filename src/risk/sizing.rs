//! Position sizing
//!
//! Three sizing modes share one clamp pipeline: the raw quantity from the
//! mode is floored, capped by option contract limits, then re-floored against
//! the tightest notional cap (max position size, max portfolio percent and
//! buying power).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::{SizingRejection, SizingResult};
use crate::config::{BotConfig, SizingMode};
use crate::execution::Account;
use crate::signal::{AssetType, TradingSignal};

/// A sizing mode with its parameters
#[derive(Debug, Clone, PartialEq)]
pub enum SizingStrategy {
    /// Spend a fixed dollar amount per trade
    FixedDollar { amount: Decimal },
    /// Spend a percentage of account equity per trade
    PctPortfolio { pct: Decimal },
    /// Risk a percentage of equity between entry and stop, scaled down by a
    /// safety multiplier
    RiskBased {
        risk_pct: Decimal,
        multiplier: Decimal,
        default_stop_pct: Decimal,
    },
}

impl SizingStrategy {
    pub fn from_config(config: &BotConfig) -> Self {
        match config.sizing_mode {
            SizingMode::FixedDollar => SizingStrategy::FixedDollar {
                amount: config.fixed_dollar_amount,
            },
            SizingMode::PctPortfolio => SizingStrategy::PctPortfolio {
                pct: config.portfolio_pct,
            },
            SizingMode::RiskBased => SizingStrategy::RiskBased {
                risk_pct: config.risk_per_trade_pct,
                multiplier: config.kelly_multiplier,
                default_stop_pct: config.default_stop_loss_pct,
            },
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            SizingStrategy::FixedDollar { .. } => "fixed_dollar",
            SizingStrategy::PctPortfolio { .. } => "pct_portfolio",
            SizingStrategy::RiskBased { .. } => "risk_based",
        }
    }

    /// Unclamped quantity for `signal`
    fn raw_quantity(
        &self,
        signal: &TradingSignal,
        account: &Account,
        unit_cost: Decimal,
    ) -> Result<u64, SizingRejection> {
        let (budget, per_unit) = match self {
            SizingStrategy::FixedDollar { amount } => (*amount, unit_cost),
            SizingStrategy::PctPortfolio { pct } => {
                (account.equity * *pct / Decimal::ONE_HUNDRED, unit_cost)
            }
            SizingStrategy::RiskBased {
                risk_pct,
                multiplier,
                default_stop_pct,
            } => {
                let stop = signal.effective_stop(*default_stop_pct);
                let per_unit_risk =
                    (signal.entry_price - stop).abs() * signal.asset_type.multiplier();
                if per_unit_risk.is_zero() {
                    return Err(SizingRejection::ZeroStopDistance);
                }
                let risk_amount =
                    account.equity * *risk_pct / Decimal::ONE_HUNDRED * *multiplier;
                (risk_amount, per_unit_risk)
            }
        };

        match floor_units(budget, per_unit) {
            0 => Err(SizingRejection::ZeroQuantity {
                budget: budget.round_dp(2),
                unit_cost: per_unit,
            }),
            qty => Ok(qty),
        }
    }
}

/// Whole units of `unit` affordable with `amount`
fn floor_units(amount: Decimal, unit: Decimal) -> u64 {
    if amount <= Decimal::ZERO || unit <= Decimal::ZERO {
        return 0;
    }
    amount
        .checked_div(unit)
        .and_then(|q| q.floor().to_u64())
        .unwrap_or(0)
}

/// Turns an approved signal into a share or contract count.
///
/// Pure and infallible: every failure is reported in the returned
/// [`SizingResult`].
pub struct PositionSizer<'a> {
    config: &'a BotConfig,
    strategy: SizingStrategy,
}

impl<'a> PositionSizer<'a> {
    pub fn new(config: &'a BotConfig) -> Self {
        Self {
            config,
            strategy: SizingStrategy::from_config(config),
        }
    }

    /// Use an explicit strategy instead of the configured sizing mode
    pub fn with_strategy(mut self, strategy: SizingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> &SizingStrategy {
        &self.strategy
    }

    pub fn size(&self, signal: &TradingSignal, account: &Account) -> SizingResult {
        let mode = self.strategy.mode_name();
        match self.quantity(signal, account) {
            Ok((quantity, notional)) => SizingResult::sized(quantity, notional, mode),
            Err(rejection) => SizingResult::rejected(&rejection, mode),
        }
    }

    fn quantity(
        &self,
        signal: &TradingSignal,
        account: &Account,
    ) -> Result<(u64, Decimal), SizingRejection> {
        let config = self.config;
        if signal.entry_price <= Decimal::ZERO {
            return Err(SizingRejection::InvalidEntryPrice(signal.entry_price));
        }
        if account.buying_power <= Decimal::ZERO {
            return Err(SizingRejection::NoBuyingPower);
        }

        let is_option = signal.asset_type == AssetType::Option;
        let unit_cost = signal.entry_price * signal.asset_type.multiplier();

        if is_option && unit_cost > config.max_option_premium {
            return Err(SizingRejection::OptionPremiumTooHigh {
                premium: unit_cost,
                max: config.max_option_premium,
            });
        }

        let mut quantity = self.strategy.raw_quantity(signal, account, unit_cost)?;
        if is_option {
            quantity = quantity.min(u64::from(config.max_option_contracts));
        }

        let cap = config
            .max_position_size
            .min(account.equity * config.max_portfolio_pct / Decimal::ONE_HUNDRED)
            .min(account.buying_power);

        if Decimal::from(quantity) * unit_cost > cap {
            quantity = floor_units(cap, unit_cost);
            if quantity == 0 {
                return Err(if is_option {
                    SizingRejection::BelowOneContract { cap, unit_cost }
                } else {
                    SizingRejection::CappedToZero { cap, unit_cost }
                });
            }
        }

        Ok((quantity, Decimal::from(quantity) * unit_cost))
    }
}
