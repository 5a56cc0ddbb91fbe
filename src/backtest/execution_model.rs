//! Simplified fill and exit model
//!
//! Entries fill at the next bar's open. Within a bar the stop is checked
//! before the target, and a bar that gaps through a level fills at its open.
//! No partial fills.

use super::Bar;
use crate::signal::Direction;
use crate::trade::ExitReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Position held by the simulator
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedPosition {
    pub direction: Direction,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub entry_time: DateTime<Utc>,
}

impl SimulatedPosition {
    /// Mark-to-market P&L at `price`
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * Decimal::from(self.quantity) * self.direction.sign()
    }

    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * Decimal::from(self.quantity)
    }
}

/// Fill rules for the simulator
#[derive(Debug, Clone, Copy, Default)]
pub struct FillModel;

impl FillModel {
    /// Entry price for a signal raised at the previous bar's close
    pub fn entry_fill(&self, next_bar: &Bar) -> Decimal {
        next_bar.open
    }

    /// Exit triggered inside `bar`, if any
    pub fn exit_within(
        &self,
        position: &SimulatedPosition,
        bar: &Bar,
    ) -> Option<(Decimal, ExitReason)> {
        let stop = position.stop_price;
        let target = position.target_price;

        match position.direction {
            Direction::Long => {
                if bar.open <= stop {
                    Some((bar.open, ExitReason::StopLoss))
                } else if bar.low <= stop {
                    Some((stop, ExitReason::StopLoss))
                } else if bar.open >= target {
                    Some((bar.open, ExitReason::TakeProfit))
                } else if bar.high >= target {
                    Some((target, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
            Direction::Short => {
                if bar.open >= stop {
                    Some((bar.open, ExitReason::StopLoss))
                } else if bar.high >= stop {
                    Some((stop, ExitReason::StopLoss))
                } else if bar.open <= target {
                    Some((bar.open, ExitReason::TakeProfit))
                } else if bar.low <= target {
                    Some((target, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
        }
    }

    /// Forced exit at bar close (session end or end of data)
    pub fn close_out(&self, bar: &Bar) -> Decimal {
        bar.close
    }
}
