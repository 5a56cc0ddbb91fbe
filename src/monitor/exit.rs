//! Exit condition evaluation

use crate::signal::Direction;
use crate::trade::{ExitReason, Trade};
use rust_decimal::Decimal;

/// Exit settings taken from the bot configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitRules {
    /// Trailing distance in percent, when trailing is enabled
    pub trailing_stop_pct: Option<Decimal>,
    /// Inside the end-of-day close window with EOD close enabled
    pub eod_close: bool,
}

/// Outcome of evaluating one trade against the current price
#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub reason: Option<ExitReason>,
    /// Best price seen, including this quote
    pub high_water_mark: Decimal,
    /// Trailing stop after this quote
    pub trailing_stop: Option<Decimal>,
    /// High-water mark or trailing stop moved
    pub trailing_updated: bool,
}

/// Evaluate exits in fixed priority order: stop loss, take profit, trailing
/// stop, end of day. The first match wins.
///
/// The trailing stop follows the high-water mark at `trailing_stop_pct` and
/// only ever tightens.
pub fn evaluate_exit(trade: &Trade, price: Decimal, rules: &ExitRules) -> ExitDecision {
    let long = trade.direction == Direction::Long;
    let previous_mark = trade.high_water_mark.unwrap_or(trade.entry_price);
    let high_water_mark = if long {
        previous_mark.max(price)
    } else {
        previous_mark.min(price)
    };

    let trailing_stop = rules.trailing_stop_pct.map(|pct| {
        let offset = high_water_mark * pct / Decimal::ONE_HUNDRED;
        let candidate = if long {
            high_water_mark - offset
        } else {
            high_water_mark + offset
        };
        match trade.trailing_stop_price {
            Some(current) if long => current.max(candidate),
            Some(current) => current.min(candidate),
            None => candidate,
        }
    });

    let trailing_updated = Some(high_water_mark) != trade.high_water_mark
        || trailing_stop != trade.trailing_stop_price;

    let (stop_hit, target_hit, trail_hit) = if long {
        (
            price <= trade.stop_loss_price,
            price >= trade.take_profit_price,
            trailing_stop.map_or(false, |t| price <= t),
        )
    } else {
        (
            price >= trade.stop_loss_price,
            price <= trade.take_profit_price,
            trailing_stop.map_or(false, |t| price >= t),
        )
    };

    let reason = if stop_hit {
        Some(ExitReason::StopLoss)
    } else if target_hit {
        Some(ExitReason::TakeProfit)
    } else if trail_hit {
        Some(ExitReason::TrailingStop)
    } else if rules.eod_close {
        Some(ExitReason::EodClose)
    } else {
        None
    };

    ExitDecision {
        reason,
        high_water_mark,
        trailing_stop,
        trailing_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::test_signal;
    use crate::trade::TradeStatus;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(direction: Direction, stop: Decimal, target: Decimal) -> Trade {
        let mut signal = test_signal("AAPL", dec!(100));
        signal.direction = direction;
        let now = Utc::now();
        let mut trade =
            Trade::from_signal(&signal, 10, stop, target, TradeStatus::PendingEntry, now);
        trade.mark_open(dec!(100), "o".into(), now).unwrap();
        trade
    }

    const NO_TRAIL: ExitRules = ExitRules {
        trailing_stop_pct: None,
        eod_close: false,
    };

    #[test]
    fn test_long_stop_and_target() {
        let t = trade(Direction::Long, dec!(98), dec!(104));
        assert_eq!(evaluate_exit(&t, dec!(97.5), &NO_TRAIL).reason, Some(ExitReason::StopLoss));
        assert_eq!(evaluate_exit(&t, dec!(104), &NO_TRAIL).reason, Some(ExitReason::TakeProfit));
        assert_eq!(evaluate_exit(&t, dec!(101), &NO_TRAIL).reason, None);
    }

    #[test]
    fn test_short_stop_and_target() {
        let t = trade(Direction::Short, dec!(102), dec!(96));
        assert_eq!(evaluate_exit(&t, dec!(102.5), &NO_TRAIL).reason, Some(ExitReason::StopLoss));
        assert_eq!(evaluate_exit(&t, dec!(95), &NO_TRAIL).reason, Some(ExitReason::TakeProfit));
        assert_eq!(evaluate_exit(&t, dec!(99), &NO_TRAIL).reason, None);
    }

    #[test]
    fn test_stop_beats_eod() {
        let t = trade(Direction::Long, dec!(98), dec!(104));
        let rules = ExitRules {
            trailing_stop_pct: None,
            eod_close: true,
        };
        assert_eq!(evaluate_exit(&t, dec!(97), &rules).reason, Some(ExitReason::StopLoss));
        assert_eq!(evaluate_exit(&t, dec!(100), &rules).reason, Some(ExitReason::EodClose));
    }

    #[test]
    fn test_trailing_stop_tightens_and_never_loosens() {
        let rules = ExitRules {
            trailing_stop_pct: Some(dec!(2)),
            eod_close: false,
        };
        let mut t = trade(Direction::Long, dec!(90), dec!(120));

        let d = evaluate_exit(&t, dec!(110), &rules);
        assert_eq!(d.reason, None);
        assert_eq!(d.high_water_mark, dec!(110));
        assert_eq!(d.trailing_stop, Some(dec!(107.80)));
        assert!(d.trailing_updated);
        t.high_water_mark = Some(d.high_water_mark);
        t.trailing_stop_price = d.trailing_stop;

        // Pullback does not lower the stop
        let d = evaluate_exit(&t, dec!(108), &rules);
        assert_eq!(d.reason, None);
        assert_eq!(d.trailing_stop, Some(dec!(107.80)));
        assert!(!d.trailing_updated);

        let d = evaluate_exit(&t, dec!(107.5), &rules);
        assert_eq!(d.reason, Some(ExitReason::TrailingStop));
    }

    #[test]
    fn test_short_trailing_stop() {
        let rules = ExitRules {
            trailing_stop_pct: Some(dec!(2)),
            eod_close: false,
        };
        let mut t = trade(Direction::Short, dec!(110), dec!(80));

        let d = evaluate_exit(&t, dec!(90), &rules);
        assert_eq!(d.trailing_stop, Some(dec!(91.80)));
        t.high_water_mark = Some(d.high_water_mark);
        t.trailing_stop_price = d.trailing_stop;

        let d = evaluate_exit(&t, dec!(92), &rules);
        assert_eq!(d.reason, Some(ExitReason::TrailingStop));
        assert_eq!(d.trailing_stop, Some(dec!(91.80)));
    }

    #[test]
    fn test_stop_takes_priority_over_trailing() {
        let rules = ExitRules {
            trailing_stop_pct: Some(dec!(1)),
            eod_close: true,
        };
        let t = trade(Direction::Long, dec!(98), dec!(104));
        assert_eq!(evaluate_exit(&t, dec!(97), &rules).reason, Some(ExitReason::StopLoss));
    }
}
