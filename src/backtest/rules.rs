//! Deterministic bar rules that stand in for the screening funnel in replays

use super::Bar;
use crate::signal::Direction;
use rust_decimal::Decimal;

/// Signal rule, selected by the backtest strategy name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalRule {
    /// Close beyond the highest high / lowest low of the previous `lookback` bars
    Breakout { lookback: usize },
    /// Rate of change over `lookback` bars beyond `threshold_pct`
    Momentum { lookback: usize, threshold_pct: u32 },
    /// Fast simple moving average crossing the slow one
    SmaCross { fast: usize, slow: usize },
}

impl SignalRule {
    pub fn from_strategy(name: &str) -> Option<Self> {
        match name {
            "breakout" => Some(SignalRule::Breakout { lookback: 20 }),
            "momentum" => Some(SignalRule::Momentum {
                lookback: 10,
                threshold_pct: 5,
            }),
            "sma_cross" => Some(SignalRule::SmaCross { fast: 10, slow: 30 }),
            _ => None,
        }
    }

    /// Bars needed before the rule can fire
    pub fn warmup(&self) -> usize {
        match *self {
            SignalRule::Breakout { lookback } => lookback,
            SignalRule::Momentum { lookback, .. } => lookback,
            SignalRule::SmaCross { slow, .. } => slow,
        }
    }

    /// Direction signalled at the close of `bars[i]`, looking only at
    /// `bars[..=i]`
    pub fn signal_at(&self, bars: &[Bar], i: usize) -> Option<Direction> {
        if i < self.warmup() || i >= bars.len() {
            return None;
        }
        let close = bars[i].close;

        match *self {
            SignalRule::Breakout { lookback } => {
                let window = &bars[i - lookback..i];
                let highest = window.iter().map(|b| b.high).max()?;
                let lowest = window.iter().map(|b| b.low).min()?;
                if close > highest {
                    Some(Direction::Long)
                } else if close < lowest {
                    Some(Direction::Short)
                } else {
                    None
                }
            }
            SignalRule::Momentum {
                lookback,
                threshold_pct,
            } => {
                let base = bars[i - lookback].close;
                if base <= Decimal::ZERO {
                    return None;
                }
                let roc = (close - base) / base * Decimal::ONE_HUNDRED;
                let threshold = Decimal::from(threshold_pct);
                if roc >= threshold {
                    Some(Direction::Long)
                } else if roc <= -threshold {
                    Some(Direction::Short)
                } else {
                    None
                }
            }
            SignalRule::SmaCross { fast, slow } => {
                let fast_now = sma(bars, i, fast)?;
                let slow_now = sma(bars, i, slow)?;
                let fast_prev = sma(bars, i - 1, fast)?;
                let slow_prev = sma(bars, i - 1, slow)?;
                if fast_prev <= slow_prev && fast_now > slow_now {
                    Some(Direction::Long)
                } else if fast_prev >= slow_prev && fast_now < slow_now {
                    Some(Direction::Short)
                } else {
                    None
                }
            }
        }
    }
}

/// Mean close of the `period` bars ending at `i`
fn sma(bars: &[Bar], i: usize, period: usize) -> Option<Decimal> {
    if period == 0 || i + 1 < period {
        return None;
    }
    let sum: Decimal = bars[i + 1 - period..=i].iter().map(|b| b.close).sum();
    Some(sum / Decimal::from(period))
}
