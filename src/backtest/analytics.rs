//! Backtest analytics

use super::{EquityPoint, SimulatedTrade};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Summary statistics of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub final_equity: Decimal,
    /// Percent change from initial capital
    pub total_return_pct: Decimal,
    /// Annualized mean over standard deviation of per-bar equity returns
    pub sharpe_ratio: Decimal,
    /// Largest peak-to-trough decline of the equity curve, in percent
    pub max_drawdown_pct: Decimal,
    /// Winning trades as a percentage of all trades
    pub win_rate: Decimal,
    /// Gross wins over gross losses; `None` without any losing trade
    pub profit_factor: Option<Decimal>,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
}

/// Bars per year used to annualize the Sharpe ratio
pub fn periods_per_year(timeframe: &str) -> f64 {
    const TRADING_DAYS: f64 = 252.0;
    const MINUTES_PER_SESSION: f64 = 390.0;

    let Some((split, _)) = timeframe.char_indices().last() else {
        return TRADING_DAYS;
    };
    let (count, unit) = timeframe.split_at(split);
    let count: f64 = count.parse().unwrap_or(1.0);
    if count <= 0.0 {
        return TRADING_DAYS;
    }
    match unit {
        "m" => TRADING_DAYS * MINUTES_PER_SESSION / count,
        "h" => TRADING_DAYS * MINUTES_PER_SESSION / 60.0 / count,
        "w" => 52.0 / count,
        _ => TRADING_DAYS / count,
    }
}

pub fn compute_metrics(
    initial_capital: Decimal,
    equity_curve: &[EquityPoint],
    trades: &[SimulatedTrade],
    periods_per_year: f64,
) -> BacktestMetrics {
    let final_equity = equity_curve
        .last()
        .map(|p| p.value)
        .unwrap_or(initial_capital);
    let total_return_pct = if initial_capital > Decimal::ZERO {
        ((final_equity - initial_capital) / initial_capital * Decimal::ONE_HUNDRED).round_dp(4)
    } else {
        Decimal::ZERO
    };

    let winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
    let losing_trades = trades.len() - winning_trades;
    let win_rate = if trades.is_empty() {
        Decimal::ZERO
    } else {
        (Decimal::from(winning_trades) / Decimal::from(trades.len()) * Decimal::ONE_HUNDRED)
            .round_dp(2)
    };

    let gross_win: Decimal = trades
        .iter()
        .filter(|t| t.pnl > Decimal::ZERO)
        .map(|t| t.pnl)
        .sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| -t.pnl)
        .sum();
    let profit_factor =
        (gross_loss > Decimal::ZERO).then(|| (gross_win / gross_loss).round_dp(4));

    BacktestMetrics {
        final_equity,
        total_return_pct,
        sharpe_ratio: sharpe_ratio(initial_capital, equity_curve, periods_per_year),
        max_drawdown_pct: max_drawdown_pct(initial_capital, equity_curve),
        win_rate,
        profit_factor,
        total_trades: trades.len(),
        winning_trades,
        losing_trades,
    }
}

fn max_drawdown_pct(initial_capital: Decimal, curve: &[EquityPoint]) -> Decimal {
    let mut peak = initial_capital;
    let mut worst = Decimal::ZERO;
    for point in curve {
        peak = peak.max(point.value);
        if peak > Decimal::ZERO {
            worst = worst.max((peak - point.value) / peak * Decimal::ONE_HUNDRED);
        }
    }
    worst.round_dp(4)
}

fn sharpe_ratio(initial_capital: Decimal, curve: &[EquityPoint], periods_per_year: f64) -> Decimal {
    let values: Vec<f64> = std::iter::once(initial_capital)
        .chain(curve.iter().map(|p| p.value))
        .filter_map(|v| v.to_f64())
        .collect();
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();
    if returns.len() < 2 {
        return Decimal::ZERO;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    if std_dev < f64::EPSILON {
        return Decimal::ZERO;
    }

    let sharpe = mean / std_dev * periods_per_year.sqrt();
    Decimal::from_f64(sharpe)
        .map(|s| s.round_dp(4))
        .unwrap_or_default()
}
