//! Prometheus metrics

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::bot::BotState;

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Current equity
    Equity,
    /// Daily realized P&L
    DailyPnl,
    /// Open position count
    OpenPositions,
    /// Drawdown from session start
    DrawdownPct,
    /// Circuit breaker level (0 none, 1 warning, 2 halted)
    CircuitBreaker,
    /// Backtest runs currently executing
    BacktestsRunning,
}

impl GaugeMetric {
    fn name(self) -> &'static str {
        match self {
            GaugeMetric::Equity => "tradegate_equity_usd",
            GaugeMetric::DailyPnl => "tradegate_daily_pnl_usd",
            GaugeMetric::OpenPositions => "tradegate_open_positions",
            GaugeMetric::DrawdownPct => "tradegate_drawdown_pct",
            GaugeMetric::CircuitBreaker => "tradegate_circuit_breaker_level",
            GaugeMetric::BacktestsRunning => "tradegate_backtests_running",
        }
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    ::metrics::gauge!(metric.name()).set(value);
}

/// Publish the bot state gauges
pub fn update_bot_gauges(state: &BotState) {
    set_gauge(GaugeMetric::Equity, to_f64(state.current_equity));
    set_gauge(GaugeMetric::DailyPnl, to_f64(state.daily_pl));
    set_gauge(GaugeMetric::OpenPositions, f64::from(state.open_positions));
    set_gauge(GaugeMetric::DrawdownPct, to_f64(state.drawdown_pct()));
    set_gauge(GaugeMetric::CircuitBreaker, state.circuit_breaker.level());
}

/// Count a risk gateway decision
pub fn record_signal_evaluated(approved: bool, reject_kind: Option<&'static str>) {
    let outcome = if approved { "approved" } else { "rejected" };
    ::metrics::counter!("tradegate_signals_evaluated_total", "outcome" => outcome).increment(1);
    if let Some(kind) = reject_kind {
        ::metrics::counter!("tradegate_signals_rejected_total", "reason" => kind).increment(1);
    }
}

/// Count a sizing rejection
pub fn record_sizing_rejected(mode: &str) {
    ::metrics::counter!("tradegate_sizing_rejected_total", "mode" => mode.to_string())
        .increment(1);
}

/// Count an order accepted by the broker
pub fn record_order_placed(kind: &'static str) {
    ::metrics::counter!("tradegate_orders_placed_total", "kind" => kind).increment(1);
}

/// Count a failed broker call
pub fn record_broker_error(op: &str, kind: &'static str) {
    ::metrics::counter!(
        "tradegate_broker_errors_total",
        "op" => op.to_string(),
        "kind" => kind
    )
    .increment(1);
}

/// Record broker call latency
pub fn record_broker_latency(op: &str, duration: Duration) {
    ::metrics::histogram!("tradegate_broker_latency_ms", "op" => op.to_string())
        .record(duration.as_secs_f64() * 1000.0);
}

/// Count a closed trade
pub fn record_trade_closed(exit_reason: &'static str, realized_pl: Decimal) {
    let outcome = if realized_pl > Decimal::ZERO { "win" } else { "loss" };
    ::metrics::counter!(
        "tradegate_trades_closed_total",
        "exit_reason" => exit_reason,
        "outcome" => outcome
    )
    .increment(1);
}

/// Count a finished backtest run
pub fn record_backtest_finished(status: &'static str, elapsed: Duration) {
    ::metrics::counter!("tradegate_backtests_total", "status" => status).increment(1);
    ::metrics::histogram!("tradegate_backtest_duration_secs").record(elapsed.as_secs_f64());
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
