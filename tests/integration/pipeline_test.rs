//! Signal to closed trade through gateway, sizer, executor, monitor and
//! circuit breaker

use crate::common::{bot_config, signal, Desk};
use chrono::Utc;
use rust_decimal_macros::dec;
use tradegate::bot::{BotError, BotStatus};
use tradegate::config::{BotConfigPatch, ExecutionMode};
use tradegate::execution::BrokerError;
use tradegate::risk::CircuitBreakerState;
use tradegate::trade::{ExitReason, TradeFilter, TradeStatus};

#[tokio::test]
async fn test_fixed_dollar_preview() {
    let desk = Desk::new(bot_config()).await;
    let aapl = signal("AAPL", dec!(185.50));
    desk.publish(&aapl).await;

    let preview = tokio_test::assert_ok!(desk.bot.preview(aapl.id).await);

    assert!(preview.risk_check.approved);
    assert_eq!(preview.sizing.quantity, 13);
    assert_eq!(preview.sizing.notional, dec!(2411.50));
    assert!(!preview.sizing.rejected);
    assert_eq!(desk.broker.order_count().await, 0);
}

#[tokio::test]
async fn test_daily_trade_limit_rejects_next_signal() {
    let desk = Desk::new(bot_config()).await;
    for i in 0..10 {
        let s = signal(&format!("SYM{}", i), dec!(50));
        desk.publish(&s).await;
        assert!(desk.bot.execute(s.id).await.unwrap().success);
    }
    assert_eq!(desk.bot.bot_status().await.daily_trades, 10);

    let next = signal("AAPL", dec!(185.50));
    desk.publish(&next).await;
    let preview = desk.bot.preview(next.id).await.unwrap();

    assert!(!preview.risk_check.approved);
    assert!(preview.risk_check.reason.unwrap().contains("daily trades"));
    assert!(matches!(
        desk.bot.execute(next.id).await,
        Err(BotError::Rejected(_))
    ));
    assert_eq!(desk.broker.order_count().await, 10);
}

#[tokio::test]
async fn test_monitor_closes_at_stop_loss() {
    let desk = Desk::new(bot_config()).await;
    let mut aapl = signal("AAPL", dec!(185.50));
    aapl.stop_loss = Some(dec!(182.00));
    aapl.target_1 = Some(dec!(195.00));
    desk.publish(&aapl).await;

    let trade = desk.bot.execute(aapl.id).await.unwrap().trade.unwrap();
    assert_eq!(trade.status, TradeStatus::Open);
    assert_eq!(trade.stop_loss_price, dec!(182.00));

    desk.feed.set_price("AAPL", dec!(181.50)).await;
    let report = desk.monitor().poll_once(Utc::now()).await;

    assert_eq!(report.closed.len(), 1);
    let closed = &report.closed[0];
    assert_eq!(closed.id, trade.id);
    assert_eq!(closed.status, TradeStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::StopLoss));
    assert_eq!(closed.realized_pl, Some(dec!(-52)));

    let state = desk.bot.bot_status().await;
    assert_eq!(state.consecutive_losses, 1);
    assert_eq!(state.open_positions, 0);
    assert_eq!(state.daily_losses, 1);
}

#[tokio::test]
async fn test_consecutive_losses_halt_new_entries() {
    let desk = Desk::new(bot_config()).await;
    let monitor = desk.monitor();

    for symbol in ["AAPL", "MSFT", "NVDA"] {
        let s = signal(symbol, dec!(100));
        desk.publish(&s).await;
        assert!(desk.bot.execute(s.id).await.unwrap().success);
        desk.feed.set_price(symbol, dec!(97.50)).await;
    }
    let report = monitor.poll_once(Utc::now()).await;
    assert_eq!(report.closed.len(), 3);

    let state = desk.bot.bot_status().await;
    assert_eq!(state.consecutive_losses, 3);
    assert_eq!(state.circuit_breaker, CircuitBreakerState::Halted);

    let next = signal("AMD", dec!(150));
    desk.publish(&next).await;
    let preview = desk.bot.preview(next.id).await.unwrap();
    assert!(!preview.risk_check.approved);
    assert!(preview
        .risk_check
        .reason
        .unwrap()
        .to_lowercase()
        .contains("circuit breaker"));
    assert!(matches!(
        desk.bot.execute(next.id).await,
        Err(BotError::CircuitHalted(_))
    ));
    assert_eq!(desk.broker.order_count().await, 6);
}

#[tokio::test]
async fn test_take_profit_resets_loss_streak() {
    let desk = Desk::new(bot_config()).await;
    let monitor = desk.monitor();

    let loser = signal("AAPL", dec!(100));
    desk.publish(&loser).await;
    desk.bot.execute(loser.id).await.unwrap();
    desk.feed.set_price("AAPL", dec!(97)).await;
    monitor.poll_once(Utc::now()).await;
    assert_eq!(desk.bot.bot_status().await.consecutive_losses, 1);

    let winner = signal("MSFT", dec!(100));
    desk.publish(&winner).await;
    desk.bot.execute(winner.id).await.unwrap();
    desk.feed.set_price("MSFT", dec!(105)).await;
    let report = monitor.poll_once(Utc::now()).await;

    assert_eq!(report.closed[0].exit_reason, Some(ExitReason::TakeProfit));
    let state = desk.bot.bot_status().await;
    assert_eq!(state.consecutive_losses, 0);
    assert_eq!(state.daily_wins, 1);
    assert_eq!(state.daily_pl, dec!(50));
}

#[tokio::test]
async fn test_concurrent_execute_places_one_order() {
    let desk = Desk::new(bot_config()).await;
    let aapl = signal("AAPL", dec!(185.50));
    desk.publish(&aapl).await;

    let (a, b) = tokio::join!(desk.bot.execute(aapl.id), desk.bot.execute(aapl.id));
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.success).count(), 1);
    let failed = results.iter().find(|r| !r.success).unwrap();
    assert!(failed.error.as_ref().unwrap().contains("already executed"));
    assert_eq!(desk.broker.order_count().await, 1);
    assert_eq!(desk.bot.list_trades(&TradeFilter::default()).await.len(), 1);
}

#[tokio::test]
async fn test_broker_rejection_is_not_a_loss() {
    let desk = Desk::new(bot_config()).await;
    let aapl = signal("AAPL", dec!(185.50));
    desk.publish(&aapl).await;
    desk.broker
        .inject_failure(BrokerError::Rejected("insufficient buying power".into()))
        .await;

    let result = desk.bot.execute(aapl.id).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.trade.unwrap().status, TradeStatus::Error);
    let state = desk.bot.bot_status().await;
    assert_eq!(state.consecutive_losses, 0);
    assert_eq!(state.daily_trades, 0);
    assert_eq!(state.open_positions, 0);
}

#[tokio::test]
async fn test_semi_auto_cycle_waits_for_operator() {
    let mut config = bot_config();
    config.execution_mode = ExecutionMode::SemiAuto;
    let desk = Desk::new(config).await;
    let aapl = signal("AAPL", dec!(185.50));
    desk.publish(&aapl).await;

    let report = desk.bot.cycle(Utc::now()).await;
    assert_eq!(report.queued, 1);
    assert_eq!(desk.broker.order_count().await, 0);

    let result = desk.bot.execute(aapl.id).await.unwrap();
    assert!(result.success);
    assert_eq!(desk.bot.active_trades().await.len(), 1);
    assert_eq!(desk.broker.order_count().await, 1);
}

#[tokio::test]
async fn test_config_patch_applies_to_next_evaluation() {
    let desk = Desk::new(bot_config()).await;
    let aapl = signal("AAPL", dec!(185.50));
    desk.publish(&aapl).await;

    let patch = BotConfigPatch {
        min_confidence_score: Some(dec!(80)),
        ..BotConfigPatch::default()
    };
    desk.bot.update_bot_config(&patch).await.unwrap();

    let preview = desk.bot.preview(aapl.id).await.unwrap();
    assert!(!preview.risk_check.approved);
    assert_eq!(preview.config.min_confidence_score, dec!(80));
}

#[tokio::test]
async fn test_operator_halt_and_session_reset() {
    let desk = Desk::new(bot_config()).await;
    let aapl = signal("AAPL", dec!(185.50));
    desk.publish(&aapl).await;

    let state = desk.bot.halt("news pending").await;
    assert_eq!(state.status, BotStatus::Halted);
    assert_eq!(desk.bot.cycle(Utc::now()).await.evaluated, 0);

    let state = desk.bot.reset_session().await.unwrap();
    assert_eq!(state.status, BotStatus::Running);
    assert_eq!(state.start_equity, dec!(100000));
    assert_eq!(desk.bot.cycle(Utc::now()).await.opened, 1);
}
