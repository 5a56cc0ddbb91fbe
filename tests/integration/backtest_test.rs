//! Backtest pool and replay through stored bars

use crate::common::{bot_config, breakout_then};
use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tradegate::backtest::{
    BacktestError, BacktestParams, BacktestPool, BacktestStatus, Bar, BarSource,
    InMemoryBarSource, ParquetBarSource,
};
use tradegate::config::{BacktestPoolConfig, ConfigHandle};
use tradegate::data::ParquetWriter;
use tradegate::trade::ExitReason;

fn params(symbol: &str) -> BacktestParams {
    BacktestParams {
        symbol: symbol.into(),
        strategy: "breakout".into(),
        timeframe: "1d".into(),
        start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        initial_capital: dec!(100000),
        position_pct: dec!(10),
    }
}

fn pool(source: Arc<dyn BarSource>, max_concurrent: usize) -> BacktestPool {
    let settings = BacktestPoolConfig {
        max_concurrent,
        ..BacktestPoolConfig::default()
    };
    BacktestPool::new(&settings, ConfigHandle::new(bot_config()).unwrap(), source)
}

/// Blocks every load until released
struct HeldSource {
    bars: InMemoryBarSource,
    released: Arc<(Mutex<bool>, Condvar)>,
}

impl HeldSource {
    fn release(released: &(Mutex<bool>, Condvar)) {
        let (flag, cvar) = released;
        *flag.lock().unwrap() = true;
        cvar.notify_all();
    }
}

impl BarSource for HeldSource {
    fn load(
        &self,
        symbol: &str,
        timeframe: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, BacktestError> {
        let (flag, cvar) = &*self.released;
        let mut released = flag.lock().unwrap();
        while !*released {
            released = cvar.wait(released).unwrap();
        }
        drop(released);
        self.bars.load(symbol, timeframe, start, end)
    }
}

async fn wait_for_count(pool: &BacktestPool, status: BacktestStatus, n: usize) {
    for _ in 0..500 {
        if pool.count(status).await == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pool never reached {} {} runs", n, status);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fourth_run_queues_behind_full_pool() {
    let released = Arc::new((Mutex::new(false), Condvar::new()));
    let mut bars = InMemoryBarSource::new();
    for symbol in ["AAPL", "MSFT", "NVDA", "AMD"] {
        bars.insert(symbol, "1d", breakout_then(&[dec!(112), dec!(115)]));
    }
    let source = HeldSource {
        bars,
        released: released.clone(),
    };
    let pool = pool(Arc::new(source), 3);

    let mut ids = Vec::new();
    for symbol in ["AAPL", "MSFT", "NVDA"] {
        ids.push(pool.submit(params(symbol)).await.unwrap());
    }
    wait_for_count(&pool, BacktestStatus::Running, 3).await;

    let fourth = pool.submit(params("AMD")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.get(fourth).await.unwrap().status, BacktestStatus::Pending);
    assert_eq!(pool.count(BacktestStatus::Running).await, 3);

    HeldSource::release(&released);
    ids.push(fourth);
    for id in ids {
        let result = pool.wait(id).await.unwrap();
        assert_eq!(result.status, BacktestStatus::Completed);
    }

    let fourth = pool.get(fourth).await.unwrap();
    let earliest_finish = pool
        .list()
        .await
        .iter()
        .filter(|r| r.id != fourth.id)
        .filter_map(|r| r.completed_at)
        .min()
        .unwrap();
    assert!(fourth.started_at.unwrap() >= earliest_finish);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_runs_produce_identical_results() {
    let bars = breakout_then(&[dec!(112), dec!(108), dec!(115), dec!(101), dec!(99)]);
    let source = InMemoryBarSource::new().with_bars("AAPL", "1d", bars);
    let pool = pool(Arc::new(source), 2);

    let a = pool.submit(params("AAPL")).await.unwrap();
    let b = pool.submit(params("AAPL")).await.unwrap();
    let a = pool.wait(a).await.unwrap();
    let b = pool.wait(b).await.unwrap();

    assert_eq!(a.status, BacktestStatus::Completed);
    assert_eq!(a.metrics, b.metrics);
    assert_eq!(a.trade_log, b.trade_log);
    assert_eq!(a.equity_curve, b.equity_curve);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_replay_from_parquet_and_export() {
    let dir = tempfile::TempDir::new().unwrap();
    let bars_dir = dir.path().join("bars");
    let writer = ParquetWriter::new(bars_dir.clone());
    let source = ParquetBarSource::new(bars_dir.clone());
    writer
        .write_bars(
            &source.path_for("AAPL", "1d"),
            &breakout_then(&[dec!(112), dec!(115)]),
        )
        .unwrap();

    let pool = pool(Arc::new(source), 1);
    let id = pool.submit(params("AAPL")).await.unwrap();
    let result = pool.wait(id).await.unwrap();

    assert_eq!(result.status, BacktestStatus::Completed);
    assert_eq!(result.trade_log.len(), 1);
    assert_eq!(result.trade_log[0].exit_reason, ExitReason::TakeProfit);
    assert_eq!(result.trade_log[0].pnl, dec!(396));
    let metrics = result.metrics.clone().unwrap();
    assert_eq!(metrics.final_equity, dec!(100396));
    assert_eq!(metrics.total_trades, 1);
    assert_eq!(metrics.winning_trades, 1);

    let (trades, equity) = ParquetWriter::new(dir.path().join("out"))
        .export_backtest(&result)
        .unwrap();
    assert!(trades.exists());
    assert!(equity.exists());
}

#[tokio::test]
async fn test_missing_bars_fail_the_run() {
    let pool = pool(Arc::new(InMemoryBarSource::new()), 1);
    let id = pool.submit(params("AAPL")).await.unwrap();
    let result = pool.wait(id).await.unwrap();

    assert_eq!(result.status, BacktestStatus::Failed);
    assert!(result.error.unwrap().contains("No bars"));
    assert!(result.metrics.is_none());
}
