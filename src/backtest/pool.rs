//! Bounded-concurrency backtest pool
//!
//! Runs are admitted through a FIFO semaphore; requests beyond the pool size
//! wait as `pending` rather than fail. Each run executes on a blocking worker
//! with its own simulator, a cancel flag and a timeout. Only the newest
//! `max_retained` finished runs are kept.

use super::{
    compute_metrics, periods_per_year, BacktestError, BacktestParams, BacktestResult,
    BacktestSimulator, BacktestStatus, BarSource, SimulationOutput,
};
use crate::config::{BacktestPoolConfig, ConfigHandle};
use crate::telemetry::{self, GaugeMetric};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock, Semaphore};
use uuid::Uuid;

struct RunEntry {
    result: BacktestResult,
    cancel: Arc<AtomicBool>,
    status: watch::Sender<BacktestStatus>,
}

/// Schedules backtest runs and keeps their results
#[derive(Clone)]
pub struct BacktestPool {
    semaphore: Arc<Semaphore>,
    runs: Arc<RwLock<HashMap<Uuid, RunEntry>>>,
    source: Arc<dyn BarSource>,
    config: ConfigHandle,
    run_timeout: Duration,
    max_concurrent: usize,
    max_retained: usize,
}

impl BacktestPool {
    pub fn new(
        settings: &BacktestPoolConfig,
        config: ConfigHandle,
        source: Arc<dyn BarSource>,
    ) -> Self {
        let max_concurrent = settings.max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            runs: Arc::new(RwLock::new(HashMap::new())),
            source,
            config,
            run_timeout: Duration::from_secs(settings.run_timeout_secs),
            max_concurrent,
            max_retained: settings.max_retained,
        }
    }

    /// Override the per-run timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Queue a run and return its id immediately
    pub async fn submit(&self, params: BacktestParams) -> Result<Uuid, BacktestError> {
        params.validate()?;
        let id = Uuid::new_v4();
        let cancel = Arc::new(AtomicBool::new(false));
        let (status, _) = watch::channel(BacktestStatus::Pending);

        self.runs.write().await.insert(
            id,
            RunEntry {
                result: BacktestResult::pending(id, params.clone(), Utc::now()),
                cancel: cancel.clone(),
                status,
            },
        );
        tracing::info!(
            backtest_id = %id,
            symbol = %params.symbol,
            strategy = %params.strategy,
            "Backtest submitted"
        );

        let pool = self.clone();
        tokio::spawn(async move { pool.drive(id, params, cancel).await });
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<BacktestResult> {
        self.runs.read().await.get(&id).map(|e| e.result.clone())
    }

    /// All runs, oldest submission first
    pub async fn list(&self) -> Vec<BacktestResult> {
        let mut results: Vec<BacktestResult> = self
            .runs
            .read()
            .await
            .values()
            .map(|e| e.result.clone())
            .collect();
        results.sort_by_key(|r| r.submitted_at);
        results
    }

    /// Number of runs in `status`
    pub async fn count(&self, status: BacktestStatus) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|e| e.result.status == status)
            .count()
    }

    /// Cancel a pending or running backtest.
    ///
    /// A pending run fails at once; a running one stops at its next bar.
    pub async fn cancel(&self, id: Uuid) -> Result<BacktestStatus, BacktestError> {
        let mut runs = self.runs.write().await;
        let entry = runs.get_mut(&id).ok_or(BacktestError::NotFound(id))?;
        if entry.result.status.is_terminal() {
            return Err(BacktestError::AlreadyFinished(id));
        }
        entry.cancel.store(true, Ordering::Relaxed);
        tracing::info!(backtest_id = %id, status = %entry.result.status, "Backtest cancel requested");

        let status = if entry.result.status == BacktestStatus::Pending {
            fail(entry, &BacktestError::Cancelled);
            prune(&mut runs, self.max_retained);
            BacktestStatus::Failed
        } else {
            entry.result.status
        };
        Ok(status)
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait(&self, id: Uuid) -> Result<BacktestResult, BacktestError> {
        let mut status = self
            .runs
            .read()
            .await
            .get(&id)
            .ok_or(BacktestError::NotFound(id))?
            .status
            .subscribe();
        status
            .wait_for(|s| s.is_terminal())
            .await
            .map(|_| ())
            .map_err(|_| BacktestError::Worker("status channel closed".into()))?;
        self.get(id).await.ok_or(BacktestError::NotFound(id))
    }

    async fn drive(&self, id: Uuid, params: BacktestParams, cancel: Arc<AtomicBool>) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.finish(id, Err(BacktestError::Worker("pool closed".into())), None)
                    .await;
                return;
            }
        };
        if cancel.load(Ordering::Relaxed) {
            self.finish(id, Err(BacktestError::Cancelled), None).await;
            return;
        }

        let started = Instant::now();
        self.mark_running(id).await;

        let config = self.config.snapshot().await;
        let source = self.source.clone();
        let flag = cancel.clone();
        let run_params = params.clone();
        let task = tokio::task::spawn_blocking(move || -> Result<SimulationOutput, BacktestError> {
            let bars = source.load(
                &run_params.symbol,
                &run_params.timeframe,
                run_params.start,
                run_params.end,
            )?;
            BacktestSimulator::new(&config, run_params)?.run(&bars, &flag)
        });

        let outcome = match tokio::time::timeout(self.run_timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join)) => Err(BacktestError::Worker(join.to_string())),
            Err(_) => {
                cancel.store(true, Ordering::Relaxed);
                Err(BacktestError::TimedOut(self.run_timeout.as_secs()))
            }
        };
        self.finish(id, outcome, Some(started.elapsed())).await;
        drop(permit);
    }

    async fn mark_running(&self, id: Uuid) {
        {
            let mut runs = self.runs.write().await;
            if let Some(entry) = runs.get_mut(&id) {
                if entry.result.status == BacktestStatus::Pending {
                    entry.result.status = BacktestStatus::Running;
                    entry.result.started_at = Some(Utc::now());
                    entry.status.send_replace(BacktestStatus::Running);
                }
            }
        }
        tracing::info!(backtest_id = %id, "Backtest running");
        self.update_running_gauge().await;
    }

    async fn finish(
        &self,
        id: Uuid,
        outcome: Result<SimulationOutput, BacktestError>,
        elapsed: Option<Duration>,
    ) {
        {
            let mut runs = self.runs.write().await;
            let Some(entry) = runs.get_mut(&id) else {
                return;
            };
            if entry.result.status.is_terminal() {
                return;
            }

            match outcome {
                Ok(output) => {
                    let result = &mut entry.result;
                    result.metrics = Some(compute_metrics(
                        result.params.initial_capital,
                        &output.equity_curve,
                        &output.trade_log,
                        periods_per_year(&result.params.timeframe),
                    ));
                    result.equity_curve = output.equity_curve;
                    result.trade_log = output.trade_log;
                    result.rejected_signals = output.rejected_signals;
                    result.status = BacktestStatus::Completed;
                    result.completed_at = Some(Utc::now());
                    entry.status.send_replace(BacktestStatus::Completed);
                    tracing::info!(
                        backtest_id = %id,
                        trades = result.trade_log.len(),
                        total_return_pct = ?result.metrics.as_ref().map(|m| m.total_return_pct),
                        "Backtest completed"
                    );
                }
                Err(e) => {
                    tracing::warn!(backtest_id = %id, error = %e, "Backtest failed");
                    fail(entry, &e);
                }
            }

            if let Some(elapsed) = elapsed {
                telemetry::record_backtest_finished(entry.result.status.as_str(), elapsed);
            }
            prune(&mut runs, self.max_retained);
        }
        self.update_running_gauge().await;
    }

    async fn update_running_gauge(&self) {
        let running = self.count(BacktestStatus::Running).await;
        telemetry::set_gauge(GaugeMetric::BacktestsRunning, running as f64);
    }
}

/// Drop the oldest finished runs beyond `keep`
fn prune(runs: &mut HashMap<Uuid, RunEntry>, keep: usize) {
    let mut finished: Vec<_> = runs
        .iter()
        .filter(|(_, e)| e.result.status.is_terminal())
        .map(|(id, e)| (e.result.completed_at, *id))
        .collect();
    if finished.len() <= keep {
        return;
    }
    finished.sort();
    let excess = finished.len() - keep;
    for (_, id) in finished.into_iter().take(excess) {
        runs.remove(&id);
        tracing::debug!(backtest_id = %id, "Dropped finished backtest");
    }
}

fn fail(entry: &mut RunEntry, error: &BacktestError) {
    entry.result.status = BacktestStatus::Failed;
    entry.result.error = Some(error.to_string());
    entry.result.completed_at = Some(Utc::now());
    entry.status.send_replace(BacktestStatus::Failed);
}
