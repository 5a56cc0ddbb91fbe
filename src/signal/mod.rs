//! Trading signals
//!
//! Signals are created by the external screening funnel; this crate only
//! reads them through [`SignalSource`].

mod types;

#[cfg(test)]
pub(crate) use types::tests::test_signal;
pub use types::{AssetType, Direction, SignalStatus, TradingSignal};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for signal source implementations
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Signals with `status == active` that have not expired at `now`
    async fn list_active_signals(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<TradingSignal>>;
    /// Look up a signal by id regardless of status
    async fn get_signal(&self, id: Uuid) -> anyhow::Result<Option<TradingSignal>>;
}

/// Signal source backed by an in-memory map, optionally seeded from JSON
#[derive(Default)]
pub struct InMemorySignalSource {
    signals: Arc<RwLock<HashMap<Uuid, TradingSignal>>>,
}

impl InMemorySignalSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source holding `signals`
    pub fn with_signals(signals: impl IntoIterator<Item = TradingSignal>) -> Self {
        let map = signals.into_iter().map(|s| (s.id, s)).collect();
        Self {
            signals: Arc::new(RwLock::new(map)),
        }
    }

    /// Load a JSON array of signals from disk
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let signals: Vec<TradingSignal> = serde_json::from_str(&content)?;
        Ok(Self::with_signals(signals))
    }

    /// Add or replace a signal
    pub async fn insert(&self, signal: TradingSignal) {
        self.signals.write().await.insert(signal.id, signal);
    }
}

#[async_trait]
impl SignalSource for InMemorySignalSource {
    async fn list_active_signals(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<TradingSignal>> {
        let signals = self.signals.read().await;
        let mut active: Vec<TradingSignal> = signals
            .values()
            .filter(|s| s.status == SignalStatus::Active && !s.is_expired(now))
            .cloned()
            .collect();
        active.sort_by_key(|s| s.created_at);
        Ok(active)
    }

    async fn get_signal(&self, id: Uuid) -> anyhow::Result<Option<TradingSignal>> {
        Ok(self.signals.read().await.get(&id).cloned())
    }
}
