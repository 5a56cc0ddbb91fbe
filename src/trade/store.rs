//! Trade bookkeeping

use super::{Trade, TradeError, TradeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Filters for listing trades
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeFilter {
    pub status: Option<TradeStatus>,
    pub symbol: Option<String>,
    /// Only trades created at or after this time
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TradeFilter {
    fn matches(&self, trade: &Trade) -> bool {
        self.status.map_or(true, |s| trade.status == s)
            && self
                .symbol
                .as_deref()
                .map_or(true, |s| trade.symbol.eq_ignore_ascii_case(s))
            && self.since.map_or(true, |t| trade.created_at >= t)
    }
}

/// All trades, indexed by id and by originating signal
#[derive(Debug, Default)]
pub struct TradeStore {
    trades: HashMap<Uuid, Trade>,
    by_signal: HashMap<Uuid, Uuid>,
}

impl TradeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new trade. Fails if the signal already has a trade.
    pub fn insert(&mut self, trade: Trade) -> Result<&Trade, Uuid> {
        if let Some(existing) = self.by_signal.get(&trade.signal_id) {
            return Err(*existing);
        }
        let id = trade.id;
        self.by_signal.insert(trade.signal_id, id);
        Ok(self.trades.entry(id).or_insert(trade))
    }

    pub fn get(&self, id: Uuid) -> Option<&Trade> {
        self.trades.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Result<&mut Trade, TradeError> {
        self.trades.get_mut(&id).ok_or(TradeError::NotFound(id))
    }

    /// Trade created for `signal_id`, if any
    pub fn for_signal(&self, signal_id: Uuid) -> Option<&Trade> {
        self.by_signal
            .get(&signal_id)
            .and_then(|id| self.trades.get(id))
    }

    /// Trades holding a position (`open` or `pending_exit`), oldest first
    pub fn active(&self) -> Vec<Trade> {
        let mut active: Vec<Trade> = self
            .trades
            .values()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|t| t.created_at);
        active
    }

    /// Number of trades holding a position
    pub fn active_count(&self) -> usize {
        self.trades.values().filter(|t| t.status.is_active()).count()
    }

    /// Number of entries reserved but not yet confirmed by the broker
    pub fn in_flight_entries(&self) -> usize {
        self.trades
            .values()
            .filter(|t| t.status == TradeStatus::PendingEntry)
            .count()
    }

    /// Trades in `error` awaiting a broker status check
    pub fn awaiting_reconciliation(&self) -> Vec<Trade> {
        self.trades
            .values()
            .filter(|t| {
                t.status == TradeStatus::Error && t.needs_reconciliation && !t.quarantined
            })
            .cloned()
            .collect()
    }

    /// Trades matching `filter`, newest first
    pub fn list(&self, filter: &TradeFilter) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self
            .trades
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        trades.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            trades.truncate(limit);
        }
        trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}
