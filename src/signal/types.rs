//! Signal types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

/// Instrument class of a signal or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    #[default]
    Stock,
    Option,
}

impl AssetType {
    /// Units controlled by one quantity step (shares per option contract)
    pub fn multiplier(&self) -> Decimal {
        match self {
            AssetType::Stock => Decimal::ONE,
            AssetType::Option => Decimal::ONE_HUNDRED,
        }
    }
}

/// Lifecycle state of a signal, owned by the signal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStatus {
    Active,
    Executed,
    Expired,
    Cancelled,
}

/// A trading signal produced by the external screening funnel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingSignal {
    /// Unique signal identifier, also used as the broker idempotency key
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub strategy: String,
    pub timeframe: String,
    #[serde(default)]
    pub asset_type: AssetType,
    /// Screening confidence, 0-100
    pub confidence_score: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub target_1: Option<Decimal>,
    #[serde(default)]
    pub target_2: Option<Decimal>,
    pub risk_reward_ratio: Decimal,
    pub status: SignalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TradingSignal {
    /// Whether the signal has passed its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Stop price to attach, falling back to `default_pct` away from entry
    pub fn effective_stop(&self, default_pct: Decimal) -> Decimal {
        self.stop_loss.unwrap_or_else(|| {
            let offset = self.entry_price * default_pct / Decimal::ONE_HUNDRED;
            self.entry_price - offset * self.direction.sign()
        })
    }

    /// Take-profit price to attach, falling back to `default_pct` away from entry
    pub fn effective_target(&self, default_pct: Decimal) -> Decimal {
        self.target_1.unwrap_or_else(|| {
            let offset = self.entry_price * default_pct / Decimal::ONE_HUNDRED;
            self.entry_price + offset * self.direction.sign()
        })
    }
}
