//! Price feed types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest traded price for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Trading symbol (e.g., "AAPL")
    pub symbol: String,
    /// Last price
    pub price: Decimal,
    /// Time the price was observed at the source
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Age of the quote relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}
