//! Price feed module
//!
//! Current quotes for open trades and previews

mod types;

pub use types::Quote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Trait for price feed implementations
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest quote for `symbol`
    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Quote>;
}

/// Price feed serving prices set by the caller.
///
/// Used for paper trading and tests; quotes keep the timestamp they were set at.
#[derive(Default, Clone)]
pub struct StaticPriceFeed {
    quotes: Arc<RwLock<HashMap<String, Quote>>>,
}

impl StaticPriceFeed {
    /// Create an empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the price for a symbol observed now
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.set_price_at(symbol, price, Utc::now()).await;
    }

    /// Set the price for a symbol observed at `timestamp`
    pub async fn set_price_at(&self, symbol: &str, price: Decimal, timestamp: DateTime<Utc>) {
        let quote = Quote {
            symbol: symbol.to_string(),
            price,
            timestamp,
        };
        self.quotes.write().await.insert(symbol.to_string(), quote);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn get_quote(&self, symbol: &str) -> anyhow::Result<Quote> {
        self.quotes
            .read()
            .await
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("No quote available for {}", symbol))
    }
}
