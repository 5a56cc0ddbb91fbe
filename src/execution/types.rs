//! Execution types

use crate::signal::{AssetType, Direction};
use crate::trade::Trade;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account snapshot pulled from the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub cash: Decimal,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that opens a position in `direction`
    pub fn entry(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side that closes a position in `direction`
    pub fn exit(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }
}

/// Entry with attached stop-loss and take-profit, submitted as one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub asset_type: AssetType,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    /// Client order id; the broker rejects or returns the original on reuse
    pub idempotency_key: String,
}

/// Market order closing an open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub asset_type: AssetType,
    pub idempotency_key: String,
}

/// Broker-side order state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Accepted,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_filled(self) -> bool {
        self == OrderStatus::Filled
    }
}

/// Broker acknowledgement of a submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
    pub filled_avg_price: Option<Decimal>,
}

/// Broker-reported order state, looked up by order id or client key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReport {
    pub order_id: String,
    pub client_order_id: String,
    pub status: OrderStatus,
    pub filled_quantity: u64,
    pub filled_avg_price: Option<Decimal>,
}

/// Broker-reported position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    /// Signed quantity: negative for short
    pub quantity: i64,
    pub avg_entry_price: Decimal,
}

/// Broker call failures
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("Broker call timed out after {0}ms")]
    Timeout(u64),
    #[error("Order rejected by broker: {0}")]
    Rejected(String),
    #[error("Broker transport error: {0}")]
    Transport(String),
    #[error("Order {0} not found")]
    NotFound(String),
}

impl BrokerError {
    /// Transient failures worth another attempt with the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Timeout(_) | BrokerError::Transport(_))
    }

    /// Outcome unknown: the order may have reached the broker
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, BrokerError::Timeout(_) | BrokerError::Transport(_))
    }

    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Timeout(_) => "timeout",
            BrokerError::Rejected(_) => "rejected",
            BrokerError::Transport(_) => "transport",
            BrokerError::NotFound(_) => "not_found",
        }
    }
}

/// Order executor outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub trade: Option<Trade>,
    pub error: Option<String>,
    /// Order that would have been sent, in signal-only mode
    pub preview: Option<BracketOrder>,
}

impl ExecutionResult {
    pub fn filled(trade: Trade) -> Self {
        Self {
            success: true,
            trade: Some(trade),
            error: None,
            preview: None,
        }
    }

    pub fn failed(trade: Option<Trade>, error: String) -> Self {
        Self {
            success: false,
            trade,
            error: Some(error),
            preview: None,
        }
    }

    pub fn preview(order: BracketOrder) -> Self {
        Self {
            success: true,
            trade: None,
            error: None,
            preview: Some(order),
        }
    }
}
