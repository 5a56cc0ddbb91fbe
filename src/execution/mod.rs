//! Order execution module
//!
//! Broker boundary, retry policy, paper broker, and the order executor

mod executor;
mod paper;
mod retry;
mod types;

pub use executor::{ExecutionError, OrderExecutor};
pub use paper::PaperBroker;
pub use retry::{with_retry, RetryPolicy};
pub use types::{
    Account, BracketOrder, BrokerError, BrokerPosition, ExecutionResult, ExitOrder, OrderAck,
    OrderReport, OrderSide, OrderStatus,
};

use async_trait::async_trait;

/// Trait for broker implementations
#[async_trait]
pub trait Broker: Send + Sync {
    /// Current account snapshot
    async fn get_account(&self) -> Result<Account, BrokerError>;
    /// Submit entry, stop-loss and take-profit as one request
    async fn place_bracket_order(&self, order: &BracketOrder) -> Result<OrderAck, BrokerError>;
    /// Submit a closing market order
    async fn place_exit_order(&self, order: &ExitOrder) -> Result<OrderAck, BrokerError>;
    /// Look up an order by broker order id or client idempotency key
    async fn get_order_status(&self, order_ref: &str) -> Result<OrderReport, BrokerError>;
    /// Open position in `symbol`, if any
    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>, BrokerError>;
}
