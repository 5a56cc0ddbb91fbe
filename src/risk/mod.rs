//! Risk management module
//!
//! Pre-trade gateway, position sizing, and the loss-driven circuit breaker

mod circuit_breaker;
mod gateway;
mod sizing;
mod types;

pub use circuit_breaker::{BreakerTransition, CircuitBreaker, CircuitBreakerState, HaltReason};
pub use gateway::RiskGateway;
pub use sizing::{PositionSizer, SizingStrategy};
pub use types::{RejectReason, RiskCheck, SizingRejection, SizingResult};
