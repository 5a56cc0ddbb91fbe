//! Trade records
//!
//! One trade per executed signal, with an explicit lifecycle state machine

mod store;
mod types;

pub use store::{TradeFilter, TradeStore};
pub use types::{ExitReason, Trade, TradeError, TradeStatus};
