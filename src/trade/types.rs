//! Trade record and lifecycle state machine

use crate::signal::{AssetType, Direction, TradingSignal};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Trade lifecycle state.
///
/// ```text
/// pending_approval -> pending_entry -> open -> pending_exit -> closed
///        |                 |            |           |
///        +-> cancelled <---+            +--> error <+
/// ```
///
/// `error` is reachable from every non-terminal state. The only way out of
/// `error` is [`Trade::reconcile_fill`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    PendingApproval,
    PendingEntry,
    Open,
    PendingExit,
    Closed,
    Cancelled,
    Error,
}

impl TradeStatus {
    /// Whether `self -> next` is a legal forward transition
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (PendingApproval, PendingEntry)
                | (PendingApproval, Cancelled)
                | (PendingApproval, Error)
                | (PendingEntry, Open)
                | (PendingEntry, Cancelled)
                | (PendingEntry, Error)
                | (Open, PendingExit)
                | (Open, Error)
                | (PendingExit, Closed)
                | (PendingExit, Error)
        )
    }

    /// Holding a position: counted in `open_positions`
    pub fn is_active(self) -> bool {
        matches!(self, TradeStatus::Open | TradeStatus::PendingExit)
    }

    /// Entry not yet confirmed by the broker
    pub fn is_pre_open(self) -> bool {
        matches!(
            self,
            TradeStatus::PendingApproval | TradeStatus::PendingEntry
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Closed | TradeStatus::Cancelled)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeStatus::PendingApproval => "pending_approval",
            TradeStatus::PendingEntry => "pending_entry",
            TradeStatus::Open => "open",
            TradeStatus::PendingExit => "pending_exit",
            TradeStatus::Closed => "closed",
            TradeStatus::Cancelled => "cancelled",
            TradeStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Why a trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    EodClose,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::EodClose => "eod_close",
            ExitReason::Manual => "manual",
        }
    }
}

/// State invariant violations on trades
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TradeError {
    #[error("Trade {trade_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        trade_id: Uuid,
        from: TradeStatus,
        to: TradeStatus,
    },
    #[error("Trade {0} not found")]
    NotFound(Uuid),
    #[error("Trade {0} is quarantined pending operator review")]
    Quarantined(Uuid),
    #[error("Trade {0} has nothing to reconcile")]
    NothingToReconcile(Uuid),
    #[error("Trade {0} has a broker order in flight")]
    OrderInFlight(Uuid),
}

/// A position taken for exactly one signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    /// Originating signal; also the entry order idempotency key
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub asset_type: AssetType,
    pub strategy: String,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub exit_price: Option<Decimal>,
    pub stop_loss_price: Decimal,
    pub take_profit_price: Decimal,
    /// Current trailing stop level, once trailing has started
    pub trailing_stop_price: Option<Decimal>,
    /// Best price seen since entry (highest for long, lowest for short)
    pub high_water_mark: Option<Decimal>,
    pub status: TradeStatus,
    pub exit_reason: Option<ExitReason>,
    pub realized_pl: Option<Decimal>,
    pub realized_pl_pct: Option<Decimal>,
    pub entry_order_id: Option<String>,
    pub exit_order_id: Option<String>,
    /// Last broker or invariant error
    pub error: Option<String>,
    /// Entry timed out; broker state unknown until reconciled
    pub needs_reconciliation: bool,
    /// Excluded from automated handling until released by the operator
    pub quarantined: bool,
    /// An exit order has been claimed and not yet settled or failed
    #[serde(default)]
    pub exit_in_flight: bool,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// Create a trade for `signal` in an initial pre-open state
    pub fn from_signal(
        signal: &TradingSignal,
        quantity: u64,
        stop_loss_price: Decimal,
        take_profit_price: Decimal,
        status: TradeStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            asset_type: signal.asset_type,
            strategy: signal.strategy.clone(),
            quantity,
            entry_price: signal.entry_price,
            exit_price: None,
            stop_loss_price,
            take_profit_price,
            trailing_stop_price: None,
            high_water_mark: None,
            status,
            exit_reason: None,
            realized_pl: None,
            realized_pl_pct: None,
            entry_order_id: None,
            exit_order_id: None,
            error: None,
            needs_reconciliation: false,
            quarantined: false,
            exit_in_flight: false,
            created_at: now,
            opened_at: None,
            closed_at: None,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing anything but a legal forward transition
    pub fn transition(&mut self, next: TradeStatus, now: DateTime<Utc>) -> Result<(), TradeError> {
        if !self.status.can_transition_to(next) {
            return Err(TradeError::InvalidTransition {
                trade_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record the entry fill: `pending_entry -> open`
    pub fn mark_open(
        &mut self,
        fill_price: Decimal,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        self.transition(TradeStatus::Open, now)?;
        self.entry_price = fill_price;
        self.entry_order_id = Some(order_id);
        self.high_water_mark = Some(fill_price);
        self.opened_at = Some(now);
        Ok(())
    }

    /// Record the exit fill: `pending_exit -> closed`
    pub fn mark_closed(
        &mut self,
        exit_price: Decimal,
        reason: ExitReason,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        self.transition(TradeStatus::Closed, now)?;
        let pl = self.pl_at(exit_price);
        let cost = self.cost_basis();
        self.exit_price = Some(exit_price);
        self.exit_reason = Some(reason);
        self.exit_order_id = Some(order_id);
        self.realized_pl = Some(pl);
        self.realized_pl_pct = Some(if cost.is_zero() {
            Decimal::ZERO
        } else {
            (pl / cost * Decimal::ONE_HUNDRED).round_dp(4)
        });
        self.closed_at = Some(now);
        Ok(())
    }

    /// Record a broker failure: any non-terminal state -> error
    pub fn mark_error(&mut self, message: String, now: DateTime<Utc>) -> Result<(), TradeError> {
        self.transition(TradeStatus::Error, now)?;
        self.error = Some(message);
        Ok(())
    }

    /// Resolve a timed-out entry the broker reports as filled: `error -> open`
    pub fn reconcile_fill(
        &mut self,
        fill_price: Decimal,
        order_id: String,
        now: DateTime<Utc>,
    ) -> Result<(), TradeError> {
        if self.status != TradeStatus::Error || !self.needs_reconciliation {
            return Err(TradeError::NothingToReconcile(self.id));
        }
        self.status = TradeStatus::Open;
        self.needs_reconciliation = false;
        self.entry_price = fill_price;
        self.entry_order_id = Some(order_id);
        self.high_water_mark = Some(fill_price);
        self.opened_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// (exit - entry) * quantity * direction * contract multiplier
    pub fn pl_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price)
            * Decimal::from(self.quantity)
            * self.direction.sign()
            * self.asset_type.multiplier()
    }

    /// Capital committed at entry
    pub fn cost_basis(&self) -> Decimal {
        self.entry_price * Decimal::from(self.quantity) * self.asset_type.multiplier()
    }

    /// Idempotency key for the exit order
    pub fn exit_key(&self) -> String {
        format!("{}-exit", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::test_signal;
    use rust_decimal_macros::dec;

    fn open_trade(direction: Direction) -> Trade {
        let mut signal = test_signal("AAPL", dec!(185.50));
        signal.direction = direction;
        let now = Utc::now();
        let mut trade = Trade::from_signal(
            &signal,
            10,
            dec!(182),
            dec!(192),
            TradeStatus::PendingEntry,
            now,
        );
        trade
            .mark_open(dec!(185.50), "ord-1".to_string(), now)
            .unwrap();
        trade
    }

    #[test]
    fn test_forward_transitions() {
        use TradeStatus::*;
        assert!(PendingApproval.can_transition_to(PendingEntry));
        assert!(PendingEntry.can_transition_to(Open));
        assert!(Open.can_transition_to(PendingExit));
        assert!(PendingExit.can_transition_to(Closed));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        use TradeStatus::*;
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(PendingEntry));
        assert!(!PendingExit.can_transition_to(Open));
        assert!(!Open.can_transition_to(Closed));
        assert!(!Open.can_transition_to(Cancelled));
        assert!(!Error.can_transition_to(Open));
        assert!(!Cancelled.can_transition_to(Error));
    }

    #[test]
    fn test_error_reachable_from_non_terminal_states() {
        use TradeStatus::*;
        for status in [PendingApproval, PendingEntry, Open, PendingExit] {
            assert!(status.can_transition_to(Error), "{status} -> error");
        }
    }

    #[test]
    fn test_invalid_transition_leaves_trade_unchanged() {
        let mut trade = open_trade(Direction::Long);
        let before = trade.clone();

        let err = trade
            .mark_closed(dec!(190), ExitReason::Manual, "x".into(), Utc::now())
            .unwrap_err();

        assert!(matches!(
            err,
            TradeError::InvalidTransition {
                from: TradeStatus::Open,
                to: TradeStatus::Closed,
                ..
            }
        ));
        assert_eq!(trade, before);
    }

    #[test]
    fn test_long_close_realized_pl() {
        let mut trade = open_trade(Direction::Long);
        let now = Utc::now();
        trade.transition(TradeStatus::PendingExit, now).unwrap();
        trade
            .mark_closed(dec!(181.50), ExitReason::StopLoss, "ord-2".into(), now)
            .unwrap();

        assert_eq!(trade.realized_pl, Some(dec!(-40.00)));
        assert_eq!(trade.exit_reason, Some(ExitReason::StopLoss));
        assert!(trade.closed_at.is_some());
    }

    #[test]
    fn test_short_close_realized_pl() {
        let mut trade = open_trade(Direction::Short);
        let now = Utc::now();
        trade.transition(TradeStatus::PendingExit, now).unwrap();
        trade
            .mark_closed(dec!(180.50), ExitReason::TakeProfit, "ord-2".into(), now)
            .unwrap();

        assert_eq!(trade.realized_pl, Some(dec!(50.00)));
    }

    #[test]
    fn test_option_pl_uses_multiplier() {
        let mut signal = test_signal("SPY", dec!(2.50));
        signal.asset_type = AssetType::Option;
        let now = Utc::now();
        let mut trade =
            Trade::from_signal(&signal, 2, dec!(2), dec!(4), TradeStatus::PendingEntry, now);
        trade.mark_open(dec!(2.50), "o".into(), now).unwrap();

        assert_eq!(trade.pl_at(dec!(3.00)), dec!(100.00));
        assert_eq!(trade.cost_basis(), dec!(500.00));
    }

    #[test]
    fn test_reconcile_only_from_flagged_error() {
        let signal = test_signal("AAPL", dec!(100));
        let now = Utc::now();
        let mut trade =
            Trade::from_signal(&signal, 5, dec!(98), dec!(104), TradeStatus::PendingEntry, now);
        trade.mark_error("timeout".into(), now).unwrap();

        assert_eq!(
            trade.reconcile_fill(dec!(100), "o".into(), now),
            Err(TradeError::NothingToReconcile(trade.id))
        );

        trade.needs_reconciliation = true;
        trade.reconcile_fill(dec!(100.10), "o".into(), now).unwrap();
        assert_eq!(trade.status, TradeStatus::Open);
        assert_eq!(trade.entry_price, dec!(100.10));
        assert!(!trade.needs_reconciliation);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TradeStatus::PendingExit).unwrap();
        assert_eq!(json, "\"pending_exit\"");
        assert_eq!(TradeStatus::PendingApproval.to_string(), "pending_approval");
    }
}
