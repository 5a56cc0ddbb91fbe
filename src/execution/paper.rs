//! Paper trading broker

use super::{
    Account, BracketOrder, Broker, BrokerError, BrokerPosition, ExitOrder, OrderAck, OrderReport,
    OrderSide, OrderStatus,
};
use crate::feed::PriceFeed;
use crate::signal::AssetType;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Injected failure for the next broker order call
#[derive(Debug, Clone)]
enum Fault {
    /// Return the error without touching broker state
    Fail(BrokerError),
    /// Accept and fill the order, then report a timeout to the caller
    LostAck,
}

#[derive(Debug)]
struct PaperPosition {
    quantity: i64,
    avg_price: Decimal,
    multiplier: Decimal,
}

#[derive(Debug)]
struct PaperBook {
    realized_pl: Decimal,
    orders: HashMap<String, OrderReport>,
    positions: HashMap<String, PaperPosition>,
    faults: VecDeque<Fault>,
    next_order: u64,
}

/// Paper broker with immediate simulated fills.
///
/// Bracket entries fill at the requested entry price. Exits fill at the
/// attached price feed's quote, or are acknowledged without a fill price when
/// no feed is attached. Orders are deduplicated by idempotency key.
pub struct PaperBroker {
    starting_equity: Decimal,
    latency: Duration,
    feed: Option<Arc<dyn PriceFeed>>,
    book: Arc<RwLock<PaperBook>>,
}

impl PaperBroker {
    /// Create a paper broker with `equity` in cash
    pub fn new(equity: Decimal) -> Self {
        Self {
            starting_equity: equity,
            latency: Duration::ZERO,
            feed: None,
            book: Arc::new(RwLock::new(PaperBook {
                realized_pl: Decimal::ZERO,
                orders: HashMap::new(),
                positions: HashMap::new(),
                faults: VecDeque::new(),
                next_order: 1,
            })),
        }
    }

    /// Fill exits at quotes from `feed`
    pub fn with_feed(mut self, feed: Arc<dyn PriceFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Delay every order call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next order call with `error`
    pub async fn inject_failure(&self, error: BrokerError) {
        self.book.write().await.faults.push_back(Fault::Fail(error));
    }

    /// Fill the next order but report a timeout to the caller
    pub async fn inject_lost_ack(&self) {
        self.book.write().await.faults.push_back(Fault::LostAck);
    }

    /// Number of distinct orders accepted
    pub async fn order_count(&self) -> usize {
        self.book.read().await.orders.len()
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn exit_fill_price(&self, symbol: &str) -> Option<Decimal> {
        let feed = self.feed.as_ref()?;
        match feed.get_quote(symbol).await {
            Ok(quote) => Some(quote.price),
            Err(e) => {
                tracing::debug!(symbol, error = %e, "No quote for paper exit fill");
                None
            }
        }
    }
}

impl PaperBook {
    fn take_fault(&mut self) -> Option<Fault> {
        self.faults.pop_front()
    }

    fn existing(&self, key: &str) -> Option<OrderAck> {
        self.orders.get(key).map(|report| OrderAck {
            order_id: report.order_id.clone(),
            status: report.status,
            filled_avg_price: report.filled_avg_price,
        })
    }

    fn record_fill(
        &mut self,
        key: &str,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        asset_type: AssetType,
        price: Option<Decimal>,
    ) -> OrderAck {
        let order_id = format!("paper-{}", self.next_order);
        self.next_order += 1;

        if let Some(price) = price {
            self.apply_fill(symbol, side, quantity, asset_type, price);
        }

        self.orders.insert(
            key.to_string(),
            OrderReport {
                order_id: order_id.clone(),
                client_order_id: key.to_string(),
                status: OrderStatus::Filled,
                filled_quantity: quantity,
                filled_avg_price: price,
            },
        );

        OrderAck {
            order_id,
            status: OrderStatus::Filled,
            filled_avg_price: price,
        }
    }

    fn apply_fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: u64,
        asset_type: AssetType,
        price: Decimal,
    ) {
        let signed = i64::try_from(quantity).unwrap_or(i64::MAX)
            * if side == OrderSide::Buy { 1 } else { -1 };
        let position = self
            .positions
            .entry(symbol.to_string())
            .or_insert(PaperPosition {
                quantity: 0,
                avg_price: price,
                multiplier: asset_type.multiplier(),
            });

        let reducing = position.quantity != 0 && position.quantity.signum() != signed.signum();
        if reducing {
            let closed = signed.abs().min(position.quantity.abs());
            let sign = Decimal::from(position.quantity.signum());
            self.realized_pl +=
                (price - position.avg_price) * Decimal::from(closed) * sign * position.multiplier;
            if signed.abs() > position.quantity.abs() {
                // Flipped through flat: the remainder opens at this price
                position.avg_price = price;
            }
        } else {
            let held = Decimal::from(position.quantity.abs());
            let added = Decimal::from(signed.abs());
            position.avg_price = (position.avg_price * held + price * added) / (held + added);
        }
        position.quantity += signed;

        if position.quantity == 0 {
            self.positions.remove(symbol);
        }
    }

    fn open_cost(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.avg_price * Decimal::from(p.quantity.abs()) * p.multiplier)
            .sum()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        let book = self.book.read().await;
        let equity = self.starting_equity + book.realized_pl;
        let cash = equity - book.open_cost();
        Ok(Account {
            equity,
            buying_power: cash.max(Decimal::ZERO),
            cash,
        })
    }

    async fn place_bracket_order(&self, order: &BracketOrder) -> Result<OrderAck, BrokerError> {
        self.simulate_latency().await;
        let mut book = self.book.write().await;

        if let Some(ack) = book.existing(&order.idempotency_key) {
            tracing::info!(key = %order.idempotency_key, "Duplicate paper order, returning original");
            return Ok(ack);
        }

        let lost_ack = match book.take_fault() {
            Some(Fault::Fail(e)) => return Err(e),
            Some(Fault::LostAck) => true,
            None => false,
        };

        let ack = book.record_fill(
            &order.idempotency_key,
            &order.symbol,
            order.side,
            order.quantity,
            order.asset_type,
            Some(order.entry_price),
        );
        tracing::info!(
            order_id = %ack.order_id,
            symbol = %order.symbol,
            quantity = order.quantity,
            price = %order.entry_price,
            "Paper bracket order filled"
        );

        if lost_ack {
            return Err(BrokerError::Timeout(0));
        }
        Ok(ack)
    }

    async fn place_exit_order(&self, order: &ExitOrder) -> Result<OrderAck, BrokerError> {
        self.simulate_latency().await;
        let price = self.exit_fill_price(&order.symbol).await;
        let mut book = self.book.write().await;

        if let Some(ack) = book.existing(&order.idempotency_key) {
            return Ok(ack);
        }

        let lost_ack = match book.take_fault() {
            Some(Fault::Fail(e)) => return Err(e),
            Some(Fault::LostAck) => true,
            None => false,
        };

        let ack = book.record_fill(
            &order.idempotency_key,
            &order.symbol,
            order.side,
            order.quantity,
            order.asset_type,
            price,
        );
        tracing::info!(order_id = %ack.order_id, symbol = %order.symbol, "Paper exit order filled");

        if lost_ack {
            return Err(BrokerError::Timeout(0));
        }
        Ok(ack)
    }

    async fn get_order_status(&self, order_ref: &str) -> Result<OrderReport, BrokerError> {
        let book = self.book.read().await;
        book.orders
            .get(order_ref)
            .or_else(|| book.orders.values().find(|r| r.order_id == order_ref))
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(order_ref.to_string()))
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<BrokerPosition>, BrokerError> {
        let book = self.book.read().await;
        Ok(book.positions.get(symbol).map(|p| BrokerPosition {
            symbol: symbol.to_string(),
            quantity: p.quantity,
            avg_entry_price: p.avg_price,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::StaticPriceFeed;
    use rust_decimal_macros::dec;

    fn bracket(key: &str, side: OrderSide) -> BracketOrder {
        BracketOrder {
            symbol: "AAPL".to_string(),
            side,
            quantity: 10,
            asset_type: AssetType::Stock,
            entry_price: dec!(100),
            stop_price: dec!(98),
            take_profit_price: dec!(104),
            idempotency_key: key.to_string(),
        }
    }

    fn exit(key: &str, side: OrderSide) -> ExitOrder {
        ExitOrder {
            symbol: "AAPL".to_string(),
            side,
            quantity: 10,
            asset_type: AssetType::Stock,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_bracket_fills_at_entry_price() {
        let broker = PaperBroker::new(dec!(10000));
        let ack = broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap();

        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(ack.filled_avg_price, Some(dec!(100)));

        let account = broker.get_account().await.unwrap();
        assert_eq!(account.equity, dec!(10000));
        assert_eq!(account.cash, dec!(9000));

        let position = broker.get_position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.quantity, 10);
    }

    #[tokio::test]
    async fn test_duplicate_key_returns_original_order() {
        let broker = PaperBroker::new(dec!(10000));
        let first = broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap();
        let second = broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap();

        assert_eq!(first.order_id, second.order_id);
        assert_eq!(broker.order_count().await, 1);
        let position = broker.get_position("AAPL").await.unwrap().unwrap();
        assert_eq!(position.quantity, 10);
    }

    #[tokio::test]
    async fn test_exit_realizes_pl_at_feed_price() {
        let feed = StaticPriceFeed::new();
        feed.set_price("AAPL", dec!(103)).await;
        let broker = PaperBroker::new(dec!(10000)).with_feed(Arc::new(feed));

        broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap();
        let ack = broker
            .place_exit_order(&exit("t-1-exit", OrderSide::Sell))
            .await
            .unwrap();

        assert_eq!(ack.filled_avg_price, Some(dec!(103)));
        assert!(broker.get_position("AAPL").await.unwrap().is_none());
        let account = broker.get_account().await.unwrap();
        assert_eq!(account.equity, dec!(10030));
        assert_eq!(account.cash, dec!(10030));
    }

    #[tokio::test]
    async fn test_short_round_trip() {
        let feed = StaticPriceFeed::new();
        feed.set_price("AAPL", dec!(95)).await;
        let broker = PaperBroker::new(dec!(10000)).with_feed(Arc::new(feed));

        broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Sell))
            .await
            .unwrap();
        broker
            .place_exit_order(&exit("t-1-exit", OrderSide::Buy))
            .await
            .unwrap();

        assert_eq!(broker.get_account().await.unwrap().equity, dec!(10050));
    }

    #[tokio::test]
    async fn test_injected_failure_leaves_no_order() {
        let broker = PaperBroker::new(dec!(10000));
        broker
            .inject_failure(BrokerError::Rejected("market closed".into()))
            .await;

        let err = broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected(_)));
        assert_eq!(broker.order_count().await, 0);

        // Next call succeeds
        broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap();
        assert_eq!(broker.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_lost_ack_is_visible_via_order_status() {
        let broker = PaperBroker::new(dec!(10000));
        broker.inject_lost_ack().await;

        let err = broker
            .place_bracket_order(&bracket("sig-1", OrderSide::Buy))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Timeout(_)));

        let report = broker.get_order_status("sig-1").await.unwrap();
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.filled_avg_price, Some(dec!(100)));

        let by_id = broker.get_order_status(&report.order_id).await.unwrap();
        assert_eq!(by_id.client_order_id, "sig-1");
    }

    #[tokio::test]
    async fn test_unknown_order_status() {
        let broker = PaperBroker::new(dec!(10000));
        let err = broker.get_order_status("missing").await.unwrap_err();
        assert_eq!(err, BrokerError::NotFound("missing".into()));
    }
}
