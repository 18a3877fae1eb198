//! Paper execution gateway: venue behavior without a venue.
//!
//! Fills market orders at the simulated price, keeps a venue-side book
//! with resting stop orders, and answers duplicate closes with
//! `AlreadyClosed`. Failure toggles let tests exercise unreachability,
//! stop rejection and a venue stop that never fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapter::sim::SimMarket;
use crate::domain::{PositionId, Side, Symbol};
use crate::error::GatewayError;
use crate::port::{ExchangePosition, ExecutionGateway, OrderRequest, OrderResult, OrderType};

struct VenuePosition {
    side: Side,
    quantity: Decimal,
    entry_price: Decimal,
    stop: Option<Decimal>,
}

/// In-process venue.
pub struct PaperGateway {
    prices: Arc<SimMarket>,
    book: Mutex<HashMap<Symbol, VenuePosition>>,
    replays: Mutex<HashMap<Uuid, OrderResult>>,
    order_seq: AtomicU64,
    unreachable: AtomicBool,
    reject_stops: AtomicBool,
    freeze_stops: AtomicBool,
}

impl PaperGateway {
    /// Create a gateway over the simulated market.
    #[must_use]
    pub fn new(prices: Arc<SimMarket>) -> Self {
        Self {
            prices,
            book: Mutex::new(HashMap::new()),
            replays: Mutex::new(HashMap::new()),
            order_seq: AtomicU64::new(1),
            unreachable: AtomicBool::new(false),
            reject_stops: AtomicBool::new(false),
            freeze_stops: AtomicBool::new(false),
        }
    }

    /// Simulate total gateway unreachability.
    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }

    /// Make the venue reject stop orders.
    pub fn set_reject_stops(&self, value: bool) {
        self.reject_stops.store(value, Ordering::SeqCst);
    }

    /// Accept stop orders but never trigger them (a pending, unconfirmed
    /// venue stop).
    pub fn set_freeze_stops(&self, value: bool) {
        self.freeze_stops.store(value, Ordering::SeqCst);
    }

    /// Whether the venue currently holds a position in `symbol`.
    #[must_use]
    pub fn venue_has_position(&self, symbol: &Symbol) -> bool {
        self.book.lock().contains_key(symbol)
    }

    /// Close a position venue-side, as if a stop fired or the venue
    /// liquidated it. Returns whether anything was there.
    pub fn force_venue_close(&self, symbol: &Symbol) -> bool {
        self.book.lock().remove(symbol).is_some()
    }

    fn check_reachable(&self) -> Result<(), GatewayError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable("paper gateway offline".into()));
        }
        Ok(())
    }

    fn next_order_id(&self) -> String {
        format!("paper-{}", self.order_seq.fetch_add(1, Ordering::SeqCst))
    }

    /// Fire any resting stop the current price has crossed.
    fn sweep_stops(&self, symbol: &Symbol, price: Decimal) {
        if self.freeze_stops.load(Ordering::SeqCst) {
            return;
        }
        let mut book = self.book.lock();
        let fired = book
            .get(symbol)
            .and_then(|p| p.stop.map(|stop| (p.side, stop)))
            .is_some_and(|(side, stop)| match side {
                Side::Long => price <= stop,
                Side::Short => price >= stop,
            });
        if fired {
            book.remove(symbol);
            info!(symbol = %symbol, price = %price, "Venue stop fired");
        }
    }
}

#[async_trait]
impl ExecutionGateway for PaperGateway {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, GatewayError> {
        self.check_reachable()?;

        if let Some(result) = self.replays.lock().get(&request.idempotency_key) {
            debug!(key = %request.idempotency_key, "Replaying idempotent order");
            return Ok(result.clone());
        }

        let price = self.prices.peek_price(&request.symbol);
        let result = match request.order_type {
            OrderType::Market => {
                self.book.lock().insert(
                    request.symbol.clone(),
                    VenuePosition {
                        side: request.side,
                        quantity: request.quantity,
                        entry_price: price,
                        stop: None,
                    },
                );
                OrderResult::Filled {
                    order_id: self.next_order_id(),
                    fill_price: price,
                }
            }
            OrderType::Stop => {
                if self.reject_stops.load(Ordering::SeqCst) {
                    OrderResult::Rejected {
                        reason: "stop orders unavailable".to_string(),
                    }
                } else {
                    let mut book = self.book.lock();
                    match book.get_mut(&request.symbol) {
                        Some(position) => {
                            position.stop = request.stop_price;
                            OrderResult::StopAccepted {
                                order_id: self.next_order_id(),
                            }
                        }
                        None => OrderResult::Rejected {
                            reason: "no position to protect".to_string(),
                        },
                    }
                }
            }
        };

        self.replays
            .lock()
            .insert(request.idempotency_key, result.clone());
        Ok(result)
    }

    async fn close_position(
        &self,
        _position_id: PositionId,
        symbol: &Symbol,
    ) -> Result<OrderResult, GatewayError> {
        self.check_reachable()?;

        let price = self.prices.peek_price(symbol);
        self.sweep_stops(symbol, price);

        match self.book.lock().remove(symbol) {
            Some(_) => Ok(OrderResult::Closed {
                order_id: self.next_order_id(),
                exit_price: price,
            }),
            None => Ok(OrderResult::AlreadyClosed),
        }
    }

    async fn list_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        self.check_reachable()?;

        let symbols: Vec<Symbol> = self.book.lock().keys().cloned().collect();
        for symbol in &symbols {
            let price = self.prices.peek_price(symbol);
            self.sweep_stops(symbol, price);
        }

        Ok(self
            .book
            .lock()
            .iter()
            .map(|(symbol, position)| ExchangePosition {
                symbol: symbol.clone(),
                side: position.side,
                quantity: position.quantity,
                entry_price: position.entry_price,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use rust_decimal_macros::dec;

    fn gateway() -> (Arc<SimMarket>, PaperGateway) {
        let market = Arc::new(SimMarket::new(&SimConfig::default()));
        let gateway = PaperGateway::new(Arc::clone(&market));
        (market, gateway)
    }

    #[tokio::test]
    async fn duplicate_close_answers_already_closed() {
        let (market, gateway) = gateway();
        let symbol = Symbol::from("BTC-USD");
        market.set_price(&symbol, dec!(50000));

        let order = OrderRequest::market(symbol.clone(), Side::Long, dec!(0.1), 1);
        gateway.submit_order(&order).await.unwrap();

        let id = PositionId::generate();
        let first = gateway.close_position(id, &symbol).await.unwrap();
        assert!(matches!(first, OrderResult::Closed { .. }));

        let second = gateway.close_position(id, &symbol).await.unwrap();
        assert!(matches!(second, OrderResult::AlreadyClosed));
    }

    #[tokio::test]
    async fn idempotency_key_replays_same_fill() {
        let (market, gateway) = gateway();
        let symbol = Symbol::from("BTC-USD");
        market.set_price(&symbol, dec!(50000));

        let order = OrderRequest::market(symbol.clone(), Side::Long, dec!(0.1), 1);
        let first = gateway.submit_order(&order).await.unwrap();
        market.set_price(&symbol, dec!(51000));
        let second = gateway.submit_order(&order).await.unwrap();

        let (OrderResult::Filled { fill_price: a, .. }, OrderResult::Filled { fill_price: b, .. }) =
            (first, second)
        else {
            panic!("expected fills");
        };
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn venue_stop_fires_on_crossed_price() {
        let (market, gateway) = gateway();
        let symbol = Symbol::from("BTC-USD");
        market.set_price(&symbol, dec!(50000));

        let entry = OrderRequest::market(symbol.clone(), Side::Long, dec!(0.1), 1);
        gateway.submit_order(&entry).await.unwrap();
        let stop = OrderRequest::stop(symbol.clone(), Side::Short, dec!(0.1), dec!(49000), 1);
        gateway.submit_order(&stop).await.unwrap();

        market.set_price(&symbol, dec!(48000));
        let open = gateway.list_open_positions().await.unwrap();
        assert!(open.is_empty(), "stop should have fired venue-side");
    }

    #[tokio::test]
    async fn frozen_stop_never_fires() {
        let (market, gateway) = gateway();
        gateway.set_freeze_stops(true);
        let symbol = Symbol::from("BTC-USD");
        market.set_price(&symbol, dec!(50000));

        let entry = OrderRequest::market(symbol.clone(), Side::Long, dec!(0.1), 1);
        gateway.submit_order(&entry).await.unwrap();
        let stop = OrderRequest::stop(symbol.clone(), Side::Short, dec!(0.1), dec!(49000), 1);
        assert!(matches!(
            gateway.submit_order(&stop).await.unwrap(),
            OrderResult::StopAccepted { .. }
        ));

        market.set_price(&symbol, dec!(48000));
        let open = gateway.list_open_positions().await.unwrap();
        assert_eq!(open.len(), 1, "frozen stop must not fire");
    }

    #[tokio::test]
    async fn unreachable_gateway_errors() {
        let (_market, gateway) = gateway();
        gateway.set_unreachable(true);
        let err = gateway.list_open_positions().await.unwrap_err();
        assert!(err.is_transient());
    }
}
