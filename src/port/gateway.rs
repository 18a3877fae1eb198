//! Execution gateway port: order submission, closes, reconciliation reads.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{PositionId, Side, Symbol};
use crate::error::GatewayError;

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Immediate fill at the venue's price.
    Market,
    /// Venue-native protective stop, resting until triggered.
    Stop,
}

/// One logical order. The idempotency key makes every call safely
/// retryable: a venue seeing the same key twice must not fill twice.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub idempotency_key: Uuid,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    /// Trigger price; required for stop orders.
    pub stop_price: Option<Decimal>,
    pub leverage: u32,
}

impl OrderRequest {
    /// A market order.
    #[must_use]
    pub fn market(symbol: Symbol, side: Side, quantity: Decimal, leverage: u32) -> Self {
        Self {
            idempotency_key: Uuid::new_v4(),
            symbol,
            side,
            quantity,
            order_type: OrderType::Market,
            stop_price: None,
            leverage,
        }
    }

    /// A venue-native stop order at `stop_price`.
    #[must_use]
    pub fn stop(
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
        leverage: u32,
    ) -> Self {
        Self {
            idempotency_key: Uuid::new_v4(),
            symbol,
            side,
            quantity,
            order_type: OrderType::Stop,
            stop_price: Some(stop_price),
            leverage,
        }
    }
}

/// Venue response to an order or close request.
#[derive(Debug, Clone)]
pub enum OrderResult {
    /// Market order filled.
    Filled { order_id: String, fill_price: Decimal },
    /// Stop order accepted and resting at the venue.
    StopAccepted { order_id: String },
    /// Position closed at the venue.
    Closed { order_id: String, exit_price: Decimal },
    /// The position was already closed, or a close is already in flight.
    /// Callers must treat this as success, not error.
    AlreadyClosed,
    /// The venue refused the order.
    Rejected { reason: String },
}

impl OrderResult {
    /// Whether this result means the requested close is done (including
    /// the duplicate-close case).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            OrderResult::Closed { .. } | OrderResult::AlreadyClosed
        )
    }
}

/// The venue's authoritative view of one open position, read back during
/// reconciliation.
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
}

/// Order placement and position transport.
///
/// # Implementation Notes
///
/// - All calls must be safely retryable; the idempotency key identifies
///   the logical order across retries.
/// - `close_position` on an already-closed position must answer
///   [`OrderResult::AlreadyClosed`], never an error.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Submit an order (entry or venue-native stop).
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, GatewayError>;

    /// Close an open position at market.
    async fn close_position(
        &self,
        position_id: PositionId,
        symbol: &Symbol,
    ) -> Result<OrderResult, GatewayError>;

    /// The venue's current open positions, for reconciliation.
    async fn list_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError>;
}

/// Deadline and retry budget applied to every gateway call.
#[derive(Debug, Clone, Copy)]
pub struct GatewayPolicy {
    pub retries: u32,
    pub backoff: Duration,
    pub deadline: Duration,
}

impl GatewayPolicy {
    /// Run one logical gateway call: each attempt carries the deadline,
    /// transient failures (including the deadline itself) are retried
    /// within the budget.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let deadline = self.deadline;
        retry_transient(self.retries, self.backoff, || {
            let attempt = op();
            async move {
                match tokio::time::timeout(deadline, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(GatewayError::Timeout(deadline)),
                }
            }
        })
        .await
    }
}

/// Retry a collaborator call on transient failures only, with a fixed
/// small attempt budget and doubling backoff.
pub async fn retry_transient<T, F, Fut>(
    attempts: u32,
    initial_backoff: Duration,
    mut op: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GatewayError>>,
{
    let mut backoff = initial_backoff;
    let mut last_err = None;
    for attempt in 0..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(error = %e, attempt, "Transient gateway failure, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    // Unreachable: the loop always returns. Kept for the type checker.
    Err(last_err.unwrap_or_else(|| GatewayError::Unreachable("retry exhausted".into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(2, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Unreachable("down".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3); // initial + 2 retries
    }

    #[tokio::test]
    async fn retry_does_not_retry_permanent_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_transient(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::OrderRejected("bad size".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry_transient(2, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(GatewayError::Timeout(Duration::from_millis(10)))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn already_closed_counts_as_closed() {
        assert!(OrderResult::AlreadyClosed.is_closed());
        assert!(OrderResult::Closed {
            order_id: "o-1".into(),
            exit_price: rust_decimal_macros::dec!(100)
        }
        .is_closed());
        assert!(!OrderResult::Rejected {
            reason: "no".into()
        }
        .is_closed());
    }
}
