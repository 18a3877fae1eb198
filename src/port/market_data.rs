//! Market data port.

use async_trait::async_trait;

use crate::domain::{MarketSnapshot, Symbol};
use crate::error::GatewayError;

/// Supplies current price, recent OHLCV and precomputed indicators for one
/// instrument.
///
/// # Implementation Notes
///
/// - The caller enforces the per-call deadline and the staleness bound;
///   implementations just report what they have with an honest
///   `fetched_at`.
/// - A snapshot the implementation knows to be stale should be returned
///   anyway; the core decides whether it is usable.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch a point-in-time snapshot for `symbol`.
    async fn snapshot(&self, symbol: &Symbol) -> Result<MarketSnapshot, GatewayError>;
}
