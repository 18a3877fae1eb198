//! Decision source port.

use async_trait::async_trait;

use crate::domain::{MarketSnapshot, PortfolioSnapshot, Symbol, TradingDecision};
use crate::error::GatewayError;

/// Produces one trading decision per instrument per cycle.
///
/// Opaque and replaceable: an LLM backend, a rule engine and a scripted
/// test double all satisfy the same contract. The core depends only on the
/// [`TradingDecision`] shape; a failed or late answer degrades to an
/// explicit no-decision for that instrument, never to a fabricated hold.
#[async_trait]
pub trait DecisionSource: Send + Sync {
    /// Request a decision for `symbol` given the market and portfolio view.
    async fn decide(
        &self,
        symbol: &Symbol,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> Result<TradingDecision, GatewayError>;
}
