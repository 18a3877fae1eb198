//! Trading decisions produced by the (external) decision source.
//!
//! Decisions are immutable once issued and always pass the pre-trade gate
//! before any side effect.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::Symbol;

/// What the decision source wants done with one instrument this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    EnterLong,
    EnterShort,
    Exit,
    Hold,
}

impl DecisionAction {
    /// Entry actions open new exposure and go through sizing caps.
    #[must_use]
    pub fn is_entry(self) -> bool {
        matches!(self, DecisionAction::EnterLong | DecisionAction::EnterShort)
    }
}

/// Where a decision came from and what it cost to produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub latency_ms: u64,
    pub cost: Option<Decimal>,
}

/// One instruction for one instrument and one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingDecision {
    pub symbol: Symbol,
    pub action: DecisionAction,
    /// Confidence score in [0, 1].
    pub confidence: Decimal,
    /// Requested position size as a fraction of account balance.
    pub size_fraction: Decimal,
    /// Requested leverage multiplier.
    pub leverage: u32,
    /// Stop-loss offset from entry, e.g. 0.02 = 2%.
    pub stop_loss_pct: Option<Decimal>,
    /// Take-profit offset from entry.
    pub take_profit_pct: Option<Decimal>,
    pub rationale: String,
    pub provenance: Provenance,
    pub issued_at: DateTime<Utc>,
}

/// Why no decision was available for an instrument this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDecisionReason {
    Timeout,
    SourceError,
    Malformed,
    DataUnavailable,
}

/// Outcome of asking the decision source about one instrument.
///
/// "No decision" is an explicit variant, never an implicit `Hold`: an
/// intentional hold and an absent answer must stay distinguishable.
#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    Decided(TradingDecision),
    NoDecision { reason: NoDecisionReason },
}

impl DecisionOutcome {
    /// Get the decision if one was produced.
    #[must_use]
    pub fn decision(&self) -> Option<&TradingDecision> {
        match self {
            DecisionOutcome::Decided(d) => Some(d),
            DecisionOutcome::NoDecision { .. } => None,
        }
    }
}
