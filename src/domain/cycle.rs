//! Cycle result records: one per `run_cycle` invocation, emitted and
//! journaled regardless of outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::decision::NoDecisionReason;
use crate::domain::market::Symbol;

/// Why a whole cycle was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CircuitBreaker,
    EngineNotRunning,
}

/// Overall cycle status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Skipped { reason: SkipReason },
}

/// What happened to one instrument within one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Executed,
    Rejected { reason: String },
    Held,
    NoDecision { reason: NoDecisionReason },
    DataUnavailable,
    ExecutionFailed { error: String },
}

/// Per-instrument record inside a cycle result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentOutcome {
    pub symbol: Symbol,
    pub disposition: Disposition,
}

/// The record of one full orchestrator iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleResult {
    pub seq: u64,
    pub status: CycleStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub decisions_generated: u32,
    pub executed: u32,
    pub rejected: u32,
    pub errors: u32,
    /// The cycle ran past its cadence. Recorded, never aborted.
    pub overran: bool,
    pub outcomes: Vec<InstrumentOutcome>,
}

impl CycleResult {
    /// A skipped cycle with no per-instrument work.
    #[must_use]
    pub fn skipped(seq: u64, reason: SkipReason, started_at: DateTime<Utc>) -> Self {
        Self {
            seq,
            status: CycleStatus::Skipped { reason },
            started_at,
            duration_ms: 0,
            decisions_generated: 0,
            executed: 0,
            rejected: 0,
            errors: 0,
            overran: false,
            outcomes: Vec::new(),
        }
    }
}
