//! Append-only journal port for audit and restart recovery.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cycle::CycleResult;
use crate::domain::market::Symbol;
use crate::domain::position::{PositionId, TransitionRecord};

/// One auditable event. Every position-state transition and every cycle
/// result is written; breaker trips carry the triggering PnL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEvent {
    Transition {
        position_id: PositionId,
        symbol: Symbol,
        record: TransitionRecord,
    },
    CycleCompleted {
        result: CycleResult,
    },
    BreakerTripped {
        daily_pnl: Decimal,
        threshold: Decimal,
        at: DateTime<Utc>,
    },
    ReconciliationCorrection {
        symbol: Symbol,
        detail: String,
        at: DateTime<Utc>,
    },
    ProtectionEscalation {
        position_id: PositionId,
        layer: u8,
        detail: String,
        at: DateTime<Utc>,
    },
    /// Ledger checkpoint written after each cycle; the most recent one is
    /// read back at process restart.
    LedgerCheckpoint {
        balance: Decimal,
        realized_pnl_today: Decimal,
        reference_balance: Decimal,
        at: DateTime<Utc>,
    },
}

/// Append-only persistent record sink.
///
/// Writes are synchronous and cheap; implementations must be `Send + Sync`
/// because protection monitors and the cycle loop both record events.
pub trait Journal: Send + Sync {
    /// Append one event.
    fn record(&self, event: &JournalEvent) -> crate::error::Result<()>;
}

/// Record an event, downgrading a journal failure to a warning. Losing an
/// audit line must never abort a protective action.
pub fn journal_event(journal: &dyn Journal, event: &JournalEvent) {
    if let Err(e) = journal.record(event) {
        tracing::warn!(error = %e, "Journal write failed");
    }
}
