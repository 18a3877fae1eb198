//! Shared application state: the position book, the day's ledger and the
//! circuit breaker.
//!
//! This is the single owned home of everything mutated by more than one
//! concurrent actor (the cycle loop and the protection monitors). All
//! mutation passes through these methods under one serializing write lock;
//! readers take cheap read locks or cloned snapshots. Locks are never held
//! across an await.

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::domain::{PortfolioSnapshot, Position, PositionBook, PositionId};
use crate::risk::{BreakerState, BreakerTrip, CircuitBreaker};

/// Cash and daily PnL bookkeeping.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub balance: Decimal,
    pub realized_pnl_today: Decimal,
    /// Balance at the start of the trading day; base for percentage
    /// loss limits.
    pub reference_balance: Decimal,
}

impl Ledger {
    /// Fresh ledger at the start of a day.
    #[must_use]
    pub fn starting(balance: Decimal) -> Self {
        Self {
            balance,
            realized_pnl_today: Decimal::ZERO,
            reference_balance: balance,
        }
    }
}

/// Shared state accessible by the engine and every monitor.
pub struct AppState {
    book: RwLock<PositionBook>,
    ledger: RwLock<Ledger>,
    breaker: RwLock<CircuitBreaker>,
}

impl AppState {
    /// Create state with a starting balance and an armed breaker.
    #[must_use]
    pub fn new(ledger: Ledger, breaker: CircuitBreaker) -> Self {
        Self {
            book: RwLock::new(PositionBook::new()),
            ledger: RwLock::new(ledger),
            breaker: RwLock::new(breaker),
        }
    }

    /// Read access to the position book.
    pub fn with_book<R>(&self, f: impl FnOnce(&PositionBook) -> R) -> R {
        f(&self.book.read())
    }

    /// Write access to the position book. The single-writer discipline:
    /// every mutation in the process goes through here.
    pub fn with_book_mut<R>(&self, f: impl FnOnce(&mut PositionBook) -> R) -> R {
        f(&mut self.book.write())
    }

    /// Assemble a fresh read-only snapshot. Consumers never cache it.
    #[must_use]
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let positions = self.book.read().all().to_vec();
        let ledger = self.ledger.read().clone();
        PortfolioSnapshot {
            balance: ledger.balance,
            positions,
            realized_pnl_today: ledger.realized_pnl_today,
            reference_balance: ledger.reference_balance,
            taken_at: Utc::now(),
        }
    }

    /// Current ledger values.
    #[must_use]
    pub fn ledger(&self) -> Ledger {
        self.ledger.read().clone()
    }

    /// Restore the ledger from a journal checkpoint at process restart.
    pub fn restore_ledger(&self, ledger: Ledger) {
        *self.ledger.write() = ledger;
    }

    /// Book realized PnL from a closed position into the day's ledger.
    pub fn book_realized(&self, pnl: Decimal) {
        let mut ledger = self.ledger.write();
        ledger.realized_pnl_today += pnl;
        ledger.balance += pnl;
    }

    /// Record a newly observed price on a position, if it still exists.
    pub fn update_mark(&self, id: PositionId, price: Decimal) {
        if let Some(position) = self.book.write().get_mut(id) {
            position.set_mark_price(price);
        }
    }

    /// Count of open positions.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.book.read().open_count()
    }

    /// Open positions, cloned out of the lock.
    #[must_use]
    pub fn open_positions(&self) -> Vec<Position> {
        self.book.read().open_positions().cloned().collect()
    }

    /// Current breaker state, for gates and dashboards.
    #[must_use]
    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.read().state()
    }

    /// The most recent breaker trip, for dashboards.
    #[must_use]
    pub fn last_breaker_trip(&self) -> Option<BreakerTrip> {
        self.breaker.read().last_trip().cloned()
    }

    /// Evaluate the breaker against a snapshot; returns the trip record if
    /// this call flipped it.
    pub fn evaluate_breaker(&self, portfolio: &PortfolioSnapshot) -> Option<BreakerTrip> {
        self.breaker.write().evaluate(portfolio)
    }

    /// TRIPPED -> AWAITING_RESET once the book is flat.
    pub fn mark_breaker_flat(&self) -> bool {
        self.breaker.write().mark_flat()
    }

    /// Explicit administrative breaker reset.
    pub fn reset_breaker(&self) -> bool {
        self.breaker.write().reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn state() -> AppState {
        AppState::new(
            Ledger::starting(dec!(10000)),
            CircuitBreaker::new(dec!(700), dec!(0.07)),
        )
    }

    #[test]
    fn snapshot_reflects_ledger() {
        let state = state();
        state.book_realized(dec!(-150));

        let snap = state.snapshot();
        assert_eq!(snap.balance, dec!(9850));
        assert_eq!(snap.realized_pnl_today, dec!(-150));
        assert_eq!(snap.reference_balance, dec!(10000));
    }

    #[test]
    fn restore_ledger_overwrites() {
        let state = state();
        state.restore_ledger(Ledger {
            balance: dec!(9000),
            realized_pnl_today: dec!(-1000),
            reference_balance: dec!(10000),
        });
        assert_eq!(state.ledger().balance, dec!(9000));
    }

    #[test]
    fn breaker_flows_through_state() {
        let state = state();
        assert_eq!(state.breaker_state(), BreakerState::Armed);

        state.book_realized(dec!(-710));
        let snap = state.snapshot();
        assert!(state.evaluate_breaker(&snap).is_some());
        assert_eq!(state.breaker_state(), BreakerState::Tripped);

        assert!(state.mark_breaker_flat());
        assert!(state.reset_breaker());
        assert_eq!(state.breaker_state(), BreakerState::Armed);
    }
}
