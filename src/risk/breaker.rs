//! Daily-loss circuit breaker.
//!
//! One-way within a trading day: ARMED -> TRIPPED on a breach,
//! TRIPPED -> AWAITING_RESET once every position is confirmed closed, and
//! back to ARMED only through an explicit administrative reset. The system
//! never re-arms itself.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::PortfolioSnapshot;

/// Process-wide breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation.
    Armed,
    /// Daily loss breached: new entries blocked, open positions closing.
    Tripped,
    /// Everything flat; waiting for an operator to re-arm.
    AwaitingReset,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Armed => "armed",
            BreakerState::Tripped => "tripped",
            BreakerState::AwaitingReset => "awaiting_reset",
        };
        write!(f, "{s}")
    }
}

/// Audit record of one trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerTrip {
    pub daily_pnl: Decimal,
    pub threshold: Decimal,
    pub at: DateTime<Utc>,
}

/// The breaker itself. Lives inside [`crate::engine::AppState`] behind its
/// serializing lock; thresholds are fixed at construction.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: BreakerState,
    daily_loss_limit: Decimal,
    daily_loss_limit_pct: Decimal,
    last_trip: Option<BreakerTrip>,
}

impl CircuitBreaker {
    /// Create an armed breaker with the given loss thresholds.
    #[must_use]
    pub fn new(daily_loss_limit: Decimal, daily_loss_limit_pct: Decimal) -> Self {
        Self {
            state: BreakerState::Armed,
            daily_loss_limit,
            daily_loss_limit_pct,
            last_trip: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// The most recent trip, if any.
    #[must_use]
    pub fn last_trip(&self) -> Option<&BreakerTrip> {
        self.last_trip.as_ref()
    }

    /// Evaluate today's realized + unrealized PnL against both thresholds.
    ///
    /// Returns the trip record when this call flips the breaker; a breaker
    /// that is already TRIPPED or AWAITING_RESET is left alone (tripping is
    /// one-way within the day).
    pub fn evaluate(&mut self, portfolio: &PortfolioSnapshot) -> Option<BreakerTrip> {
        if self.state != BreakerState::Armed {
            return None;
        }

        let daily_pnl = portfolio.daily_pnl();
        let fraction = portfolio.daily_pnl_fraction();

        let absolute_breach =
            self.daily_loss_limit > Decimal::ZERO && daily_pnl <= -self.daily_loss_limit;
        let percent_breach =
            self.daily_loss_limit_pct > Decimal::ZERO && fraction <= -self.daily_loss_limit_pct;

        if !absolute_breach && !percent_breach {
            return None;
        }

        let threshold = if percent_breach {
            -self.daily_loss_limit_pct * portfolio.reference_balance
        } else {
            -self.daily_loss_limit
        };
        let trip = BreakerTrip {
            daily_pnl,
            threshold,
            at: Utc::now(),
        };
        tracing::error!(
            daily_pnl = %daily_pnl,
            fraction = %fraction,
            "Daily loss limit breached, circuit breaker TRIPPED"
        );
        self.state = BreakerState::Tripped;
        self.last_trip = Some(trip.clone());
        Some(trip)
    }

    /// TRIPPED -> AWAITING_RESET, once zero open positions remain.
    /// Returns whether the transition happened.
    pub fn mark_flat(&mut self) -> bool {
        if self.state == BreakerState::Tripped {
            tracing::warn!("All positions flat, circuit breaker awaiting operator reset");
            self.state = BreakerState::AwaitingReset;
            true
        } else {
            false
        }
    }

    /// Explicit administrative reset: AWAITING_RESET -> ARMED only.
    /// Returns whether the breaker was re-armed.
    pub fn reset(&mut self) -> bool {
        match self.state {
            BreakerState::AwaitingReset => {
                tracing::info!("Circuit breaker reset by operator, re-armed");
                self.state = BreakerState::Armed;
                true
            }
            other => {
                tracing::warn!(state = %other, "Breaker reset refused");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PortfolioSnapshot, Position, PositionId, PositionState, Side, Symbol};
    use rust_decimal_macros::dec;

    fn snapshot(realized: Decimal, positions: Vec<Position>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            balance: dec!(10000) + realized,
            positions,
            realized_pnl_today: realized,
            reference_balance: dec!(10000),
            taken_at: Utc::now(),
        }
    }

    fn losing_open_position(unrealized_loss: Decimal) -> Position {
        let mut pos = Position::new(
            PositionId::generate(),
            Symbol::from("BTC-USD"),
            Side::Long,
            dec!(1),
            dec!(1000),
            dec!(900),
            None,
            1,
        );
        pos.transition(PositionState::Opening, "entry").unwrap();
        pos.transition(PositionState::Open, "fill").unwrap();
        pos.set_mark_price(dec!(1000) - unrealized_loss);
        pos
    }

    #[test]
    fn does_not_trip_inside_limit() {
        let mut breaker = CircuitBreaker::new(dec!(700), dec!(0.07));
        assert!(breaker.evaluate(&snapshot(dec!(-400), vec![])).is_none());
        assert_eq!(breaker.state(), BreakerState::Armed);
    }

    #[test]
    fn trips_on_percentage_breach_with_unrealized() {
        // -510 realized plus -200 unrealized = -7.1% of 10_000 against a
        // -7.0% threshold.
        let mut breaker = CircuitBreaker::new(dec!(0), dec!(0.07));
        let snap = snapshot(dec!(-510), vec![losing_open_position(dec!(200))]);
        assert_eq!(snap.daily_pnl(), dec!(-710));

        let trip = breaker.evaluate(&snap).expect("should trip");
        assert_eq!(trip.daily_pnl, dec!(-710));
        assert_eq!(breaker.state(), BreakerState::Tripped);
    }

    #[test]
    fn trips_on_absolute_breach() {
        let mut breaker = CircuitBreaker::new(dec!(700), dec!(0));
        let trip = breaker.evaluate(&snapshot(dec!(-700), vec![]));
        assert!(trip.is_some());
        assert_eq!(breaker.state(), BreakerState::Tripped);
    }

    #[test]
    fn tripping_is_one_way() {
        let mut breaker = CircuitBreaker::new(dec!(700), dec!(0.07));
        breaker.evaluate(&snapshot(dec!(-710), vec![])).unwrap();

        // A recovered PnL does not re-arm anything.
        assert!(breaker.evaluate(&snapshot(dec!(100), vec![])).is_none());
        assert_eq!(breaker.state(), BreakerState::Tripped);

        // Reset straight from TRIPPED is refused.
        assert!(!breaker.reset());
        assert_eq!(breaker.state(), BreakerState::Tripped);
    }

    #[test]
    fn reset_only_from_awaiting_reset() {
        let mut breaker = CircuitBreaker::new(dec!(700), dec!(0.07));
        breaker.evaluate(&snapshot(dec!(-710), vec![])).unwrap();

        assert!(breaker.mark_flat());
        assert_eq!(breaker.state(), BreakerState::AwaitingReset);

        assert!(breaker.reset());
        assert_eq!(breaker.state(), BreakerState::Armed);
    }

    #[test]
    fn mark_flat_requires_tripped() {
        let mut breaker = CircuitBreaker::new(dec!(700), dec!(0.07));
        assert!(!breaker.mark_flat());
        assert_eq!(breaker.state(), BreakerState::Armed);
    }
}
