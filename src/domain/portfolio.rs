//! Portfolio views: the owned position book and the read-only snapshot
//! assembled for each risk evaluation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::domain::market::Symbol;
use crate::domain::position::{Position, PositionId};

/// Owns every position the process knows about. All mutation goes through
/// [`crate::engine::AppState`], which holds the book behind a single
/// write-serializing lock.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: Vec<Position>,
}

impl PositionBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint an id for a new position.
    #[must_use]
    pub fn next_id(&self) -> PositionId {
        PositionId::generate()
    }

    /// Record a new position.
    pub fn add(&mut self, position: Position) {
        self.positions.push(position);
    }

    /// Iterate over positions with live exposure.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open())
    }

    /// Count of positions with live exposure.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open_positions().count()
    }

    /// Sum of entry notional across open positions.
    #[must_use]
    pub fn total_exposure(&self) -> Decimal {
        self.open_positions()
            .map(|p| p.entry_price() * p.quantity())
            .fold(Decimal::ZERO, |acc, n| acc + n)
    }

    /// Get a position by ID.
    #[must_use]
    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.positions.iter().find(|p| p.id() == id)
    }

    /// Get a mutable reference to a position by ID.
    pub fn get_mut(&mut self, id: PositionId) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.id() == id)
    }

    /// The non-terminal position for a symbol, if any. At most one
    /// non-terminal position per instrument is maintained by the engine.
    #[must_use]
    pub fn active_for_symbol(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.symbol() == symbol && !p.state().is_terminal())
    }

    /// All positions, including terminal ones.
    #[must_use]
    pub fn all(&self) -> &[Position] {
        &self.positions
    }
}

/// Read-only view assembled at a point in time. The risk manager never
/// keeps its own copy; it always asks for a fresh one.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub balance: Decimal,
    pub positions: Vec<Position>,
    pub realized_pnl_today: Decimal,
    /// Balance at the start of the trading day, the base for percentage
    /// loss limits.
    pub reference_balance: Decimal,
    pub taken_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// Sum of entry notional across open positions.
    #[must_use]
    pub fn total_exposure(&self) -> Decimal {
        self.positions
            .iter()
            .filter(|p| p.is_open())
            .map(|p| p.entry_price() * p.quantity())
            .fold(Decimal::ZERO, |acc, n| acc + n)
    }

    /// Unrealized PnL across open and closing positions, at their marks.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions
            .iter()
            .map(Position::unrealized_pnl)
            .fold(Decimal::ZERO, |acc, p| acc + p)
    }

    /// Today's realized plus current unrealized PnL.
    #[must_use]
    pub fn daily_pnl(&self) -> Decimal {
        self.realized_pnl_today + self.unrealized_pnl()
    }

    /// Daily PnL as a fraction of the day's reference balance.
    #[must_use]
    pub fn daily_pnl_fraction(&self) -> Decimal {
        if self.reference_balance.is_zero() {
            return Decimal::ZERO;
        }
        self.daily_pnl() / self.reference_balance
    }

    /// Open positions in the snapshot.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open())
    }

    /// The open position for a symbol, if any.
    #[must_use]
    pub fn open_for_symbol(&self, symbol: &Symbol) -> Option<&Position> {
        self.open_positions().find(|p| p.symbol() == symbol)
    }
}
