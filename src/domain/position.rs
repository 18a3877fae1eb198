//! Position lifecycle: a pure, synchronous state machine with an
//! append-only transition history.
//!
//! The machine holds no timers and performs no I/O; the risk and engine
//! layers operate it under their own concurrency discipline.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::market::Symbol;
use crate::error::StateError;

/// Unique position identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionId(Uuid);

impl PositionId {
    /// Mint a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn value(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// Direction of exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// The closing side is always the opposite of the entry side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// Lifecycle state of a position.
///
/// Valid edges: None->Opening, Opening->Open, Opening->Failed,
/// Open->Closing, Open->Liquidated, Closing->Closed. Everything else is
/// rejected with [`StateError::InvalidTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    /// Not yet submitted anywhere. Only exists before the entry order.
    None,
    /// Entry order in flight.
    Opening,
    /// Fill confirmed, exposure live.
    Open,
    /// Exit order in flight.
    Closing,
    /// Exit confirmed. Terminal.
    Closed,
    /// Exchange-side forced liquidation. Terminal.
    Liquidated,
    /// Rejected before ever opening. Terminal.
    Failed,
}

impl PositionState {
    /// Whether a transition to `target` is allowed from this state.
    #[must_use]
    pub fn can_transition_to(self, target: PositionState) -> bool {
        matches!(
            (self, target),
            (Self::None, Self::Opening)
                | (Self::Opening, Self::Open)
                | (Self::Opening, Self::Failed)
                | (Self::Open, Self::Closing)
                | (Self::Open, Self::Liquidated)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Terminal states admit no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PositionState::Closed | PositionState::Liquidated | PositionState::Failed
        )
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionState::None => "none",
            PositionState::Opening => "opening",
            PositionState::Open => "open",
            PositionState::Closing => "closing",
            PositionState::Closed => "closed",
            PositionState::Liquidated => "liquidated",
            PositionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One accepted transition. History is append-only, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PositionState,
    pub to: PositionState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One open/closing exposure to one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    id: PositionId,
    symbol: Symbol,
    side: Side,
    quantity: Decimal,
    entry_price: Decimal,
    stop_price: Decimal,
    take_profit: Option<Decimal>,
    leverage: u32,
    mark_price: Decimal,
    realized_pnl: Decimal,
    exit_price: Option<Decimal>,
    state: PositionState,
    history: Vec<TransitionRecord>,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Position {
    /// Create a position in the `None` state. The caller drives it to
    /// `Opening` through [`Position::transition`] so the history records
    /// the edge.
    #[must_use]
    pub fn new(
        id: PositionId,
        symbol: Symbol,
        side: Side,
        quantity: Decimal,
        entry_price: Decimal,
        stop_price: Decimal,
        take_profit: Option<Decimal>,
        leverage: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            symbol,
            side,
            quantity,
            entry_price,
            stop_price,
            take_profit,
            leverage,
            mark_price: entry_price,
            realized_pnl: Decimal::ZERO,
            exit_price: None,
            state: PositionState::None,
            history: Vec::new(),
            opened_at: now,
            updated_at: now,
        }
    }

    /// Request a state transition.
    ///
    /// Invalid requests return [`StateError::InvalidTransition`] and leave
    /// the position unchanged; rejection is idempotent. Accepted
    /// transitions append to the history and are logged with prior state,
    /// new state and reason.
    pub fn transition(
        &mut self,
        target: PositionState,
        reason: impl Into<String>,
    ) -> Result<(), StateError> {
        if !self.state.can_transition_to(target) {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        let reason = reason.into();
        let now = Utc::now();
        tracing::info!(
            position = %self.id,
            symbol = %self.symbol,
            from = %self.state,
            to = %target,
            reason = %reason,
            "Position transition"
        );
        self.history.push(TransitionRecord {
            from: self.state,
            to: target,
            reason,
            at: now,
        });
        self.state = target;
        self.updated_at = now;
        Ok(())
    }

    /// Get the position ID.
    #[must_use]
    pub fn id(&self) -> PositionId {
        self.id
    }

    /// Get the instrument symbol.
    #[must_use]
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Get the side.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// Get the quantity.
    #[must_use]
    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Get the entry price.
    #[must_use]
    pub fn entry_price(&self) -> Decimal {
        self.entry_price
    }

    /// Get the protective stop price.
    #[must_use]
    pub fn stop_price(&self) -> Decimal {
        self.stop_price
    }

    /// Get the take-profit price, if set.
    #[must_use]
    pub fn take_profit(&self) -> Option<Decimal> {
        self.take_profit
    }

    /// Get the leverage multiplier.
    #[must_use]
    pub fn leverage(&self) -> u32 {
        self.leverage
    }

    /// Get the latest observed mark price.
    #[must_use]
    pub fn mark_price(&self) -> Decimal {
        self.mark_price
    }

    /// Get the realized PnL (zero until closed).
    #[must_use]
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    /// Get the exit price. Set if and only if the state is `Closed`.
    #[must_use]
    pub fn exit_price(&self) -> Option<Decimal> {
        self.exit_price
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PositionState {
        self.state
    }

    /// Get the full transition history.
    #[must_use]
    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    /// Get when the position was created.
    #[must_use]
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Get the last-updated timestamp.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether exposure is live.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == PositionState::Open
    }

    /// Record the confirmed fill price when the entry completes.
    pub fn set_entry_fill(&mut self, fill_price: Decimal) {
        self.entry_price = fill_price;
        self.mark_price = fill_price;
        self.updated_at = Utc::now();
    }

    /// Re-anchor the protective stop, e.g. after the entry fill price is
    /// known.
    pub fn set_stop_price(&mut self, price: Decimal) {
        self.stop_price = price;
        self.updated_at = Utc::now();
    }

    /// Book the loss from an exchange-side forced liquidation. Unlike a
    /// normal close there is no exit fill; the venue keeps the remains.
    pub fn set_liquidation_loss(&mut self, price: Decimal) {
        self.realized_pnl = self.signed_pnl(price);
        self.updated_at = Utc::now();
    }

    /// Record a newly observed price.
    pub fn set_mark_price(&mut self, price: Decimal) {
        self.mark_price = price;
        self.updated_at = Utc::now();
    }

    /// Correct the quantity from an authoritative venue report.
    pub fn set_quantity(&mut self, quantity: Decimal) {
        self.quantity = quantity;
        self.updated_at = Utc::now();
    }

    /// Record the confirmed exit. Valid only once the position has reached
    /// `Closed`; also books the realized PnL.
    pub fn set_exit_fill(&mut self, exit_price: Decimal) {
        self.exit_price = Some(exit_price);
        self.realized_pnl = self.signed_pnl(exit_price);
        self.updated_at = Utc::now();
    }

    /// PnL at the given price, signed by side.
    #[must_use]
    pub fn signed_pnl(&self, price: Decimal) -> Decimal {
        let delta = match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        };
        delta * self.quantity
    }

    /// Unrealized PnL at the current mark.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Decimal {
        if self.is_open() || self.state == PositionState::Closing {
            self.signed_pnl(self.mark_price)
        } else {
            Decimal::ZERO
        }
    }

    /// Loss as a fraction of entry notional, at the current mark. Positive
    /// when losing, negative when winning. Zero on a zero-notional entry.
    #[must_use]
    pub fn loss_fraction(&self) -> Decimal {
        let notional = self.entry_price * self.quantity;
        if notional.is_zero() {
            return Decimal::ZERO;
        }
        -self.signed_pnl(self.mark_price) / notional
    }

    /// Whether `price` has crossed the protective stop for this side.
    #[must_use]
    pub fn stop_crossed(&self, price: Decimal) -> bool {
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }
}
