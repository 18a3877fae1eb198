//! Venue-agnostic domain logic: positions, decisions, portfolio views,
//! market snapshots, cycle records. Pure types: no I/O, no async.

pub mod cycle;
pub mod decision;
pub mod market;
pub mod portfolio;
pub mod position;

pub use cycle::{CycleResult, CycleStatus, Disposition, InstrumentOutcome, SkipReason};
pub use decision::{DecisionAction, DecisionOutcome, NoDecisionReason, Provenance, TradingDecision};
pub use market::{Candle, Indicators, MarketSnapshot, Symbol};
pub use portfolio::{PortfolioSnapshot, PositionBook};
pub use position::{Position, PositionId, PositionState, Side, TransitionRecord};
