//! Implementations of ports (hexagonal adapters).
//!
//! The simulation adapters make the binary runnable end to end with no
//! venue account: a deterministic price walk, a paper execution gateway
//! with venue-side stops and idempotent closes, and a momentum-rule
//! decision source standing in for any opaque signal producer.

pub mod jsonl;
pub mod momentum;
pub mod paper;
pub mod sim;

pub use jsonl::JsonlJournal;
pub use momentum::MomentumDecisions;
pub use paper::PaperGateway;
pub use sim::SimMarket;
