//! Bulwark - trading-cycle orchestration with multi-layer risk protection.
//!
//! This crate runs a periodic trading loop that fetches market state,
//! obtains a decision per instrument from an opaque source, validates it
//! against portfolio risk limits, executes it, and guarantees that losses
//! stay bounded even when a downstream collaborator misbehaves.
//!
//! # Architecture
//!
//! Three components form the control core, leaves first:
//!
//! - **`domain::position`** - pure position state machine with an
//!   append-only transition history
//! - **`risk`** - pre-trade validation, the three-layer stop-loss design
//!   (venue stop, application monitor, emergency monitor) and the
//!   daily-loss circuit breaker
//! - **`engine`** - the cycle orchestrator and process state machine
//!
//! External collaborators (market data, the decision source, the
//! execution gateway, the journal) are consumed through `port` traits;
//! `adapter` ships in-process implementations that make the binary
//! runnable end to end with no venue account.
//!
//! # Modules
//!
//! - [`config`] - TOML configuration with validation and logging init
//! - [`domain`] - positions, decisions, portfolio views, cycle records
//! - [`error`] - error taxonomy for the crate
//! - [`port`] - trait seams for every external collaborator
//! - [`risk`] - risk manager, circuit breaker, protection monitors
//! - [`engine`] - cycle orchestrator, process lifecycle, reconciler
//! - [`adapter`] - simulated market, paper gateway, momentum decisions,
//!   JSONL journal
//!
//! # Example
//!
//! ```no_run
//! use bulwark::config::Config;
//! use bulwark::risk::RiskLimits;
//!
//! let config = Config::default();
//! let limits: RiskLimits = config.risk.clone().into();
//! assert!(limits.emergency_loss_pct > limits.stop_loss_pct);
//! ```

pub mod adapter;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod port;
pub mod risk;
