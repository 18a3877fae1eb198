use thiserror::Error;

use crate::domain::position::PositionState;
use crate::engine::state::EngineState;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Errors from an external collaborator (market data, decision source,
/// execution gateway).
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("collaborator unreachable: {0}")]
    Unreachable(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("market data stale: fetched {age_secs}s ago, bound is {bound_secs}s")]
    StaleData { age_secs: i64, bound_secs: u64 },
}

impl GatewayError {
    /// Transient failures are worth a bounded retry; everything else is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Timeout(_) | GatewayError::Unreachable(_))
    }
}

/// Risk rejection reason codes. Routine, recorded, not cycle errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("circuit breaker is {state}, new entries blocked")]
    BreakerNotArmed { state: String },

    #[error("confidence {confidence} below minimum {minimum}")]
    LowConfidence {
        confidence: rust_decimal::Decimal,
        minimum: rust_decimal::Decimal,
    },

    #[error("leverage {requested}x outside bound {bound}x for {symbol}")]
    LeverageOutOfBounds {
        symbol: String,
        requested: u32,
        bound: u32,
    },

    #[error("total exposure limit reached: {current} of {limit}")]
    ExposureLimitExceeded {
        current: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },

    #[error("no open position for {symbol} to exit")]
    NoPositionToExit { symbol: String },
}

impl RiskError {
    /// Stable machine-readable code for journaling and metrics.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RiskError::BreakerNotArmed { .. } => "BreakerNotArmed",
            RiskError::LowConfidence { .. } => "LowConfidence",
            RiskError::LeverageOutOfBounds { .. } => "LeverageOutOfBounds",
            RiskError::ExposureLimitExceeded { .. } => "ExposureLimitExceeded",
            RiskError::NoPositionToExit { .. } => "NoPositionToExit",
        }
    }
}

/// Position lifecycle errors. Fatal to the caller, never to the system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid position transition {from} -> {to}")]
    InvalidTransition {
        from: PositionState,
        to: PositionState,
    },
}

/// Engine (process-level) errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid engine transition {from} -> {to}")]
    InvalidStateTransition { from: EngineState, to: EngineState },

    #[error("no instruments configured")]
    NoInstruments,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
