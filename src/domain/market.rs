//! Market data types supplied by the (external) market data provider.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument symbol, e.g. "BTC-USD".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new symbol.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One OHLCV candle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub open_time: DateTime<Utc>,
}

/// Indicators precomputed by the provider. Opaque to the core: the decision
/// source interprets them, the orchestrator only carries them through.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Indicators {
    pub values: std::collections::BTreeMap<String, Decimal>,
}

/// Point-in-time view of one instrument's market.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub price: Decimal,
    pub candles: Vec<Candle>,
    pub indicators: Indicators,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// A snapshot older than the staleness bound must be treated as
    /// unavailable, not acted on.
    #[must_use]
    pub fn is_stale(&self, bound_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.fetched_at).num_seconds();
        age > bound_secs as i64
    }

    /// Age of the snapshot in whole seconds.
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.fetched_at).num_seconds()
    }
}
