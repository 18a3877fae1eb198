//! Risk management: the pre-trade gate, the daily-loss circuit breaker and
//! the three-layer protection of open positions.

pub mod breaker;
pub mod limits;
pub mod manager;
pub mod protection;

pub use breaker::{BreakerState, BreakerTrip, CircuitBreaker};
pub use limits::RiskLimits;
pub use manager::{validate, RiskManager, RiskValidation};
pub use protection::{ProtectionHandle, ProtectionRegistry};
