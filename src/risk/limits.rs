//! Risk limits: operator-owned configuration, never mutated at runtime.

use std::collections::HashMap;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::config::RiskConfig;
use crate::domain::Symbol;

/// The caps and thresholds every decision and every open position is held
/// against.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_position_notional: Decimal,
    pub max_total_exposure: Decimal,
    pub min_confidence: Decimal,
    pub daily_loss_limit: Decimal,
    pub daily_loss_limit_pct: Decimal,
    pub max_leverage: u32,
    pub leverage_overrides: HashMap<Symbol, u32>,
    pub stop_loss_pct: Decimal,
    pub emergency_loss_pct: Decimal,
    pub layer2_interval: Duration,
    pub layer3_interval: Duration,
}

impl RiskLimits {
    /// Leverage bound for an instrument, falling back to the default.
    #[must_use]
    pub fn leverage_bound(&self, symbol: &Symbol) -> u32 {
        self.leverage_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.max_leverage)
    }
}

impl From<RiskConfig> for RiskLimits {
    fn from(config: RiskConfig) -> Self {
        Self {
            max_position_notional: config.max_position_notional,
            max_total_exposure: config.max_total_exposure,
            min_confidence: config.min_confidence,
            daily_loss_limit: config.daily_loss_limit,
            daily_loss_limit_pct: config.daily_loss_limit_pct,
            max_leverage: config.max_leverage,
            leverage_overrides: config
                .leverage_overrides
                .into_iter()
                .map(|(k, v)| (Symbol::new(k), v))
                .collect(),
            stop_loss_pct: config.stop_loss_pct,
            emergency_loss_pct: config.emergency_loss_pct,
            layer2_interval: Duration::from_millis(config.layer2_interval_ms),
            layer3_interval: Duration::from_millis(config.layer3_interval_ms),
        }
    }
}

impl Default for RiskLimits {
    fn default() -> Self {
        RiskConfig::default().into()
    }
}
