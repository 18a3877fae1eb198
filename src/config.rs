//! Application configuration loading and validation.
//!
//! Configuration is loaded from a TOML file; `RUST_LOG` overrides the
//! configured log level via the environment filter.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        let config: Self = toml::from_str(&content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.instruments.is_empty() {
            return Err(ConfigError::MissingField {
                field: "engine.instruments",
            }
            .into());
        }
        if self.risk.min_confidence < Decimal::ZERO || self.risk.min_confidence > Decimal::ONE {
            return Err(ConfigError::InvalidValue {
                field: "risk.min_confidence",
                reason: "must be within [0, 1]".to_string(),
            }
            .into());
        }
        if self.risk.daily_loss_limit_pct <= Decimal::ZERO {
            return Err(ConfigError::InvalidValue {
                field: "risk.daily_loss_limit_pct",
                reason: "must be positive (expressed as a loss fraction)".to_string(),
            }
            .into());
        }
        if self.risk.emergency_loss_pct <= self.risk.stop_loss_pct {
            return Err(ConfigError::InvalidValue {
                field: "risk.emergency_loss_pct",
                reason: "emergency threshold must be wider than the stop distance".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Initialize logging with the configured settings.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}

/// Cycle cadence and per-call deadlines.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Instruments tracked each cycle.
    pub instruments: Vec<String>,
    /// Cadence between cycle starts, in seconds.
    pub cycle_interval_secs: u64,
    /// Total deadline for the market-data phase of one cycle, in ms.
    pub data_deadline_ms: u64,
    /// Per-instrument decision deadline, in ms.
    pub decision_deadline_ms: u64,
    /// Market snapshots older than this are unusable, in seconds.
    pub staleness_bound_secs: u64,
    /// Retries for transient gateway failures.
    pub gateway_retries: u32,
    /// Initial retry backoff, in ms.
    pub retry_backoff_ms: u64,
    /// Per-attempt deadline on execution gateway calls, in ms.
    pub gateway_deadline_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instruments: vec!["BTC-USD".to_string()],
            cycle_interval_secs: 180,
            data_deadline_ms: 2000,
            decision_deadline_ms: 1000,
            staleness_bound_secs: 30,
            gateway_retries: 2,
            retry_backoff_ms: 250,
            gateway_deadline_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// Cycle cadence as a `Duration`.
    #[must_use]
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    /// Market-data deadline as a `Duration`.
    #[must_use]
    pub fn data_deadline(&self) -> Duration {
        Duration::from_millis(self.data_deadline_ms)
    }

    /// Decision deadline as a `Duration`.
    #[must_use]
    pub fn decision_deadline(&self) -> Duration {
        Duration::from_millis(self.decision_deadline_ms)
    }

    /// Initial retry backoff as a `Duration`.
    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// The deadline and retry budget for execution gateway calls.
    #[must_use]
    pub fn gateway_policy(&self) -> crate::port::GatewayPolicy {
        crate::port::GatewayPolicy {
            retries: self.gateway_retries,
            backoff: self.retry_backoff(),
            deadline: Duration::from_millis(self.gateway_deadline_ms),
        }
    }
}

/// Risk limits and protection thresholds. Operator-owned; never mutated at
/// runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Per-position notional cap.
    pub max_position_notional: Decimal,
    /// Total open-exposure cap.
    pub max_total_exposure: Decimal,
    /// Minimum decision confidence.
    pub min_confidence: Decimal,
    /// Daily loss limit, absolute.
    pub daily_loss_limit: Decimal,
    /// Daily loss limit as a fraction of the day's reference balance.
    pub daily_loss_limit_pct: Decimal,
    /// Default leverage bound.
    pub max_leverage: u32,
    /// Per-instrument leverage bounds overriding the default.
    #[serde(default)]
    pub leverage_overrides: HashMap<String, u32>,
    /// Default protective stop distance from entry.
    pub stop_loss_pct: Decimal,
    /// Emergency (layer-3) loss threshold.
    pub emergency_loss_pct: Decimal,
    /// Layer-2 monitor poll interval, in ms.
    pub layer2_interval_ms: u64,
    /// Layer-3 monitor poll interval, in ms.
    pub layer3_interval_ms: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_notional: dec!(1000),
            max_total_exposure: dec!(5000),
            min_confidence: dec!(0.60),
            daily_loss_limit: dec!(700),
            daily_loss_limit_pct: dec!(0.07),
            max_leverage: 5,
            leverage_overrides: HashMap::new(),
            stop_loss_pct: dec!(0.02),
            emergency_loss_pct: dec!(0.15),
            layer2_interval_ms: 2000,
            layer3_interval_ms: 1000,
        }
    }
}

/// Journal sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    /// Path of the append-only JSONL journal.
    pub path: PathBuf,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("bulwark-journal.jsonl"),
        }
    }
}

/// Simulation adapter settings (paper gateway and random-walk market).
#[derive(Debug, Clone, Deserialize)]
pub struct SimConfig {
    /// Seed for the deterministic price walk.
    pub seed: u64,
    /// Starting account balance.
    pub initial_balance: Decimal,
    /// Per-step volatility of the walk, as a fraction.
    pub volatility: Decimal,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            initial_balance: dec!(10000),
            volatility: dec!(0.003),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber with this logging configuration.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            instruments = ["BTC-USD", "ETH-USD"]
            cycle_interval_secs = 180
            data_deadline_ms = 2000
            decision_deadline_ms = 1000
            staleness_bound_secs = 30
            gateway_retries = 2
            retry_backoff_ms = 250
            gateway_deadline_ms = 5000

            [risk]
            max_position_notional = 1000
            max_total_exposure = 5000
            min_confidence = 0.6
            daily_loss_limit = 700
            daily_loss_limit_pct = 0.07
            max_leverage = 5
            stop_loss_pct = 0.02
            emergency_loss_pct = 0.15
            layer2_interval_ms = 2000
            layer3_interval_ms = 1000

            [risk.leverage_overrides]
            "BTC-USD" = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.instruments.len(), 2);
        assert_eq!(config.risk.leverage_overrides.get("BTC-USD"), Some(&10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_empty_instruments() {
        let config = Config {
            engine: EngineConfig {
                instruments: vec![],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let config = Config {
            risk: RiskConfig {
                min_confidence: dec!(1.5),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_emergency_threshold_inside_stop() {
        let config = Config {
            risk: RiskConfig {
                stop_loss_pct: dec!(0.2),
                emergency_loss_pct: dec!(0.15),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
