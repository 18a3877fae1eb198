//! The cycle orchestrator: owns the process state machine, drives one
//! trading cycle per cadence tick, and escalates severe failures.

pub mod app_state;
pub mod cycle;
pub mod reconcile;
pub mod state;

pub use app_state::{AppState, Ledger};
pub use cycle::{CycleOutcome, SevereFailure};
pub use state::{EngineState, Lifecycle};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::EngineConfig;
use crate::domain::Symbol;
use crate::error::Result;
use crate::port::{DecisionSource, ExecutionGateway, Journal, MarketDataProvider};
use crate::risk::{BreakerState, RiskManager};

/// The orchestrator. One instance owns the whole trading process.
pub struct Engine {
    config: EngineConfig,
    instruments: Vec<Symbol>,
    state: Arc<AppState>,
    risk: Arc<RiskManager>,
    market: Arc<dyn MarketDataProvider>,
    decisions: Arc<dyn DecisionSource>,
    gateway: Arc<dyn ExecutionGateway>,
    journal: Arc<dyn Journal>,
    lifecycle: Lifecycle,
    cycle_seq: u64,
}

impl Engine {
    /// Wire an engine over shared state, the risk manager and the
    /// collaborator ports.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        state: Arc<AppState>,
        risk: Arc<RiskManager>,
        market: Arc<dyn MarketDataProvider>,
        decisions: Arc<dyn DecisionSource>,
        gateway: Arc<dyn ExecutionGateway>,
        journal: Arc<dyn Journal>,
    ) -> Self {
        let instruments = config
            .instruments
            .iter()
            .map(|s| Symbol::new(s.as_str()))
            .collect();
        Self {
            config,
            instruments,
            state,
            risk,
            market,
            decisions,
            gateway,
            journal,
            lifecycle: Lifecycle::new(),
            cycle_seq: 0,
        }
    }

    /// Current process state.
    #[must_use]
    pub fn engine_state(&self) -> EngineState {
        self.lifecycle.current()
    }

    pub(crate) fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn instruments(&self) -> &[Symbol] {
        &self.instruments
    }

    pub(crate) fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub(crate) fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub(crate) fn market(&self) -> &Arc<dyn MarketDataProvider> {
        &self.market
    }

    pub(crate) fn decisions(&self) -> &Arc<dyn DecisionSource> {
        &self.decisions
    }

    pub(crate) fn gateway(&self) -> &Arc<dyn ExecutionGateway> {
        &self.gateway
    }

    pub(crate) fn journal(&self) -> &Arc<dyn Journal> {
        &self.journal
    }

    /// The shared application state (breaker status query included).
    #[must_use]
    pub fn app_state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run the cycle loop until shutdown is signalled.
    ///
    /// Cycles start on a fixed cadence; a cycle that overruns its cadence
    /// finishes rather than being interrupted, and the overrun is
    /// recorded.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.instruments.is_empty() {
            return Err(crate::error::EngineError::NoInstruments.into());
        }
        self.lifecycle
            .transition(EngineState::Running, "startup complete")?;
        info!(
            instruments = self.instruments.len(),
            cadence_secs = self.config.cycle_interval_secs,
            "Engine running"
        );

        let mut ticker = tokio::time::interval(self.config.cycle_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    match result {
                        Ok(()) => {
                            if *shutdown.borrow() {
                                info!("Shutdown signal received");
                                break;
                            }
                        }
                        Err(_) => {
                            info!("Shutdown channel closed");
                            break;
                        }
                    }
                }
                _ = ticker.tick() => {
                    self.on_tick().await;
                    if self.lifecycle.current() == EngineState::ShuttingDown {
                        break;
                    }
                }
            }
        }

        self.lifecycle.shutdown("run loop exited");
        Ok(())
    }

    /// One cadence tick: dispatch by process state.
    async fn on_tick(&mut self) {
        match self.lifecycle.current() {
            EngineState::Running => {
                let seq = self.cycle_seq;
                self.cycle_seq += 1;
                let outcome = self.run_cycle(seq).await;
                info!(
                    seq,
                    status = ?outcome.result.status,
                    duration_ms = outcome.result.duration_ms,
                    executed = outcome.result.executed,
                    rejected = outcome.result.rejected,
                    errors = outcome.result.errors,
                    overran = outcome.result.overran,
                    "Cycle finished"
                );
                match outcome.severe {
                    Some(SevereFailure::GatewayUnreachable) => {
                        warn!("Execution gateway unreachable, entering safe mode");
                        let _ = self
                            .lifecycle
                            .transition(EngineState::SafeMode, "gateway unreachable");
                    }
                    Some(SevereFailure::BreakerTripped) => {
                        error!("Circuit breaker tripped, emergency stop");
                        let _ = self
                            .lifecycle
                            .transition(EngineState::EmergencyStop, "circuit breaker tripped");
                    }
                    None => {}
                }
            }
            EngineState::SafeMode => self.try_recover().await,
            EngineState::EmergencyStop => {
                // An operator reset of the breaker is the signal that the
                // incident is resolved.
                if self.state.breaker_state() == BreakerState::Armed {
                    let _ = self
                        .lifecycle
                        .transition(EngineState::Maintenance, "operator reset observed");
                    let _ = self
                        .lifecycle
                        .transition(EngineState::Running, "resuming after reset");
                }
            }
            EngineState::Paused | EngineState::Maintenance => {}
            EngineState::Initializing | EngineState::ShuttingDown => {}
        }
    }

    /// Probe the gateway from safe mode; return to running once it
    /// answers.
    async fn try_recover(&mut self) {
        let probe = tokio::time::timeout(
            Duration::from_secs(5),
            self.gateway.list_open_positions(),
        )
        .await;
        match probe {
            Ok(Ok(_)) => {
                info!("Gateway reachable again, leaving safe mode");
                let _ = self
                    .lifecycle
                    .transition(EngineState::Running, "gateway recovered");
            }
            Ok(Err(e)) => warn!(error = %e, "Safe-mode probe failed"),
            Err(_) => warn!("Safe-mode probe timed out"),
        }
    }
}
