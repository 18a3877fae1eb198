//! Process-level operating state.
//!
//! The engine is itself a state machine. Invalid transition requests are
//! rejected and logged, never silently coerced.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Operating state of the whole process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Wiring collaborators, restoring the ledger.
    Initializing,
    /// Normal cycling.
    Running,
    /// Operator hold; no cycles run.
    Paused,
    /// Degraded: gateway trouble. Probing for recovery, no trading.
    SafeMode,
    /// Breaker tripped or unrecoverable failure. No trading until
    /// operator intervention.
    EmergencyStop,
    /// Operator maintenance window.
    Maintenance,
    /// Terminal.
    ShuttingDown,
}

impl EngineState {
    /// Whether a transition to `target` is allowed from this state.
    #[must_use]
    pub fn can_transition_to(self, target: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, target),
            (Initializing, Running)
                | (Initializing, ShuttingDown)
                | (Running, Paused)
                | (Running, SafeMode)
                | (Running, EmergencyStop)
                | (Running, Maintenance)
                | (Running, ShuttingDown)
                | (Paused, Running)
                | (Paused, ShuttingDown)
                | (SafeMode, Running)
                | (SafeMode, EmergencyStop)
                | (EmergencyStop, Maintenance)
                | (EmergencyStop, ShuttingDown)
                | (Maintenance, Running)
                | (Maintenance, ShuttingDown)
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Initializing => "initializing",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
            EngineState::SafeMode => "safe_mode",
            EngineState::EmergencyStop => "emergency_stop",
            EngineState::Maintenance => "maintenance",
            EngineState::ShuttingDown => "shutting_down",
        };
        write!(f, "{s}")
    }
}

/// One accepted engine transition.
#[derive(Debug, Clone)]
pub struct EngineTransition {
    pub from: EngineState,
    pub to: EngineState,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// The engine's lifecycle: current state plus an append-only log of
/// accepted transitions.
#[derive(Debug)]
pub struct Lifecycle {
    current: EngineState,
    log: Vec<EngineTransition>,
}

impl Lifecycle {
    /// Start in `Initializing`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: EngineState::Initializing,
            log: Vec::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn current(&self) -> EngineState {
        self.current
    }

    /// The accepted-transition log.
    #[must_use]
    pub fn log(&self) -> &[EngineTransition] {
        &self.log
    }

    /// Request a transition. Invalid requests are rejected and logged.
    pub fn transition(
        &mut self,
        target: EngineState,
        reason: impl Into<String>,
    ) -> Result<(), EngineError> {
        if !self.current.can_transition_to(target) {
            tracing::error!(
                from = %self.current,
                to = %target,
                "Invalid engine transition rejected"
            );
            return Err(EngineError::InvalidStateTransition {
                from: self.current,
                to: target,
            });
        }
        let reason = reason.into();
        tracing::info!(from = %self.current, to = %target, reason = %reason, "Engine transition");
        self.log.push(EngineTransition {
            from: self.current,
            to: target,
            reason,
            at: Utc::now(),
        });
        self.current = target;
        Ok(())
    }

    /// Drive to `ShuttingDown` from wherever we are, escalating through
    /// the valid edges when no direct one exists.
    pub fn shutdown(&mut self, reason: &str) {
        if self.current == EngineState::ShuttingDown {
            return;
        }
        if self.transition(EngineState::ShuttingDown, reason).is_ok() {
            return;
        }
        // SafeMode has no direct edge; escalate first.
        if self.current == EngineState::SafeMode {
            let _ = self.transition(EngineState::EmergencyStop, "escalating for shutdown");
        }
        let _ = self.transition(EngineState::ShuttingDown, reason);
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_startup_and_shutdown() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(EngineState::Running, "startup").unwrap();
        lifecycle.transition(EngineState::ShuttingDown, "ctrl-c").unwrap();
        assert_eq!(lifecycle.current(), EngineState::ShuttingDown);
        assert_eq!(lifecycle.log().len(), 2);
    }

    #[test]
    fn safe_mode_only_escalates_or_recovers() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(EngineState::Running, "startup").unwrap();
        lifecycle.transition(EngineState::SafeMode, "gateway down").unwrap();

        assert!(lifecycle.transition(EngineState::Paused, "nope").is_err());
        assert!(lifecycle.transition(EngineState::Maintenance, "nope").is_err());
        assert!(lifecycle
            .transition(EngineState::ShuttingDown, "nope")
            .is_err());

        lifecycle.transition(EngineState::Running, "recovered").unwrap();
        assert_eq!(lifecycle.current(), EngineState::Running);
    }

    #[test]
    fn emergency_stop_paths() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(EngineState::Running, "startup").unwrap();
        lifecycle
            .transition(EngineState::EmergencyStop, "breaker tripped")
            .unwrap();

        assert!(lifecycle.transition(EngineState::Running, "nope").is_err());
        lifecycle
            .transition(EngineState::Maintenance, "operator reset")
            .unwrap();
        lifecycle.transition(EngineState::Running, "resumed").unwrap();
    }

    #[test]
    fn invalid_transition_preserves_state_and_log() {
        let mut lifecycle = Lifecycle::new();
        let err = lifecycle.transition(EngineState::Paused, "nope");
        assert!(err.is_err());
        assert_eq!(lifecycle.current(), EngineState::Initializing);
        assert!(lifecycle.log().is_empty());
    }

    #[test]
    fn shutdown_escalates_out_of_safe_mode() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(EngineState::Running, "startup").unwrap();
        lifecycle.transition(EngineState::SafeMode, "gateway down").unwrap();

        lifecycle.shutdown("ctrl-c");
        assert_eq!(lifecycle.current(), EngineState::ShuttingDown);
    }

    #[test]
    fn shutting_down_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(EngineState::ShuttingDown, "early exit").unwrap();
        for target in [
            EngineState::Running,
            EngineState::Paused,
            EngineState::SafeMode,
            EngineState::EmergencyStop,
            EngineState::Maintenance,
        ] {
            assert!(lifecycle.transition(target, "nope").is_err());
        }
    }
}
