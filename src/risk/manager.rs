//! Pre-trade validation and the risk-manager facade.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::warn;

use crate::domain::{DecisionAction, PortfolioSnapshot, Position, PositionId, TradingDecision};
use crate::engine::AppState;
use crate::error::RiskError;
use crate::risk::protection::{ProtectionHandle, ProtectionRegistry};
use crate::risk::{BreakerState, RiskLimits};

/// Result of the pre-trade gate.
#[derive(Debug, Clone)]
pub enum RiskValidation {
    /// Trade may proceed at the approved notional. `capped` marks a size
    /// adjusted down from the request; a cap is never applied silently.
    Approved {
        notional: Decimal,
        stop_loss_pct: Decimal,
        leverage: u32,
        capped: bool,
    },
    /// Trade is rejected with a reason code.
    Rejected { reason: RiskError },
}

impl RiskValidation {
    /// Check if approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskValidation::Approved { .. })
    }

    /// Get rejection reason if rejected.
    #[must_use]
    pub fn rejection_reason(&self) -> Option<&RiskError> {
        match self {
            RiskValidation::Rejected { reason } => Some(reason),
            RiskValidation::Approved { .. } => None,
        }
    }
}

/// Validate one decision against the portfolio, the limits and the
/// breaker. Pure function of its inputs: no side effects, safe to call
/// speculatively.
#[must_use]
pub fn validate(
    decision: &TradingDecision,
    portfolio: &PortfolioSnapshot,
    breaker: BreakerState,
    limits: &RiskLimits,
) -> RiskValidation {
    match decision.action {
        DecisionAction::Hold => RiskValidation::Approved {
            notional: Decimal::ZERO,
            stop_loss_pct: limits.stop_loss_pct,
            leverage: 1,
            capped: false,
        },
        DecisionAction::Exit => {
            // Exits reduce exposure and stay allowed while TRIPPED.
            if portfolio.open_for_symbol(&decision.symbol).is_none() {
                RiskValidation::Rejected {
                    reason: RiskError::NoPositionToExit {
                        symbol: decision.symbol.to_string(),
                    },
                }
            } else {
                RiskValidation::Approved {
                    notional: Decimal::ZERO,
                    stop_loss_pct: limits.stop_loss_pct,
                    leverage: 1,
                    capped: false,
                }
            }
        }
        DecisionAction::EnterLong | DecisionAction::EnterShort => {
            validate_entry(decision, portfolio, breaker, limits)
        }
    }
}

fn validate_entry(
    decision: &TradingDecision,
    portfolio: &PortfolioSnapshot,
    breaker: BreakerState,
    limits: &RiskLimits,
) -> RiskValidation {
    if breaker != BreakerState::Armed {
        return RiskValidation::Rejected {
            reason: RiskError::BreakerNotArmed {
                state: breaker.to_string(),
            },
        };
    }

    if decision.confidence < limits.min_confidence {
        return RiskValidation::Rejected {
            reason: RiskError::LowConfidence {
                confidence: decision.confidence,
                minimum: limits.min_confidence,
            },
        };
    }

    let bound = limits.leverage_bound(&decision.symbol);
    if decision.leverage == 0 || decision.leverage > bound {
        return RiskValidation::Rejected {
            reason: RiskError::LeverageOutOfBounds {
                symbol: decision.symbol.to_string(),
                requested: decision.leverage,
                bound,
            },
        };
    }

    let requested = decision.size_fraction * portfolio.balance;
    let mut notional = requested;
    let mut capped = false;

    if notional > limits.max_position_notional {
        notional = limits.max_position_notional;
        capped = true;
    }

    let headroom = limits.max_total_exposure - portfolio.total_exposure();
    if headroom <= Decimal::ZERO {
        return RiskValidation::Rejected {
            reason: RiskError::ExposureLimitExceeded {
                current: portfolio.total_exposure(),
                limit: limits.max_total_exposure,
            },
        };
    }
    if notional > headroom {
        notional = headroom;
        capped = true;
    }

    RiskValidation::Approved {
        notional,
        stop_loss_pct: decision.stop_loss_pct.unwrap_or(limits.stop_loss_pct),
        leverage: decision.leverage,
        capped,
    }
}

/// The risk manager: pre-trade gate, protection supervision and the
/// daily-loss circuit breaker, over the shared state.
pub struct RiskManager {
    state: Arc<AppState>,
    limits: RiskLimits,
    protection: Arc<ProtectionRegistry>,
}

impl RiskManager {
    /// Create a risk manager over shared state and the protection
    /// registry.
    #[must_use]
    pub fn new(state: Arc<AppState>, limits: RiskLimits, protection: Arc<ProtectionRegistry>) -> Self {
        Self {
            state,
            limits,
            protection,
        }
    }

    /// The configured limits.
    #[must_use]
    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Run the pre-trade gate against the current breaker state.
    #[must_use]
    pub fn validate_pre_trade(
        &self,
        decision: &TradingDecision,
        portfolio: &PortfolioSnapshot,
    ) -> RiskValidation {
        let result = validate(decision, portfolio, self.state.breaker_state(), &self.limits);
        if let Some(reason) = result.rejection_reason() {
            warn!(
                symbol = %decision.symbol,
                action = ?decision.action,
                code = reason.code(),
                "Decision rejected by risk gate: {reason}"
            );
        }
        result
    }

    /// Activate layered protection for a newly opened position.
    pub fn start_protection(&self, position: &Position) -> ProtectionHandle {
        self.protection.start(position)
    }

    /// Tear down a position's protection. Idempotent.
    pub fn cancel_protection(&self, id: PositionId) -> bool {
        self.protection.cancel(id)
    }

    /// Re-evaluate the daily-loss breaker against a fresh snapshot and
    /// enforce its consequences (force-closure, AWAITING_RESET).
    pub async fn check_circuit_breaker(&self) -> BreakerState {
        self.protection.enforce_breaker().await
    }

    /// The supervised protection registry.
    #[must_use]
    pub fn protection(&self) -> &Arc<ProtectionRegistry> {
        &self.protection
    }
}
