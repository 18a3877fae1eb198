//! Three-layer position protection.
//!
//! Layer 1 is the venue-native stop order placed at open time by the
//! engine. Layers 2 and 3 are application-side monitors spawned here, one
//! pair per open position, supervised in a registry keyed by position id.
//! The registry guarantees at most one active pair per position and atomic
//! teardown when the position leaves `Open`.
//!
//! Monitors re-read the live position state at every wake; a cancelled or
//! stale monitor never places another order. Duplicate closes are expected
//! across layers and against the venue stop; the gateway answers
//! `AlreadyClosed` and that is success.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::domain::{Position, PositionId, PositionState, Symbol, TransitionRecord};
use crate::engine::AppState;
use crate::port::{
    journal_event, ExecutionGateway, GatewayPolicy, Journal, JournalEvent, MarketDataProvider,
    OrderResult,
};
use crate::risk::{BreakerState, RiskLimits};

struct MonitorPair {
    layer2: JoinHandle<()>,
    layer3: JoinHandle<()>,
}

impl MonitorPair {
    fn abort(&self) {
        self.layer2.abort();
        self.layer3.abort();
    }
}

/// Handle returned by [`ProtectionRegistry::start`]; used to cancel the
/// monitors when the position closes normally. Cancellation through the
/// handle and through the registry are the same idempotent operation.
#[derive(Clone)]
pub struct ProtectionHandle {
    position_id: PositionId,
    registry: Arc<ProtectionRegistry>,
}

impl ProtectionHandle {
    /// The protected position.
    #[must_use]
    pub fn position_id(&self) -> PositionId {
        self.position_id
    }

    /// Tear down both monitors. Returns whether this call did the
    /// teardown; cancelling twice is a no-op.
    pub fn cancel(&self) -> bool {
        self.registry.cancel(self.position_id)
    }
}

/// Supervised registry of protection monitors.
pub struct ProtectionRegistry {
    monitors: DashMap<PositionId, MonitorPair>,
    state: Arc<AppState>,
    gateway: Arc<dyn ExecutionGateway>,
    market: Arc<dyn MarketDataProvider>,
    journal: Arc<dyn Journal>,
    limits: RiskLimits,
    policy: GatewayPolicy,
}

impl ProtectionRegistry {
    /// Create a registry over the shared state and collaborator ports.
    #[must_use]
    pub fn new(
        state: Arc<AppState>,
        gateway: Arc<dyn ExecutionGateway>,
        market: Arc<dyn MarketDataProvider>,
        journal: Arc<dyn Journal>,
        limits: RiskLimits,
        policy: GatewayPolicy,
    ) -> Self {
        Self {
            monitors: DashMap::new(),
            state,
            gateway,
            market,
            journal,
            limits,
            policy,
        }
    }

    /// Activate layer-2 and layer-3 monitors for a newly opened position.
    ///
    /// At most one pair runs per position: starting twice hands back a
    /// handle to the existing pair.
    pub fn start(self: &Arc<Self>, position: &Position) -> ProtectionHandle {
        let id = position.id();
        let handle = ProtectionHandle {
            position_id: id,
            registry: Arc::clone(self),
        };

        if !position.is_open() {
            warn!(position = %id, state = %position.state(), "Refusing protection for non-open position");
            return handle;
        }

        match self.monitors.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => handle,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let symbol = position.symbol().clone();
                let layer2 = tokio::spawn(layer2_loop(Arc::clone(self), id, symbol.clone()));
                let layer3 = tokio::spawn(layer3_loop(Arc::clone(self), id, symbol.clone()));
                entry.insert(MonitorPair { layer2, layer3 });
                info!(position = %id, symbol = %symbol, "Protection monitors started");
                handle
            }
        }
    }

    /// Tear down a position's monitor pair as a unit, exactly once.
    /// Returns whether this call removed anything; double-cancellation is
    /// a no-op.
    pub fn cancel(&self, id: PositionId) -> bool {
        match self.monitors.remove(&id) {
            Some((_, pair)) => {
                pair.abort();
                info!(position = %id, "Protection monitors cancelled");
                true
            }
            None => false,
        }
    }

    /// Number of positions with active monitors.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.monitors.len()
    }

    /// Whether a position currently has monitors.
    #[must_use]
    pub fn is_protected(&self, id: PositionId) -> bool {
        self.monitors.contains_key(&id)
    }

    /// Close a position at market, idempotently.
    ///
    /// Claims the close by driving Open -> Closing; a caller finding the
    /// position already Closing joins the in-flight close instead of
    /// failing, and a terminal position is left alone. `AlreadyClosed`
    /// from the venue is success. Returns whether the position ended
    /// closed.
    ///
    /// A confirmed close re-runs the breaker check on a detached task
    /// before the monitors are torn down: cancellation aborts the calling
    /// monitor at its next await, so the check must not ride on its call
    /// stack.
    pub async fn force_close(
        self: &Arc<Self>,
        id: PositionId,
        symbol: &Symbol,
        reason: &str,
        layer: Option<u8>,
    ) -> bool {
        enum Claim {
            Claimed(Option<TransitionRecord>),
            InFlight,
            NotClosable,
        }

        let claim = self.state.with_book_mut(|book| match book.get_mut(id) {
            Some(p) if p.is_open() => match p.transition(PositionState::Closing, reason) {
                Ok(()) => Claim::Claimed(p.history().last().cloned()),
                Err(_) => Claim::NotClosable,
            },
            Some(p) if p.state() == PositionState::Closing => Claim::InFlight,
            _ => Claim::NotClosable,
        });

        match &claim {
            Claim::NotClosable => return false,
            Claim::Claimed(record) => {
                if let Some(record) = record {
                    journal_event(
                        self.journal.as_ref(),
                        &JournalEvent::Transition {
                            position_id: id,
                            symbol: symbol.clone(),
                            record: record.clone(),
                        },
                    );
                }
                if let Some(layer) = layer {
                    journal_event(
                        self.journal.as_ref(),
                        &JournalEvent::ProtectionEscalation {
                            position_id: id,
                            layer,
                            detail: reason.to_string(),
                            at: Utc::now(),
                        },
                    );
                }
            }
            Claim::InFlight => {
                debug!(position = %id, "Close already in flight, joining");
            }
        }

        let result = self
            .policy
            .call(|| self.gateway.close_position(id, symbol))
            .await;

        match result {
            Ok(outcome) if outcome.is_closed() => {
                let exit_hint = match outcome {
                    OrderResult::Closed { exit_price, .. } => Some(exit_price),
                    _ => None,
                };
                let done = self.confirm_closed(id, symbol, exit_hint);
                if done {
                    detach_enforce_breaker(Arc::clone(self));
                    self.cancel(id);
                }
                // A racer may have confirmed it first; the position being
                // Closed is still a successful close for this caller.
                done || self
                    .state
                    .with_book(|book| {
                        book.get(id)
                            .map(|p| p.state() == PositionState::Closed)
                    })
                    .unwrap_or(false)
            }
            Ok(OrderResult::Rejected { reason: venue_reason }) => {
                error!(position = %id, reason = %venue_reason, "Venue rejected close");
                journal_event(
                    self.journal.as_ref(),
                    &JournalEvent::ProtectionEscalation {
                        position_id: id,
                        layer: layer.unwrap_or(0),
                        detail: format!("close rejected by venue: {venue_reason}"),
                        at: Utc::now(),
                    },
                );
                false
            }
            Ok(other) => {
                error!(position = %id, ?other, "Unexpected venue response to close");
                false
            }
            Err(e) => {
                error!(position = %id, error = %e, "Close failed after retries");
                journal_event(
                    self.journal.as_ref(),
                    &JournalEvent::ProtectionEscalation {
                        position_id: id,
                        layer: layer.unwrap_or(0),
                        detail: format!("close failed: {e}"),
                        at: Utc::now(),
                    },
                );
                false
            }
        }
    }

    /// Drive Closing -> Closed and book realized PnL. No-op when another
    /// caller already confirmed the close.
    fn confirm_closed(
        &self,
        id: PositionId,
        symbol: &Symbol,
        exit_hint: Option<rust_decimal::Decimal>,
    ) -> bool {
        let mut realized = None;
        let record = self.state.with_book_mut(|book| {
            let position = book.get_mut(id)?;
            if position.state() != PositionState::Closing {
                return None;
            }
            position.transition(PositionState::Closed, "close confirmed").ok()?;
            let exit = exit_hint.unwrap_or_else(|| position.mark_price());
            position.set_exit_fill(exit);
            realized = Some(position.realized_pnl());
            position.history().last().cloned()
        });

        let Some(record) = record else {
            // The winning racer already booked it.
            return false;
        };
        if let Some(pnl) = realized {
            self.state.book_realized(pnl);
            info!(position = %id, symbol = %symbol, pnl = %pnl, "Position closed");
        }
        journal_event(
            self.journal.as_ref(),
            &JournalEvent::Transition {
                position_id: id,
                symbol: symbol.clone(),
                record,
            },
        );
        true
    }

    /// Re-evaluate the daily-loss breaker and enforce its consequences:
    /// a TRIPPED breaker force-closes every open position, and reaches
    /// AWAITING_RESET once the book is flat.
    ///
    /// Called after every committed position-state change, never on a
    /// timer.
    pub async fn enforce_breaker(self: &Arc<Self>) -> BreakerState {
        let snapshot = self.state.snapshot();
        if let Some(trip) = self.state.evaluate_breaker(&snapshot) {
            journal_event(
                self.journal.as_ref(),
                &JournalEvent::BreakerTripped {
                    daily_pnl: trip.daily_pnl,
                    threshold: trip.threshold,
                    at: trip.at,
                },
            );
        }

        if self.state.breaker_state() == BreakerState::Tripped {
            let open: Vec<(PositionId, Symbol)> = self
                .state
                .open_positions()
                .iter()
                .map(|p| (p.id(), p.symbol().clone()))
                .collect();
            for (id, symbol) in open {
                self.force_close(id, &symbol, "circuit breaker force-closure", None)
                    .await;
            }
            if self.state.open_count() == 0 {
                self.state.mark_breaker_flat();
            }
        }

        self.state.breaker_state()
    }
}

/// Detach a breaker re-check onto its own task.
///
/// Kept as a free function so the `tokio::spawn` `Send` obligation is
/// checked outside `force_close`'s defining scope — inside it, rustc's
/// auto-`Send` inference for the two mutually-referencing futures forms a
/// cycle it refuses to resolve. Pure plumbing; behaviour is unchanged.
fn detach_enforce_breaker(registry: Arc<ProtectionRegistry>) {
    tokio::spawn(async move {
        registry.enforce_breaker().await;
    });
}

/// Layer 2: re-reads the price on a short fixed interval for the lifetime
/// of the position and force-closes at market once the price crosses the
/// stop and the venue-side order has not fired.
async fn layer2_loop(registry: Arc<ProtectionRegistry>, id: PositionId, symbol: Symbol) {
    let mut ticker = tokio::time::interval(registry.limits.layer2_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // Live state, re-read at wake. Monitors outlive nothing.
        let open = registry
            .state
            .with_book(|book| book.get(id).map(Position::is_open))
            .unwrap_or(false);
        if !open {
            break;
        }

        let price = match registry.market.snapshot(&symbol).await {
            Ok(snap) => snap.price,
            Err(e) => {
                warn!(position = %id, error = %e, "Layer-2 price read failed");
                continue;
            }
        };
        registry.state.update_mark(id, price);

        let crossed = registry
            .state
            .with_book(|book| {
                book.get(id)
                    .map(|p| p.is_open() && p.stop_crossed(price))
            })
            .unwrap_or(false);
        if crossed {
            warn!(
                position = %id,
                symbol = %symbol,
                price = %price,
                "Layer-2: stop crossed with venue stop unconfirmed, force-closing"
            );
            registry
                .force_close(id, &symbol, "layer-2 stop breach", Some(2))
                .await;
            break;
        }
    }
}

/// Layer 3: the last line of defense. Polls faster and force-closes
/// unconditionally once loss exceeds the emergency threshold, regardless
/// of what layers 1 and 2 have done.
async fn layer3_loop(registry: Arc<ProtectionRegistry>, id: PositionId, symbol: Symbol) {
    let mut ticker = tokio::time::interval(registry.limits.layer3_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let open = registry
            .state
            .with_book(|book| book.get(id).map(Position::is_open))
            .unwrap_or(false);
        if !open {
            break;
        }

        let price = match registry.market.snapshot(&symbol).await {
            Ok(snap) => snap.price,
            Err(e) => {
                warn!(position = %id, error = %e, "Layer-3 price read failed");
                continue;
            }
        };
        registry.state.update_mark(id, price);

        let breached = registry
            .state
            .with_book(|book| {
                book.get(id)
                    .map(|p| p.is_open() && p.loss_fraction() >= registry.limits.emergency_loss_pct)
            })
            .unwrap_or(false);
        if breached {
            error!(
                position = %id,
                symbol = %symbol,
                price = %price,
                "Layer-3: emergency loss threshold exceeded, force-closing"
            );
            registry
                .force_close(id, &symbol, "layer-3 emergency loss", Some(3))
                .await;
            break;
        }
    }
}
