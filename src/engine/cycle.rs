//! One trading cycle, end to end.
//!
//! Failure handling is per-step and non-fatal by default: one
//! instrument's data, decision or execution failure never prevents the
//! others from being handled in the same cycle. Only gateway
//! unreachability and a breaker trip escalate to the process state
//! machine.

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::domain::{
    CycleResult, CycleStatus, DecisionAction, DecisionOutcome, Disposition, InstrumentOutcome,
    MarketSnapshot, NoDecisionReason, PortfolioSnapshot, Position, PositionId, PositionState,
    Side, SkipReason, Symbol, TradingDecision,
};
use crate::engine::Engine;
use crate::port::{journal_event, JournalEvent, OrderRequest, OrderResult};
use crate::risk::{BreakerState, RiskValidation};

/// Failure classes that escalate to the process state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SevereFailure {
    GatewayUnreachable,
    BreakerTripped,
}

/// A cycle result plus any severe failure observed while producing it.
#[derive(Debug)]
pub struct CycleOutcome {
    pub result: CycleResult,
    pub severe: Option<SevereFailure>,
}

/// Per-instrument data gathered concurrently in steps 2 and 3.
struct Gathered {
    symbol: Symbol,
    market: Option<MarketSnapshot>,
    outcome: DecisionOutcome,
}

/// Execution failure local to one instrument.
struct ExecFailure {
    message: String,
    unreachable: bool,
}

/// Protective stop level for a side at the given distance from entry.
pub(crate) fn stop_for(side: Side, price: Decimal, pct: Decimal) -> Decimal {
    match side {
        Side::Long => price * (Decimal::ONE - pct),
        Side::Short => price * (Decimal::ONE + pct),
    }
}

impl Engine {
    /// Execute one full cycle and emit its result. Never returns an error:
    /// everything short of a severe failure is absorbed into the per-
    /// instrument outcomes.
    pub async fn run_cycle(&self, seq: u64) -> CycleOutcome {
        let started_at = Utc::now();
        let t0 = Instant::now();

        // 1. Breaker gate. A non-armed breaker still gets its
        // consequences driven forward (force-closure, AWAITING_RESET).
        if self.state().breaker_state() != BreakerState::Armed {
            let breaker = self.risk().check_circuit_breaker().await;
            warn!(seq, breaker = %breaker, "Cycle skipped: circuit breaker not armed");
            let result = CycleResult::skipped(seq, SkipReason::CircuitBreaker, started_at);
            journal_event(
                self.journal().as_ref(),
                &JournalEvent::CycleCompleted {
                    result: result.clone(),
                },
            );
            return CycleOutcome {
                result,
                severe: None,
            };
        }

        // 2 + 3. Market snapshots and decisions, concurrently per
        // instrument, joined before validation. Total latency is bounded
        // by the slowest instrument, not the sum.
        let portfolio = self.state().snapshot();
        let gathered: Vec<Gathered> = join_all(
            self.instruments()
                .iter()
                .map(|symbol| self.gather(symbol, &portfolio)),
        )
        .await;

        self.refresh_marks(&gathered);

        // 4 + 5. Validate and execute sequentially; the book mutates as
        // we go, so each decision is validated against a fresh snapshot.
        let mut outcomes = Vec::with_capacity(gathered.len());
        let mut generated = 0u32;
        let mut executed = 0u32;
        let mut rejected = 0u32;
        let mut errors = 0u32;
        let mut severe: Option<SevereFailure> = None;

        for item in gathered {
            let disposition = match item.outcome {
                DecisionOutcome::NoDecision {
                    reason: NoDecisionReason::DataUnavailable,
                } => Disposition::DataUnavailable,
                DecisionOutcome::NoDecision { reason } => Disposition::NoDecision { reason },
                DecisionOutcome::Decided(decision) => {
                    generated += 1;
                    if decision.action == DecisionAction::Hold {
                        Disposition::Held
                    } else {
                        let fresh = self.state().snapshot();
                        match self.risk().validate_pre_trade(&decision, &fresh) {
                            RiskValidation::Rejected { reason } => {
                                rejected += 1;
                                Disposition::Rejected {
                                    reason: reason.code().to_string(),
                                }
                            }
                            RiskValidation::Approved {
                                notional,
                                stop_loss_pct,
                                leverage,
                                capped,
                            } => {
                                let price = item.market.as_ref().map(|m| m.price);
                                match self
                                    .execute(&decision, price, notional, stop_loss_pct, leverage, capped)
                                    .await
                                {
                                    Ok(()) => {
                                        executed += 1;
                                        Disposition::Executed
                                    }
                                    Err(failure) => {
                                        errors += 1;
                                        error!(
                                            symbol = %decision.symbol,
                                            error = %failure.message,
                                            "Execution failed"
                                        );
                                        if failure.unreachable {
                                            severe
                                                .get_or_insert(SevereFailure::GatewayUnreachable);
                                        }
                                        Disposition::ExecutionFailed {
                                            error: failure.message,
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            };

            // The trip check is ordered after every committed state
            // change, not deferred to a timer.
            if matches!(disposition, Disposition::Executed)
                && self.risk().check_circuit_breaker().await != BreakerState::Armed
            {
                severe = Some(SevereFailure::BreakerTripped);
            }

            outcomes.push(InstrumentOutcome {
                symbol: item.symbol,
                disposition,
            });
        }

        // 6. Reconcile against the venue's authoritative view.
        if let Err(e) = self.reconcile().await {
            errors += 1;
            error!(error = %e, "Reconciliation failed");
            if e.is_transient() {
                severe.get_or_insert(SevereFailure::GatewayUnreachable);
            }
        }

        // Read-after-write: the breaker sees everything this cycle did.
        if self.risk().check_circuit_breaker().await != BreakerState::Armed {
            severe = Some(SevereFailure::BreakerTripped);
        }

        // 7. Metrics, recorded regardless of outcome.
        let duration = t0.elapsed();
        let result = CycleResult {
            seq,
            status: CycleStatus::Completed,
            started_at,
            duration_ms: duration.as_millis() as u64,
            decisions_generated: generated,
            executed,
            rejected,
            errors,
            overran: duration > self.config().cycle_interval(),
            outcomes,
        };
        journal_event(
            self.journal().as_ref(),
            &JournalEvent::CycleCompleted {
                result: result.clone(),
            },
        );
        let ledger = self.state().ledger();
        journal_event(
            self.journal().as_ref(),
            &JournalEvent::LedgerCheckpoint {
                balance: ledger.balance,
                realized_pnl_today: ledger.realized_pnl_today,
                reference_balance: ledger.reference_balance,
                at: Utc::now(),
            },
        );

        CycleOutcome { result, severe }
    }

    /// Steps 2 and 3 for one instrument: snapshot, staleness check,
    /// decision request. Every failure stays local to the instrument.
    async fn gather(&self, symbol: &Symbol, portfolio: &PortfolioSnapshot) -> Gathered {
        let market = match tokio::time::timeout(
            self.config().data_deadline(),
            self.market().snapshot(symbol),
        )
        .await
        {
            Err(_) => {
                warn!(symbol = %symbol, "Market data fetch timed out");
                None
            }
            Ok(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "Market data fetch failed");
                None
            }
            Ok(Ok(snapshot)) => {
                let now = Utc::now();
                if snapshot.is_stale(self.config().staleness_bound_secs, now) {
                    warn!(
                        symbol = %symbol,
                        age_secs = snapshot.age_secs(now),
                        "Market data stale, treating as unavailable"
                    );
                    None
                } else {
                    Some(snapshot)
                }
            }
        };

        let Some(market) = market else {
            return Gathered {
                symbol: symbol.clone(),
                market: None,
                outcome: DecisionOutcome::NoDecision {
                    reason: NoDecisionReason::DataUnavailable,
                },
            };
        };

        let outcome = match tokio::time::timeout(
            self.config().decision_deadline(),
            self.decisions().decide(symbol, &market, portfolio),
        )
        .await
        {
            Err(_) => {
                warn!(symbol = %symbol, "Decision request timed out");
                DecisionOutcome::NoDecision {
                    reason: NoDecisionReason::Timeout,
                }
            }
            Ok(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "Decision source failed");
                DecisionOutcome::NoDecision {
                    reason: NoDecisionReason::SourceError,
                }
            }
            Ok(Ok(decision)) => match malformed(&decision, symbol) {
                Some(why) => {
                    warn!(symbol = %symbol, why, "Malformed decision dropped");
                    DecisionOutcome::NoDecision {
                        reason: NoDecisionReason::Malformed,
                    }
                }
                None => DecisionOutcome::Decided(decision),
            },
        };

        Gathered {
            symbol: symbol.clone(),
            market: Some(market),
            outcome,
        }
    }

    /// Push fresh prices onto open positions for the instruments we
    /// fetched this cycle.
    fn refresh_marks(&self, gathered: &[Gathered]) {
        for item in gathered {
            let Some(market) = &item.market else { continue };
            let ids: Vec<PositionId> = self.state().with_book(|book| {
                book.open_positions()
                    .filter(|p| p.symbol() == &item.symbol)
                    .map(Position::id)
                    .collect()
            });
            for id in ids {
                self.state().update_mark(id, market.price);
            }
        }
    }

    /// Step 5 for one accepted decision.
    async fn execute(
        &self,
        decision: &TradingDecision,
        price: Option<Decimal>,
        notional: Decimal,
        stop_loss_pct: Decimal,
        leverage: u32,
        capped: bool,
    ) -> Result<(), ExecFailure> {
        match decision.action {
            DecisionAction::Exit => self.execute_exit(decision).await,
            DecisionAction::EnterLong | DecisionAction::EnterShort => {
                let Some(price) = price else {
                    return Err(ExecFailure {
                        message: "no market price for entry".to_string(),
                        unreachable: false,
                    });
                };
                self.execute_entry(decision, price, notional, stop_loss_pct, leverage, capped)
                    .await
            }
            DecisionAction::Hold => Ok(()),
        }
    }

    /// Close the open position behind an exit decision through the same
    /// idempotent path the protection layers use.
    async fn execute_exit(&self, decision: &TradingDecision) -> Result<(), ExecFailure> {
        let target = self.state().with_book(|book| {
            book.open_positions()
                .find(|p| p.symbol() == &decision.symbol)
                .map(|p| (p.id(), p.symbol().clone()))
        });
        let Some((id, symbol)) = target else {
            return Err(ExecFailure {
                message: "no open position to exit".to_string(),
                unreachable: false,
            });
        };

        let closed = self
            .risk()
            .protection()
            .force_close(id, &symbol, "exit decision", None)
            .await;
        if closed {
            Ok(())
        } else {
            Err(ExecFailure {
                message: "close not confirmed".to_string(),
                unreachable: false,
            })
        }
    }

    /// Open a position: entry order, state transitions, layer-1 stop,
    /// protection start.
    async fn execute_entry(
        &self,
        decision: &TradingDecision,
        price: Decimal,
        notional: Decimal,
        stop_loss_pct: Decimal,
        leverage: u32,
        capped: bool,
    ) -> Result<(), ExecFailure> {
        let quantity = notional / price;
        if quantity <= Decimal::ZERO {
            return Err(ExecFailure {
                message: "approved notional rounds to zero quantity".to_string(),
                unreachable: false,
            });
        }
        if capped {
            info!(
                symbol = %decision.symbol,
                notional = %notional,
                "Position size capped by risk gate"
            );
        }

        let side = match decision.action {
            DecisionAction::EnterLong => Side::Long,
            _ => Side::Short,
        };
        let stop_price = stop_for(side, price, stop_loss_pct);
        let take_profit = decision.take_profit_pct.map(|pct| match side {
            Side::Long => price * (Decimal::ONE + pct),
            Side::Short => price * (Decimal::ONE - pct),
        });

        let (id, record) = self.state().with_book_mut(|book| {
            let id = book.next_id();
            let mut position = Position::new(
                id,
                decision.symbol.clone(),
                side,
                quantity,
                price,
                stop_price,
                take_profit,
                leverage,
            );
            let _ = position.transition(PositionState::Opening, "decision accepted");
            let record = position.history().last().cloned();
            book.add(position);
            (id, record)
        });
        if let Some(record) = record {
            journal_event(
                self.journal().as_ref(),
                &JournalEvent::Transition {
                    position_id: id,
                    symbol: decision.symbol.clone(),
                    record,
                },
            );
        }

        let entry = OrderRequest::market(decision.symbol.clone(), side, quantity, leverage);
        let submitted = self
            .config()
            .gateway_policy()
            .call(|| self.gateway().submit_order(&entry))
            .await;

        match submitted {
            Ok(OrderResult::Filled { fill_price, .. }) => {
                let stop_at_fill = stop_for(side, fill_price, stop_loss_pct);
                let record = self.state().with_book_mut(|book| {
                    let position = book.get_mut(id)?;
                    position
                        .transition(PositionState::Open, "fill confirmed")
                        .ok()?;
                    position.set_entry_fill(fill_price);
                    position.set_stop_price(stop_at_fill);
                    position.history().last().cloned()
                });
                if let Some(record) = record {
                    journal_event(
                        self.journal().as_ref(),
                        &JournalEvent::Transition {
                            position_id: id,
                            symbol: decision.symbol.clone(),
                            record,
                        },
                    );
                }

                self.place_venue_stop(id, decision, side, quantity, stop_at_fill, leverage)
                    .await;

                let position = self.state().with_book(|book| book.get(id).cloned());
                if let Some(position) = position {
                    self.risk().start_protection(&position);
                }
                Ok(())
            }
            Ok(OrderResult::Rejected { reason }) => {
                self.fail_position(id, &decision.symbol, &format!("entry rejected: {reason}"));
                Err(ExecFailure {
                    message: format!("entry rejected: {reason}"),
                    unreachable: false,
                })
            }
            Ok(other) => {
                self.fail_position(id, &decision.symbol, "unexpected venue response");
                Err(ExecFailure {
                    message: format!("unexpected venue response: {other:?}"),
                    unreachable: false,
                })
            }
            Err(e) => {
                self.fail_position(id, &decision.symbol, &format!("gateway error: {e}"));
                Err(ExecFailure {
                    message: e.to_string(),
                    unreachable: e.is_transient(),
                })
            }
        }
    }

    /// Layer 1: place the venue-native stop. A rejected stop is a
    /// protection failure: it escalates to the application layers and is
    /// journaled, never silently dropped.
    async fn place_venue_stop(
        &self,
        id: PositionId,
        decision: &TradingDecision,
        side: Side,
        quantity: Decimal,
        stop_price: Decimal,
        leverage: u32,
    ) {
        let request = OrderRequest::stop(
            decision.symbol.clone(),
            side.opposite(),
            quantity,
            stop_price,
            leverage,
        );
        let outcome = self
            .config()
            .gateway_policy()
            .call(|| self.gateway().submit_order(&request))
            .await;

        let failure = match outcome {
            Ok(OrderResult::StopAccepted { .. }) => None,
            Ok(other) => Some(format!("venue stop not accepted: {other:?}")),
            Err(e) => Some(format!("venue stop failed: {e}")),
        };
        if let Some(detail) = failure {
            warn!(
                position = %id,
                symbol = %decision.symbol,
                detail,
                "Layer-1 stop unavailable, application layers cover"
            );
            journal_event(
                self.journal().as_ref(),
                &JournalEvent::ProtectionEscalation {
                    position_id: id,
                    layer: 1,
                    detail,
                    at: Utc::now(),
                },
            );
        }
    }

    /// Opening -> Failed after a rejected or failed entry.
    fn fail_position(&self, id: PositionId, symbol: &Symbol, reason: &str) {
        let record = self.state().with_book_mut(|book| {
            let position = book.get_mut(id)?;
            position.transition(PositionState::Failed, reason).ok()?;
            position.history().last().cloned()
        });
        if let Some(record) = record {
            journal_event(
                self.journal().as_ref(),
                &JournalEvent::Transition {
                    position_id: id,
                    symbol: symbol.clone(),
                    record,
                },
            );
        }
    }
}

/// Shape check for decisions coming back from the opaque source.
fn malformed(decision: &TradingDecision, expected: &Symbol) -> Option<&'static str> {
    if &decision.symbol != expected {
        return Some("symbol mismatch");
    }
    if decision.confidence < Decimal::ZERO || decision.confidence > Decimal::ONE {
        return Some("confidence out of range");
    }
    if decision.size_fraction < Decimal::ZERO || decision.size_fraction > Decimal::ONE {
        return Some("size fraction out of range");
    }
    None
}

impl std::fmt::Display for SevereFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SevereFailure::GatewayUnreachable => write!(f, "gateway unreachable"),
            SevereFailure::BreakerTripped => write!(f, "breaker tripped"),
        }
    }
}
