//! Reconciliation: compare local position state with the venue's
//! authoritative view and correct local drift.
//!
//! The exchange wins every conflict. Corrections are alerted and
//! journaled, never absorbed silently.

use chrono::Utc;
use tracing::warn;

use crate::domain::{Position, PositionId, PositionState, Symbol};
use crate::engine::cycle::stop_for;
use crate::engine::Engine;
use crate::error::GatewayError;
use crate::port::{journal_event, ExchangePosition, JournalEvent};

impl Engine {
    /// Step 6 of the cycle. Returns an error only when the venue could
    /// not be read at all.
    pub(crate) async fn reconcile(&self) -> Result<(), GatewayError> {
        let venue = self
            .config()
            .gateway_policy()
            .call(|| self.gateway().list_open_positions())
            .await?;

        self.correct_local_drift(&venue);
        self.adopt_venue_only(&venue);
        Ok(())
    }

    /// Local open positions the venue no longer reports are gone: mark
    /// them liquidated and book the loss at the last known mark.
    fn correct_local_drift(&self, venue: &[ExchangePosition]) {
        let local_open: Vec<(PositionId, Symbol)> = self.state().with_book(|book| {
            book.open_positions()
                .map(|p| (p.id(), p.symbol().clone()))
                .collect()
        });

        for (id, symbol) in local_open {
            let Some(remote) = venue.iter().find(|v| v.symbol == symbol) else {
                self.liquidate_local(id, &symbol);
                continue;
            };

            let local_quantity = self
                .state()
                .with_book(|book| book.get(id).map(Position::quantity));
            if let Some(local_quantity) = local_quantity {
                if local_quantity != remote.quantity {
                    warn!(
                        position = %id,
                        symbol = %symbol,
                        local = %local_quantity,
                        venue = %remote.quantity,
                        "ALERT: quantity drift, trusting venue"
                    );
                    let quantity = remote.quantity;
                    self.state().with_book_mut(|book| {
                        if let Some(position) = book.get_mut(id) {
                            position.set_quantity(quantity);
                        }
                    });
                    journal_event(
                        self.journal().as_ref(),
                        &JournalEvent::ReconciliationCorrection {
                            symbol: symbol.clone(),
                            detail: format!(
                                "quantity corrected from {local_quantity} to {quantity}"
                            ),
                            at: Utc::now(),
                        },
                    );
                }
            }
        }
    }

    fn liquidate_local(&self, id: PositionId, symbol: &Symbol) {
        warn!(
            position = %id,
            symbol = %symbol,
            "ALERT: venue reports position gone, marking liquidated"
        );
        let mut realized = None;
        let record = self.state().with_book_mut(|book| {
            let position = book.get_mut(id)?;
            if !position.is_open() {
                return None;
            }
            position
                .transition(
                    PositionState::Liquidated,
                    "reconciliation: venue reports position gone",
                )
                .ok()?;
            let mark = position.mark_price();
            position.set_liquidation_loss(mark);
            realized = Some(position.realized_pnl());
            position.history().last().cloned()
        });

        let Some(record) = record else { return };
        if let Some(pnl) = realized {
            self.state().book_realized(pnl);
        }
        journal_event(
            self.journal().as_ref(),
            &JournalEvent::Transition {
                position_id: id,
                symbol: symbol.clone(),
                record,
            },
        );
        journal_event(
            self.journal().as_ref(),
            &JournalEvent::ReconciliationCorrection {
                symbol: symbol.clone(),
                detail: "local open position not found at venue, liquidated".to_string(),
                at: Utc::now(),
            },
        );
        self.risk().cancel_protection(id);
    }

    /// Venue positions with no local counterpart are adopted at venue
    /// size and put under protection.
    fn adopt_venue_only(&self, venue: &[ExchangePosition]) {
        for remote in venue {
            let known = self
                .state()
                .with_book(|book| book.active_for_symbol(&remote.symbol).is_some());
            if known {
                continue;
            }

            warn!(
                symbol = %remote.symbol,
                quantity = %remote.quantity,
                "ALERT: venue position unknown locally, adopting"
            );
            let stop = stop_for(
                remote.side,
                remote.entry_price,
                self.risk().limits().stop_loss_pct,
            );
            let (id, records) = self.state().with_book_mut(|book| {
                let id = book.next_id();
                let mut position = Position::new(
                    id,
                    remote.symbol.clone(),
                    remote.side,
                    remote.quantity,
                    remote.entry_price,
                    stop,
                    None,
                    1,
                );
                let _ = position.transition(
                    PositionState::Opening,
                    "reconciliation: adopting venue position",
                );
                let _ = position.transition(
                    PositionState::Open,
                    "reconciliation: adopting venue position",
                );
                let records = position.history().to_vec();
                book.add(position);
                (id, records)
            });

            for record in records {
                journal_event(
                    self.journal().as_ref(),
                    &JournalEvent::Transition {
                        position_id: id,
                        symbol: remote.symbol.clone(),
                        record,
                    },
                );
            }
            journal_event(
                self.journal().as_ref(),
                &JournalEvent::ReconciliationCorrection {
                    symbol: remote.symbol.clone(),
                    detail: "adopted venue-only position".to_string(),
                    at: Utc::now(),
                },
            );

            let position = self.state().with_book(|book| book.get(id).cloned());
            if let Some(position) = position {
                self.risk().start_protection(&position);
            }
        }
    }
}
