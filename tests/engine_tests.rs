//! Engine run-loop behavior: startup, first cycle, shutdown.

mod support;

use std::sync::Arc;

use bulwark::port::JournalEvent;
use rust_decimal_macros::dec;
use support::{fast_limits, scripted_engine, MockGateway, MockMarket, ScriptedDecisions};
use tokio::sync::watch;

#[tokio::test]
async fn run_executes_a_cycle_then_shuts_down_cleanly() {
    let market = Arc::new(MockMarket::new());
    let decisions = Arc::new(ScriptedDecisions::new());
    let gateway = Arc::new(MockGateway::new());
    let (engine, _state, _risk, journal) = scripted_engine(
        &["BTC-USD"],
        fast_limits(),
        Arc::clone(&market),
        Arc::clone(&decisions),
        Arc::clone(&gateway),
    );
    market.set_price("BTC-USD", dec!(50000));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(engine.run(shutdown_rx));

    // The first interval tick fires immediately; give the cycle a moment.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
        .await
        .expect("engine must stop on shutdown signal")
        .expect("join");
    assert!(result.is_ok());

    let events = journal.events.lock().clone();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, JournalEvent::CycleCompleted { .. })),
        "the first cycle must have been journaled"
    );
    assert!(
        events
            .iter()
            .any(|e| matches!(e, JournalEvent::LedgerCheckpoint { .. })),
        "a ledger checkpoint follows every cycle"
    );
}

#[tokio::test]
async fn engine_refuses_to_run_without_instruments() {
    let market = Arc::new(MockMarket::new());
    let decisions = Arc::new(ScriptedDecisions::new());
    let gateway = Arc::new(MockGateway::new());
    let (engine, _state, _risk, _journal) = scripted_engine(
        &[],
        fast_limits(),
        market,
        decisions,
        gateway,
    );

    let (_tx, rx) = watch::channel(false);
    assert!(engine.run(rx).await.is_err());
}
