//! Shared test harness: scripted collaborators and a prewired core.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use bulwark::adapter::{JsonlJournal, PaperGateway, SimMarket};
use bulwark::config::{EngineConfig, SimConfig};
use bulwark::domain::{
    Candle, DecisionAction, Indicators, MarketSnapshot, PortfolioSnapshot, Position, PositionId,
    PositionState, Provenance, Side, Symbol, TradingDecision,
};
use bulwark::engine::{AppState, Engine, Ledger};
use bulwark::error::GatewayError;
use bulwark::port::{
    DecisionSource, ExchangePosition, ExecutionGateway, GatewayPolicy, Journal,
    MarketDataProvider, OrderRequest, OrderResult, OrderType,
};
use bulwark::risk::{CircuitBreaker, ProtectionRegistry, RiskLimits, RiskManager};

/// Risk limits with millisecond-scale monitor intervals so protection
/// scenarios resolve quickly under test.
pub fn fast_limits() -> RiskLimits {
    let mut limits = RiskLimits::default();
    limits.layer2_interval = Duration::from_millis(20);
    limits.layer3_interval = Duration::from_millis(15);
    limits
}

/// Engine config with tight deadlines for timeout scenarios.
pub fn fast_engine_config(instruments: &[&str]) -> EngineConfig {
    EngineConfig {
        instruments: instruments.iter().map(|s| (*s).to_string()).collect(),
        cycle_interval_secs: 180,
        data_deadline_ms: 200,
        decision_deadline_ms: 200,
        staleness_bound_secs: 30,
        gateway_retries: 1,
        retry_backoff_ms: 1,
        gateway_deadline_ms: 500,
    }
}

/// Tight gateway deadline and retry budget for tests.
pub fn fast_policy() -> GatewayPolicy {
    GatewayPolicy {
        retries: 1,
        backoff: Duration::from_millis(1),
        deadline: Duration::from_millis(500),
    }
}

/// A prewired core over the sim market and paper gateway.
pub struct Harness {
    pub market: Arc<SimMarket>,
    pub gateway: Arc<PaperGateway>,
    pub journal: Arc<JsonlJournal>,
    pub state: Arc<AppState>,
    pub protection: Arc<ProtectionRegistry>,
    pub risk: Arc<RiskManager>,
    pub limits: RiskLimits,
    _tmp: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limits(fast_limits())
    }

    pub fn with_limits(limits: RiskLimits) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let sim = SimConfig {
            seed: 11,
            initial_balance: dec!(10000),
            volatility: dec!(0.0001),
        };
        let market = Arc::new(SimMarket::new(&sim));
        let gateway = Arc::new(PaperGateway::new(Arc::clone(&market)));
        let journal =
            Arc::new(JsonlJournal::open(tmp.path().join("journal.jsonl")).expect("journal"));
        let state = Arc::new(AppState::new(
            Ledger::starting(sim.initial_balance),
            CircuitBreaker::new(limits.daily_loss_limit, limits.daily_loss_limit_pct),
        ));
        let protection = Arc::new(ProtectionRegistry::new(
            Arc::clone(&state),
            gateway.clone(),
            market.clone(),
            journal.clone(),
            limits.clone(),
            fast_policy(),
        ));
        let risk = Arc::new(RiskManager::new(
            Arc::clone(&state),
            limits.clone(),
            Arc::clone(&protection),
        ));
        Self {
            market,
            gateway,
            journal,
            state,
            protection,
            risk,
            limits,
            _tmp: tmp,
        }
    }

    /// Seed a local Open position with the given stop.
    pub fn seed_local_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        entry: Decimal,
        stop: Decimal,
    ) -> PositionId {
        self.state.with_book_mut(|book| {
            let id = book.next_id();
            let mut position = Position::new(
                id,
                Symbol::from(symbol),
                side,
                quantity,
                entry,
                stop,
                None,
                1,
            );
            position.transition(PositionState::Opening, "test entry").unwrap();
            position.transition(PositionState::Open, "test fill").unwrap();
            book.add(position);
            id
        })
    }

    /// Seed the matching venue-side position at `price`.
    pub async fn seed_venue_position(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Decimal,
    ) {
        let symbol = Symbol::from(symbol);
        self.market.set_price(&symbol, price);
        let order = OrderRequest::market(symbol, side, quantity, 1);
        self.gateway.submit_order(&order).await.expect("venue seed");
    }

    /// Poll until the position reaches `target` or the deadline passes.
    pub async fn wait_for_state(
        &self,
        id: PositionId,
        target: PositionState,
        deadline: Duration,
    ) -> bool {
        let wait = async {
            loop {
                let current = self.state.with_book(|book| book.get(id).map(|p| p.state()));
                if current == Some(target) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(deadline, wait).await.is_ok()
    }
}

/// Build a decision with sane defaults.
pub fn decision(
    symbol: &str,
    action: DecisionAction,
    confidence: Decimal,
    size_fraction: Decimal,
) -> TradingDecision {
    TradingDecision {
        symbol: Symbol::from(symbol),
        action,
        confidence,
        size_fraction,
        leverage: 2,
        stop_loss_pct: None,
        take_profit_pct: None,
        rationale: "scripted".to_string(),
        provenance: Provenance {
            source: "test".to_string(),
            latency_ms: 1,
            cost: None,
        },
        issued_at: Utc::now(),
    }
}

/// Scripted market data: fixed price per symbol, optional per-symbol
/// delays and failures.
#[derive(Default)]
pub struct MockMarket {
    prices: Mutex<HashMap<Symbol, Decimal>>,
    delays: Mutex<HashMap<Symbol, Duration>>,
    failing: Mutex<HashSet<Symbol>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().insert(Symbol::from(symbol), price);
    }

    pub fn delay(&self, symbol: &str, delay: Duration) {
        self.delays.lock().insert(Symbol::from(symbol), delay);
    }

    pub fn fail(&self, symbol: &str) {
        self.failing.lock().insert(Symbol::from(symbol));
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    async fn snapshot(&self, symbol: &Symbol) -> Result<MarketSnapshot, GatewayError> {
        let delay = self.delays.lock().get(symbol).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(symbol) {
            return Err(GatewayError::Unreachable("scripted failure".into()));
        }
        let price = self
            .prices
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or(dec!(100));
        let candles = (0..20)
            .map(|_| Candle {
                open: price,
                high: price,
                low: price,
                close: price,
                volume: dec!(1),
                open_time: Utc::now(),
            })
            .collect();
        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            price,
            candles,
            indicators: Indicators::default(),
            fetched_at: Utc::now(),
        })
    }
}

/// Scripted decision source: one configured decision per symbol, Hold
/// otherwise.
#[derive(Default)]
pub struct ScriptedDecisions {
    scripts: Mutex<HashMap<Symbol, TradingDecision>>,
}

impl ScriptedDecisions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, decision: TradingDecision) {
        self.scripts.lock().insert(decision.symbol.clone(), decision);
    }
}

#[async_trait]
impl DecisionSource for ScriptedDecisions {
    async fn decide(
        &self,
        symbol: &Symbol,
        _market: &MarketSnapshot,
        _portfolio: &PortfolioSnapshot,
    ) -> Result<TradingDecision, GatewayError> {
        Ok(self
            .scripts
            .lock()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| {
                decision(symbol.as_str(), DecisionAction::Hold, dec!(0.5), dec!(0))
            }))
    }
}

/// Recording gateway with scripted fills, for cycle tests where venue
/// semantics do not matter.
#[derive(Default)]
pub struct MockGateway {
    pub fill_prices: Mutex<HashMap<Symbol, Decimal>>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    pub closed: Mutex<Vec<PositionId>>,
    pub venue_positions: Mutex<Vec<ExchangePosition>>,
    pub unreachable: Mutex<bool>,
    pub reject_stops: Mutex<bool>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fill_price(&self, symbol: &str, price: Decimal) {
        self.fill_prices.lock().insert(Symbol::from(symbol), price);
    }

    pub fn set_unreachable(&self, value: bool) {
        *self.unreachable.lock() = value;
    }

    pub fn set_venue_positions(&self, positions: Vec<ExchangePosition>) {
        *self.venue_positions.lock() = positions;
    }

    pub fn stop_orders(&self) -> usize {
        self.submitted
            .lock()
            .iter()
            .filter(|o| o.order_type == OrderType::Stop)
            .count()
    }

    fn check(&self) -> Result<(), GatewayError> {
        if *self.unreachable.lock() {
            return Err(GatewayError::Unreachable("scripted outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn submit_order(&self, request: &OrderRequest) -> Result<OrderResult, GatewayError> {
        self.check()?;
        self.submitted.lock().push(request.clone());
        match request.order_type {
            OrderType::Market => {
                let price = self
                    .fill_prices
                    .lock()
                    .get(&request.symbol)
                    .copied()
                    .unwrap_or(dec!(100));
                Ok(OrderResult::Filled {
                    order_id: format!("mock-{}", self.submitted.lock().len()),
                    fill_price: price,
                })
            }
            OrderType::Stop => {
                if *self.reject_stops.lock() {
                    Ok(OrderResult::Rejected {
                        reason: "stops disabled".to_string(),
                    })
                } else {
                    Ok(OrderResult::StopAccepted {
                        order_id: format!("mock-stop-{}", self.submitted.lock().len()),
                    })
                }
            }
        }
    }

    async fn close_position(
        &self,
        position_id: PositionId,
        symbol: &Symbol,
    ) -> Result<OrderResult, GatewayError> {
        self.check()?;
        self.closed.lock().push(position_id);
        let price = self
            .fill_prices
            .lock()
            .get(symbol)
            .copied()
            .unwrap_or(dec!(100));
        Ok(OrderResult::Closed {
            order_id: format!("mock-close-{}", self.closed.lock().len()),
            exit_price: price,
        })
    }

    async fn list_open_positions(&self) -> Result<Vec<ExchangePosition>, GatewayError> {
        self.check()?;
        Ok(self.venue_positions.lock().clone())
    }
}

/// Journal sink that keeps events in memory.
#[derive(Default)]
pub struct MemoryJournal {
    pub events: Mutex<Vec<bulwark::port::JournalEvent>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl Journal for MemoryJournal {
    fn record(&self, event: &bulwark::port::JournalEvent) -> bulwark::error::Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Wire an engine over scripted collaborators.
pub fn scripted_engine(
    instruments: &[&str],
    limits: RiskLimits,
    market: Arc<MockMarket>,
    decisions: Arc<ScriptedDecisions>,
    gateway: Arc<MockGateway>,
) -> (Engine, Arc<AppState>, Arc<RiskManager>, Arc<MemoryJournal>) {
    let journal = Arc::new(MemoryJournal::new());
    let state = Arc::new(AppState::new(
        Ledger::starting(dec!(10000)),
        CircuitBreaker::new(limits.daily_loss_limit, limits.daily_loss_limit_pct),
    ));
    let protection = Arc::new(ProtectionRegistry::new(
        Arc::clone(&state),
        gateway.clone(),
        market.clone(),
        journal.clone(),
        limits.clone(),
        fast_policy(),
    ));
    let risk = Arc::new(RiskManager::new(
        Arc::clone(&state),
        limits,
        protection,
    ));
    let engine = Engine::new(
        fast_engine_config(instruments),
        Arc::clone(&state),
        Arc::clone(&risk),
        market,
        decisions,
        gateway,
        journal.clone(),
    );
    (engine, state, risk, journal)
}
