//! Deterministic random-walk market data for paper trading and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::SimConfig;
use crate::domain::{Candle, Indicators, MarketSnapshot, Symbol};
use crate::error::GatewayError;
use crate::port::MarketDataProvider;

const CANDLE_HISTORY: usize = 50;

struct Walk {
    price: Decimal,
    candles: Vec<Candle>,
}

/// Seeded price walk, one track per symbol. Every snapshot call advances
/// the walk one step; the same seed replays the same prices.
pub struct SimMarket {
    inner: Mutex<SimInner>,
    max_step_bps: i64,
}

struct SimInner {
    rng: StdRng,
    walks: HashMap<Symbol, Walk>,
}

impl SimMarket {
    /// Create a market from sim settings.
    #[must_use]
    pub fn new(config: &SimConfig) -> Self {
        let max_step_bps = (config.volatility * dec!(10000)).to_i64().unwrap_or(30).max(1);
        Self {
            inner: Mutex::new(SimInner {
                rng: StdRng::seed_from_u64(config.seed),
                walks: HashMap::new(),
            }),
            max_step_bps,
        }
    }

    /// Current price without advancing the walk. Unknown symbols start at
    /// the base price on first touch.
    #[must_use]
    pub fn peek_price(&self, symbol: &Symbol) -> Decimal {
        let mut inner = self.inner.lock();
        inner
            .walks
            .entry(symbol.clone())
            .or_insert_with(|| Walk {
                price: base_price(symbol),
                candles: Vec::new(),
            })
            .price
    }

    /// Force the price of a symbol, for scripted scenarios.
    pub fn set_price(&self, symbol: &Symbol, price: Decimal) {
        let mut inner = self.inner.lock();
        let walk = inner.walks.entry(symbol.clone()).or_insert_with(|| Walk {
            price,
            candles: Vec::new(),
        });
        walk.price = price;
    }

    fn step(&self, symbol: &Symbol) -> (Decimal, Vec<Candle>) {
        let mut inner = self.inner.lock();
        let bps = inner.rng.gen_range(-self.max_step_bps..=self.max_step_bps);
        let walk = inner.walks.entry(symbol.clone()).or_insert_with(|| Walk {
            price: base_price(symbol),
            candles: Vec::new(),
        });

        let open = walk.price;
        walk.price = open * (Decimal::ONE + Decimal::new(bps, 4));
        let close = walk.price;
        walk.candles.push(Candle {
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume: dec!(1),
            open_time: Utc::now(),
        });
        if walk.candles.len() > CANDLE_HISTORY {
            walk.candles.remove(0);
        }
        (walk.price, walk.candles.clone())
    }
}

/// Deterministic, symbol-derived starting price so multi-instrument runs
/// do not all walk the same track.
fn base_price(symbol: &Symbol) -> Decimal {
    let sum: u32 = symbol.as_str().bytes().map(u32::from).sum();
    Decimal::from(1000 + (sum % 900) * 100)
}

#[async_trait]
impl MarketDataProvider for SimMarket {
    async fn snapshot(&self, symbol: &Symbol) -> Result<MarketSnapshot, GatewayError> {
        let (price, candles) = self.step(symbol);
        let mut indicators = Indicators::default();
        if let Some(first) = candles.first() {
            if !first.close.is_zero() {
                let momentum = (price - first.close) / first.close;
                indicators
                    .values
                    .insert("momentum".to_string(), momentum);
            }
        }
        Ok(MarketSnapshot {
            symbol: symbol.clone(),
            price,
            candles,
            indicators,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(seed: u64) -> SimConfig {
        SimConfig {
            seed,
            initial_balance: dec!(10000),
            volatility: dec!(0.003),
        }
    }

    #[tokio::test]
    async fn same_seed_replays_same_walk() {
        let a = SimMarket::new(&config(42));
        let b = SimMarket::new(&config(42));
        let symbol = Symbol::from("BTC-USD");

        for _ in 0..10 {
            let pa = a.snapshot(&symbol).await.unwrap().price;
            let pb = b.snapshot(&symbol).await.unwrap().price;
            assert_eq!(pa, pb);
        }
    }

    #[tokio::test]
    async fn candle_history_is_bounded() {
        let market = SimMarket::new(&config(1));
        let symbol = Symbol::from("ETH-USD");
        for _ in 0..(CANDLE_HISTORY + 20) {
            market.snapshot(&symbol).await.unwrap();
        }
        let snap = market.snapshot(&symbol).await.unwrap();
        assert_eq!(snap.candles.len(), CANDLE_HISTORY);
    }

    #[tokio::test]
    async fn set_price_overrides_walk() {
        let market = SimMarket::new(&config(1));
        let symbol = Symbol::from("BTC-USD");
        market.set_price(&symbol, dec!(50000));
        // One step of at most 30bps stays near the forced price.
        let snap = market.snapshot(&symbol).await.unwrap();
        assert!(snap.price > dec!(49000) && snap.price < dec!(51000));
    }
}
