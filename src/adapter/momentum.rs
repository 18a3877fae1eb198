//! Momentum-rule decision source.
//!
//! A deliberately plain signal producer for paper runs: last-N-candle
//! return against entry/exit thresholds. It exercises the same contract
//! an LLM or any other opaque backend would.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use crate::domain::{
    DecisionAction, MarketSnapshot, PortfolioSnapshot, Provenance, Symbol, TradingDecision,
};
use crate::error::GatewayError;
use crate::port::DecisionSource;

const SOURCE_NAME: &str = "momentum-v1";

/// Threshold-based momentum rule.
pub struct MomentumDecisions {
    lookback: usize,
    entry_threshold: Decimal,
    exit_threshold: Decimal,
    size_fraction: Decimal,
    leverage: u32,
}

impl MomentumDecisions {
    /// Create the rule with its thresholds.
    #[must_use]
    pub fn new(
        lookback: usize,
        entry_threshold: Decimal,
        exit_threshold: Decimal,
        size_fraction: Decimal,
        leverage: u32,
    ) -> Self {
        Self {
            lookback,
            entry_threshold,
            exit_threshold,
            size_fraction,
            leverage,
        }
    }

    fn lookback_return(&self, market: &MarketSnapshot) -> Option<Decimal> {
        let candles = &market.candles;
        if candles.len() < self.lookback {
            return None;
        }
        let first = &candles[candles.len() - self.lookback];
        if first.close.is_zero() {
            return None;
        }
        Some((market.price - first.close) / first.close)
    }
}

impl Default for MomentumDecisions {
    fn default() -> Self {
        Self::new(10, dec!(0.004), dec!(0.002), dec!(0.05), 2)
    }
}

#[async_trait]
impl DecisionSource for MomentumDecisions {
    async fn decide(
        &self,
        symbol: &Symbol,
        market: &MarketSnapshot,
        portfolio: &PortfolioSnapshot,
    ) -> Result<TradingDecision, GatewayError> {
        let t0 = Instant::now();

        let momentum = self.lookback_return(market);
        let holding = portfolio.open_for_symbol(symbol).is_some();

        let (action, confidence, rationale) = match momentum {
            None => (
                DecisionAction::Hold,
                dec!(0.5),
                "insufficient history".to_string(),
            ),
            Some(ret) if holding && ret <= -self.exit_threshold => (
                DecisionAction::Exit,
                dec!(0.9),
                format!("momentum reversed: {ret}"),
            ),
            Some(_) if holding => (
                DecisionAction::Hold,
                dec!(0.6),
                "holding through trend".to_string(),
            ),
            Some(ret) if ret >= self.entry_threshold => (
                DecisionAction::EnterLong,
                confidence_for(ret),
                format!("upward momentum: {ret}"),
            ),
            Some(ret) if ret <= -self.entry_threshold => (
                DecisionAction::EnterShort,
                confidence_for(-ret),
                format!("downward momentum: {ret}"),
            ),
            Some(_) => (
                DecisionAction::Hold,
                dec!(0.5),
                "momentum inside band".to_string(),
            ),
        };

        Ok(TradingDecision {
            symbol: symbol.clone(),
            action,
            confidence,
            size_fraction: self.size_fraction,
            leverage: self.leverage,
            stop_loss_pct: None,
            take_profit_pct: None,
            rationale,
            provenance: Provenance {
                source: SOURCE_NAME.to_string(),
                latency_ms: t0.elapsed().as_millis() as u64,
                cost: None,
            },
            issued_at: Utc::now(),
        })
    }
}

/// Confidence rises with momentum strength, clamped under 0.95.
fn confidence_for(ret: Decimal) -> Decimal {
    (dec!(0.6) + ret * dec!(10)).min(dec!(0.95))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, Indicators};

    fn market_with_trend(start: Decimal, end: Decimal, candles: usize) -> MarketSnapshot {
        let step = (end - start) / Decimal::from(candles as i64);
        let candles: Vec<Candle> = (0..candles)
            .map(|i| {
                let close = start + step * Decimal::from(i as i64 + 1);
                Candle {
                    open: close - step,
                    high: close.max(close - step),
                    low: close.min(close - step),
                    close,
                    volume: dec!(1),
                    open_time: Utc::now(),
                }
            })
            .collect();
        MarketSnapshot {
            symbol: Symbol::from("BTC-USD"),
            price: end,
            candles,
            indicators: Indicators::default(),
            fetched_at: Utc::now(),
        }
    }

    fn empty_portfolio() -> PortfolioSnapshot {
        PortfolioSnapshot {
            balance: dec!(10000),
            positions: vec![],
            realized_pnl_today: Decimal::ZERO,
            reference_balance: dec!(10000),
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn strong_uptrend_enters_long() {
        let source = MomentumDecisions::default();
        let market = market_with_trend(dec!(100), dec!(101), 20); // +1%
        let decision = source
            .decide(&Symbol::from("BTC-USD"), &market, &empty_portfolio())
            .await
            .unwrap();
        assert_eq!(decision.action, DecisionAction::EnterLong);
        assert!(decision.confidence >= dec!(0.6));
        assert_eq!(decision.provenance.source, SOURCE_NAME);
    }

    #[tokio::test]
    async fn flat_market_holds() {
        let source = MomentumDecisions::default();
        let market = market_with_trend(dec!(100), dec!(100.01), 20);
        let decision = source
            .decide(&Symbol::from("BTC-USD"), &market, &empty_portfolio())
            .await
            .unwrap();
        assert_eq!(decision.action, DecisionAction::Hold);
    }

    #[tokio::test]
    async fn short_history_holds() {
        let source = MomentumDecisions::default();
        let market = market_with_trend(dec!(100), dec!(105), 3);
        let decision = source
            .decide(&Symbol::from("BTC-USD"), &market, &empty_portfolio())
            .await
            .unwrap();
        assert_eq!(decision.action, DecisionAction::Hold);
    }
}
