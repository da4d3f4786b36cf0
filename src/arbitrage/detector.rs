// src/arbitrage/detector.rs
use crate::arbitrage::{ArbitrageOpportunity, PriceQuote};
use chrono::Utc;
use itertools::Itertools;
use log::{debug, info};
use std::collections::HashMap;
use std::time::Duration;

/// Detects cross-exchange spreads above a configurable threshold.
/// Threshold, freshness window and the optional round-trip fee estimate
/// are configuration, not business constants.
#[derive(Debug, Clone)]
pub struct ArbitrageDetector {
    min_spread_pct: f64,
    freshness_window: Duration,
    round_trip_fee_pct: Option<f64>,
}

impl ArbitrageDetector {
    pub fn new(
        min_spread_pct: f64,
        freshness_window: Duration,
        round_trip_fee_pct: Option<f64>,
    ) -> Self {
        info!(
            "ArbitrageDetector initialized: min spread {:.4}%, freshness window {:?}, round-trip fee {:?}",
            min_spread_pct, freshness_window, round_trip_fee_pct
        );
        Self {
            min_spread_pct,
            freshness_window,
            round_trip_fee_pct,
        }
    }

    pub fn min_spread_pct(&self) -> f64 {
        self.min_spread_pct
    }

    /// Scans all exchange pairs per symbol. Only quote pairs fetched
    /// within the freshness window of each other are compared. Output is
    /// sorted descending by spread; equal spreads fall back to lexical
    /// (buy, sell) exchange order for deterministic results.
    pub fn find_opportunities(&self, quotes: &[PriceQuote]) -> Vec<ArbitrageOpportunity> {
        let mut by_symbol: HashMap<&str, Vec<&PriceQuote>> = HashMap::new();
        for quote in quotes {
            by_symbol.entry(quote.symbol.as_str()).or_default().push(quote);
        }

        let window_ms = self.freshness_window.as_millis() as i64;
        let mut opportunities = Vec::new();

        for (symbol, symbol_quotes) in &by_symbol {
            for (a, b) in symbol_quotes.iter().tuple_combinations() {
                if a.exchange == b.exchange {
                    continue;
                }
                if a.price <= 0.0 || b.price <= 0.0 {
                    debug!("skipping non-positive quote for {} on {}/{}", symbol, a.exchange, b.exchange);
                    continue;
                }
                let skew_ms = (a.fetched_at - b.fetched_at).num_milliseconds().abs();
                if skew_ms > window_ms {
                    debug!(
                        "skipping stale pair for {}: {} vs {} skew {}ms exceeds window {}ms",
                        symbol, a.exchange, b.exchange, skew_ms, window_ms
                    );
                    continue;
                }

                let (buy, sell) = if a.price <= b.price { (a, b) } else { (b, a) };
                let mut spread_pct = (sell.price - buy.price) / buy.price * 100.0;
                if let Some(fee_pct) = self.round_trip_fee_pct {
                    spread_pct -= fee_pct;
                }
                if spread_pct <= self.min_spread_pct {
                    continue;
                }

                opportunities.push(ArbitrageOpportunity {
                    symbol: symbol.to_string(),
                    buy_exchange: buy.exchange.clone(),
                    sell_exchange: sell.exchange.clone(),
                    buy_price: buy.price,
                    sell_price: sell.price,
                    spread_pct,
                    detected_at: Utc::now(),
                });
            }
        }

        opportunities.sort_by(|a, b| {
            b.spread_pct
                .partial_cmp(&a.spread_pct)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.buy_exchange.cmp(&b.buy_exchange))
                .then_with(|| a.sell_exchange.cmp(&b.sell_exchange))
        });

        info!("Found {} arbitrage opportunities across {} symbols", opportunities.len(), by_symbol.len());
        opportunities
    }
}
