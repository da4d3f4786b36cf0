// src/exchange/mod.rs
//! Exchange infrastructure: the canonical market snapshot shape, the
//! `ExchangeClient` trait every adapter implements, and the live adapters.

pub mod clients;
pub mod http;

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Coarse rate-limit class driving the shared HTTP pacer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitClass {
    Strict,
    Standard,
    Generous,
}

impl RateLimitClass {
    /// Minimum delay between two requests to the same exchange.
    pub fn min_request_delay(&self) -> Duration {
        match self {
            RateLimitClass::Strict => Duration::from_millis(500),
            RateLimitClass::Standard => Duration::from_millis(200),
            RateLimitClass::Generous => Duration::from_millis(50),
        }
    }
}

/// Immutable identity of one upstream exchange, built at process start.
/// Lower `priority` wins when merging single-symbol "best price" results.
#[derive(Debug, Clone)]
pub struct ExchangeIdentity {
    pub name: String,
    pub base_url: String,
    pub priority: u8,
    pub rate_limit: RateLimitClass,
}

impl ExchangeIdentity {
    pub fn new(name: &str, base_url: &str, priority: u8, rate_limit: RateLimitClass) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            priority,
            rate_limit,
        }
    }
}

/// One OHLCV bar. `open_time` is epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Canonical market view for one (exchange, symbol, interval) request.
/// Immutable once constructed; exchange-specific fields never leak past
/// the adapter that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub exchange: String,
    pub symbol: String,
    pub price: f64,
    pub change_24h_pct: f64,
    pub volume_24h: f64,
    pub candles: Vec<Candle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indicators: Option<HashMap<String, f64>>,
    pub fetched_at: DateTime<Utc>,
}

/// Aggregated order book levels as (price, quantity) pairs, best first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookDepth {
    pub exchange: String,
    pub symbol: String,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub fetched_at: DateTime<Utc>,
}

/// Opaque indicator computation over OHLCV input, injected by the caller.
/// The engine never interprets the resulting values.
pub type IndicatorFn = Arc<dyn Fn(&[Candle]) -> HashMap<String, f64> + Send + Sync>;

/// The contract every exchange adapter implements. Adapters normalize their
/// exchange's wire format and map transport failures onto the engine error
/// taxonomy; they do not touch circuit breakers themselves (the aggregator's
/// call wrapper reports each outcome exactly once).
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn identity(&self) -> &ExchangeIdentity;

    /// Lists actively trading symbols in canonical form (e.g. "BTCUSDT").
    async fn fetch_symbols(&self) -> Result<Vec<String>>;

    /// Fetches the canonical snapshot for one symbol and interval.
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot>;

    /// Optional capability: aggregated order book depth.
    async fn fetch_order_book_depth(&self, symbol: &str) -> Result<OrderBookDepth> {
        Err(EngineError::Unsupported(format!(
            "{} does not expose order book depth",
            self.identity().name
        )))
    }
}

/// Builds the full set of live adapters with their static identities.
pub fn get_all_clients_arc() -> Vec<Arc<dyn ExchangeClient>> {
    vec![
        Arc::new(clients::binance::BinanceClient::new()),
        Arc::new(clients::kucoin::KucoinClient::new()),
        Arc::new(clients::bybit::BybitClient::new()),
        Arc::new(clients::okx::OkxClient::new()),
    ]
}
