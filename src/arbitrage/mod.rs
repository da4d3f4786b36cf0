// src/arbitrage/mod.rs
//! Cross-exchange spread detection over merged snapshot sets.

pub mod detector;

pub use detector::ArbitrageDetector;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One tradable spread between two exchanges. Derived and ephemeral,
/// recomputed per request and never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ArbitrageOpportunity {
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_pct: f64,
    pub detected_at: DateTime<Utc>,
}

/// Minimal per-exchange quote the detector consumes, tagged with its
/// fetch timestamp so stale quotes are never compared against fresh ones.
#[derive(Debug, Clone)]
pub struct PriceQuote {
    pub exchange: String,
    pub symbol: String,
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}
