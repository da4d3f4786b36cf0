//! Scriptable in-memory exchange adapter.
//!
//! Behavior is swappable at runtime so a test can walk one adapter through
//! a failure, a cool-down and a successful probe without touching the
//! network. Call counts and an optional in-flight gauge make breaker
//! short-circuiting and concurrency bounds observable.

use crate::error::{EngineError, Result};
use crate::exchange::{Candle, ExchangeClient, ExchangeIdentity, MarketSnapshot, RateLimitClass};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next `fetch_snapshot` call should do.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Respond immediately with the given price.
    Success { price: f64 },
    /// Fail immediately with the given error.
    Fail(EngineError),
    /// Respond with the given price after sleeping `latency`.
    Delay { price: f64, latency: Duration },
}

/// Tracks how many calls are concurrently inside `fetch_snapshot` and the
/// highest level ever observed.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct MockExchange {
    identity: ExchangeIdentity,
    behavior: Mutex<MockBehavior>,
    call_count: AtomicUsize,
    gauge: Option<Arc<InFlightGauge>>,
}

impl MockExchange {
    pub fn new(name: &str, priority: u8, behavior: MockBehavior) -> Self {
        Self {
            identity: ExchangeIdentity::new(
                name,
                "http://mock.invalid",
                priority,
                RateLimitClass::Generous,
            ),
            behavior: Mutex::new(behavior),
            call_count: AtomicUsize::new(0),
            gauge: None,
        }
    }

    pub fn with_gauge(mut self, gauge: Arc<InFlightGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self
            .behavior
            .lock()
            .expect("mock behavior lock poisoned") = behavior;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn snapshot(&self, symbol: &str, price: f64, limit: u32) -> MarketSnapshot {
        let candles = (0..limit.min(5) as i64)
            .map(|i| Candle {
                open_time: i * 3_600_000,
                open: price,
                high: price * 1.01,
                low: price * 0.99,
                close: price,
                volume: 100.0,
            })
            .collect();
        MarketSnapshot {
            exchange: self.identity.name.clone(),
            symbol: symbol.to_string(),
            price,
            change_24h_pct: 0.0,
            volume_24h: 1_000_000.0,
            candles,
            indicators: None,
            fetched_at: Utc::now(),
        }
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn identity(&self) -> &ExchangeIdentity {
        &self.identity
    }

    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let behavior = self
            .behavior
            .lock()
            .expect("mock behavior lock poisoned")
            .clone();
        match behavior {
            MockBehavior::Fail(err) => Err(err),
            _ => Ok(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]),
        }
    }

    async fn fetch_snapshot(
        &self,
        symbol: &str,
        _interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behavior
            .lock()
            .expect("mock behavior lock poisoned")
            .clone();
        match behavior {
            MockBehavior::Success { price } => Ok(self.snapshot(symbol, price, limit)),
            MockBehavior::Fail(err) => Err(err),
            MockBehavior::Delay { price, latency } => {
                if let Some(gauge) = &self.gauge {
                    gauge.enter();
                }
                tokio::time::sleep(latency).await;
                if let Some(gauge) = &self.gauge {
                    gauge.exit();
                }
                Ok(self.snapshot(symbol, price, limit))
            }
        }
    }
}
