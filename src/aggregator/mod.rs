// src/aggregator/mod.rs
//! Fan-out, merge and cache layer. A logical query is dispatched to every
//! exchange whose circuit breaker admits the call, bounded by a semaphore
//! and an overall request deadline, then merged per policy.

use crate::arbitrage::{ArbitrageDetector, ArbitrageOpportunity, PriceQuote};
use crate::cache::{composite_key, TtlCache};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::exchange::{ExchangeClient, IndicatorFn, MarketSnapshot};
use crate::health::{HealthRegistry, HealthSnapshot};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Which exchanges a snapshot query may touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeScope {
    Any,
    Preferred(String),
}

impl ExchangeScope {
    fn cache_part(&self) -> String {
        match self {
            ExchangeScope::Any => "any".to_string(),
            ExchangeScope::Preferred(name) => format!("preferred-{}", name),
        }
    }
}

/// Why an exchange contributed nothing to a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ExclusionReason {
    CircuitOpen,
    Timeout,
    Failed(String),
}

impl ExclusionReason {
    fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::CircuitOpen(_) => ExclusionReason::CircuitOpen,
            EngineError::Timeout(_) => ExclusionReason::Timeout,
            other => ExclusionReason::Failed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeExclusion {
    pub exchange: String,
    pub reason: ExclusionReason,
}

/// Union-merge result for a coverage query. Partial success is not an
/// error; the exclusion list says which exchanges dropped out and why.
#[derive(Debug, Clone, Serialize)]
pub struct ExchangeSummary {
    pub snapshots: Vec<MarketSnapshot>,
    pub contributing_exchanges: Vec<String>,
    pub excluded_exchanges: Vec<ExchangeExclusion>,
    pub total_exchanges: usize,
    pub generated_at: DateTime<Utc>,
}

/// Config-derived tunables the aggregator needs, detached from the full
/// process `Config` so tests can construct them directly.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub request_deadline: Duration,
    pub per_call_timeout: Duration,
    pub max_in_flight: usize,
    pub snapshot_cache_ttl: Duration,
    pub summary_cache_ttl: Duration,
    pub default_symbols: Vec<String>,
    pub default_interval: String,
    pub candle_limit: u32,
}

impl From<&Config> for AggregatorSettings {
    fn from(config: &Config) -> Self {
        AggregatorSettings {
            request_deadline: Duration::from_millis(config.request_deadline_ms),
            per_call_timeout: Duration::from_millis(config.per_call_timeout_ms),
            max_in_flight: config.max_in_flight,
            snapshot_cache_ttl: Duration::from_secs(config.snapshot_cache_ttl_secs),
            summary_cache_ttl: Duration::from_secs(config.summary_cache_ttl_secs),
            default_symbols: config.watch_symbols.clone(),
            default_interval: config.default_interval.clone(),
            candle_limit: config.candle_limit,
        }
    }
}

/// One (exchange, symbol) call result collected during fan-out.
struct CallOutcome {
    exchange: String,
    priority: u8,
    result: Result<MarketSnapshot>,
}

/// The engine facade. Cheap to clone; all shared state lives behind Arcs.
#[derive(Clone)]
pub struct MarketAggregator {
    clients: Vec<Arc<dyn ExchangeClient>>,
    health: Arc<HealthRegistry>,
    snapshot_cache: TtlCache<MarketSnapshot>,
    summary_cache: TtlCache<ExchangeSummary>,
    detector: ArbitrageDetector,
    settings: AggregatorSettings,
    indicator_fn: Option<IndicatorFn>,
}

impl MarketAggregator {
    pub fn new(
        clients: Vec<Arc<dyn ExchangeClient>>,
        health: Arc<HealthRegistry>,
        detector: ArbitrageDetector,
        settings: AggregatorSettings,
    ) -> Self {
        info!(
            "MarketAggregator ready: {} exchanges, deadline {:?}, per-call timeout {:?}, max in-flight {}",
            clients.len(),
            settings.request_deadline,
            settings.per_call_timeout,
            settings.max_in_flight
        );
        Self {
            clients,
            health,
            snapshot_cache: TtlCache::new(),
            summary_cache: TtlCache::new(),
            detector,
            settings,
            indicator_fn: None,
        }
    }

    /// Injects an opaque indicator computation applied to every successful
    /// snapshot's candle series.
    pub fn with_indicator_fn(mut self, indicator_fn: IndicatorFn) -> Self {
        self.indicator_fn = Some(indicator_fn);
        self
    }

    pub fn health_report(&self) -> HashMap<String, HealthSnapshot> {
        self.health.report()
    }

    /// Best-price snapshot for one symbol. Within `Any` scope the winner is
    /// the highest-priority exchange among the successes; `Preferred` pins
    /// the query to a single exchange.
    pub async fn get_snapshot(
        &self,
        symbol: &str,
        interval: Option<&str>,
        scope: ExchangeScope,
    ) -> Result<MarketSnapshot> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(EngineError::InvalidInput("symbol must not be empty".to_string()));
        }
        if let ExchangeScope::Preferred(name) = &scope {
            if !self.clients.iter().any(|c| c.identity().name == *name) {
                return Err(EngineError::InvalidInput(format!(
                    "unknown exchange '{}'",
                    name
                )));
            }
        }
        let interval = interval
            .unwrap_or(&self.settings.default_interval)
            .to_string();
        let key = composite_key("snapshot", &[&symbol, &interval, &scope.cache_part()]);

        let this = self.clone();
        let symbols = vec![symbol];
        self.snapshot_cache
            .get_or_compute(&key, self.settings.snapshot_cache_ttl, move || async move {
                let outcomes = this.dispatch_calls(&symbols, &scope, &interval).await;
                outcomes
                    .into_iter()
                    .filter_map(|outcome| outcome.result.ok().map(|s| (outcome.priority, s)))
                    .min_by_key(|(priority, _)| *priority)
                    .map(|(_, snapshot)| snapshot)
                    .ok_or(EngineError::AllExchangesUnavailable)
            })
            .await
    }

    /// Lists actively trading symbols on one exchange, via its breaker so
    /// a dead venue fails fast.
    pub async fn list_symbols(&self, exchange: &str) -> Result<Vec<String>> {
        let client = self
            .clients
            .iter()
            .find(|c| c.identity().name == exchange)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown exchange '{}'", exchange)))?;
        let breaker = self
            .health
            .breaker(exchange)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown exchange '{}'", exchange)))?;
        let grant = breaker.try_acquire()?;
        match tokio::time::timeout(self.settings.per_call_timeout, client.fetch_symbols()).await {
            Ok(Ok(symbols)) => {
                breaker.record_success(grant);
                Ok(symbols)
            }
            Ok(Err(err)) => {
                breaker.record_failure(grant);
                Err(err)
            }
            Err(_) => {
                breaker.record_failure(grant);
                Err(EngineError::Timeout(format!(
                    "{} symbols listing exceeded per-call timeout",
                    exchange
                )))
            }
        }
    }

    /// Coverage query across all exchanges. Symbols default to the
    /// configured watch list; the result is cached briefly since summary
    /// fan-outs are the expensive path.
    pub async fn get_summary(&self, symbols: Option<&[String]>) -> Result<ExchangeSummary> {
        let mut requested: Vec<String> = symbols
            .map(|s| s.to_vec())
            .unwrap_or_else(|| self.settings.default_symbols.clone())
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        requested.sort();
        requested.dedup();
        if requested.is_empty() {
            return Err(EngineError::InvalidInput(
                "summary requires at least one symbol".to_string(),
            ));
        }

        let key = composite_key(
            "summary",
            &[&requested.join("+"), &self.settings.default_interval, "any"],
        );
        let this = self.clone();
        let symbols_owned = requested;
        self.summary_cache
            .get_or_compute(&key, self.settings.summary_cache_ttl, move || async move {
                this.build_summary(&symbols_owned).await
            })
            .await
    }

    /// Runs a summary fan-out and scans the fresh snapshots for
    /// cross-exchange spreads.
    pub async fn find_arbitrage(
        &self,
        symbols: Option<&[String]>,
    ) -> Result<Vec<ArbitrageOpportunity>> {
        let summary = self.get_summary(symbols).await?;
        let quotes: Vec<PriceQuote> = summary
            .snapshots
            .iter()
            .map(|snapshot| PriceQuote {
                exchange: snapshot.exchange.clone(),
                symbol: snapshot.symbol.clone(),
                price: snapshot.price,
                fetched_at: snapshot.fetched_at,
            })
            .collect();
        Ok(self.detector.find_opportunities(&quotes))
    }

    async fn build_summary(&self, symbols: &[String]) -> Result<ExchangeSummary> {
        let outcomes = self
            .dispatch_calls(symbols, &ExchangeScope::Any, &self.settings.default_interval)
            .await;

        let mut snapshots = Vec::new();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut first_error: HashMap<String, EngineError> = HashMap::new();
        for outcome in outcomes {
            match outcome.result {
                Ok(snapshot) => {
                    succeeded.insert(outcome.exchange);
                    snapshots.push(snapshot);
                }
                Err(err) => {
                    first_error.entry(outcome.exchange).or_insert(err);
                }
            }
        }

        let mut excluded = Vec::new();
        for client in &self.clients {
            let name = &client.identity().name;
            if succeeded.contains(name) {
                continue;
            }
            // No outcome at all means the call was abandoned at the deadline.
            let reason = first_error
                .get(name)
                .map(ExclusionReason::from_error)
                .unwrap_or(ExclusionReason::Timeout);
            excluded.push(ExchangeExclusion {
                exchange: name.clone(),
                reason,
            });
        }
        excluded.sort_by(|a, b| a.exchange.cmp(&b.exchange));

        if snapshots.is_empty() {
            warn!("summary fan-out produced zero successful snapshots");
            return Err(EngineError::AllExchangesUnavailable);
        }

        snapshots.sort_by(|a, b| {
            a.symbol
                .cmp(&b.symbol)
                .then_with(|| a.exchange.cmp(&b.exchange))
        });
        let mut contributing: Vec<String> = succeeded.into_iter().collect();
        contributing.sort();

        info!(
            "summary merged: {} snapshots from {}/{} exchanges",
            snapshots.len(),
            contributing.len(),
            self.clients.len()
        );

        Ok(ExchangeSummary {
            snapshots,
            contributing_exchanges: contributing,
            excluded_exchanges: excluded,
            total_exchanges: self.clients.len(),
            generated_at: Utc::now(),
        })
    }

    /// The fan-out core. OPEN breakers are excluded before any task is
    /// spawned; HALF_OPEN admits exactly the breaker's single probe. Each
    /// spawned call records its own breaker outcome before reporting, so a
    /// call abandoned at the deadline still updates health state when it
    /// eventually finishes.
    async fn dispatch_calls(
        &self,
        symbols: &[String],
        scope: &ExchangeScope,
        interval: &str,
    ) -> Vec<CallOutcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_in_flight));
        let mut outcomes = Vec::new();
        let mut expected = 0usize;

        for client in &self.clients {
            let identity = client.identity().clone();
            if let ExchangeScope::Preferred(name) = scope {
                if identity.name != *name {
                    continue;
                }
            }
            let breaker = match self.health.breaker(&identity.name) {
                Some(breaker) => breaker,
                None => {
                    warn!("no circuit breaker registered for {}, skipping", identity.name);
                    continue;
                }
            };

            for symbol in symbols {
                let grant = match breaker.try_acquire() {
                    Ok(grant) => grant,
                    Err(err) => {
                        debug!("{} excluded from fan-out for {}: {}", identity.name, symbol, err);
                        outcomes.push(CallOutcome {
                            exchange: identity.name.clone(),
                            priority: identity.priority,
                            result: Err(err),
                        });
                        continue;
                    }
                };

                expected += 1;
                let client = Arc::clone(client);
                let breaker = Arc::clone(&breaker);
                let tx = tx.clone();
                let semaphore = Arc::clone(&semaphore);
                let symbol = symbol.clone();
                let interval = interval.to_string();
                let limit = self.settings.candle_limit;
                let per_call_timeout = self.settings.per_call_timeout;
                let indicator_fn = self.indicator_fn.clone();
                let exchange = identity.name.clone();
                let priority = identity.priority;

                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("fan-out semaphore closed");
                    let call = client.fetch_snapshot(&symbol, &interval, limit);
                    let result = match tokio::time::timeout(per_call_timeout, call).await {
                        Ok(Ok(mut snapshot)) => {
                            breaker.record_success(grant);
                            if let Some(indicator) = &indicator_fn {
                                snapshot.indicators = Some(indicator(&snapshot.candles));
                            }
                            Ok(snapshot)
                        }
                        Ok(Err(err)) => {
                            breaker.record_failure(grant);
                            Err(err)
                        }
                        Err(_) => {
                            breaker.record_failure(grant);
                            Err(EngineError::Timeout(format!(
                                "{} call for {} exceeded per-call timeout",
                                exchange, symbol
                            )))
                        }
                    };
                    // The receiver is gone once the deadline fires; the
                    // breaker was already updated above either way.
                    let _ = tx.send(CallOutcome {
                        exchange,
                        priority,
                        result,
                    });
                });
            }
        }
        drop(tx);

        let deadline = tokio::time::sleep(self.settings.request_deadline);
        tokio::pin!(deadline);
        let mut received = 0usize;
        while received < expected {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(outcome) => {
                        received += 1;
                        outcomes.push(outcome);
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        "request deadline elapsed with {}/{} calls outstanding",
                        expected - received,
                        expected
                    );
                    break;
                }
            }
        }
        outcomes
    }
}
