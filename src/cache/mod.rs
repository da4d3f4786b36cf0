// src/cache/mod.rs
//! In-memory TTL cache with single-flight de-duplication.
//!
//! `get_or_compute` guarantees at most one concurrent computation per key:
//! callers that miss while a computation is in flight attach to a shared
//! future and receive the identical result (or identical failure).
//! Failures are propagated to every waiter and never cached.

use crate::error::Result;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::debug;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type SharedComputation<T> = Shared<BoxFuture<'static, Result<T>>>;

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

struct CacheShared<T> {
    entries: DashMap<String, CacheEntry<T>>,
    in_flight: Mutex<HashMap<String, SharedComputation<T>>>,
}

/// Cloneable handle to one cache instance. No eviction beyond TTL: the key
/// space is bounded by symbol x interval x exchange-scope combinations.
pub struct TtlCache<T: Clone + Send + Sync + 'static> {
    inner: Arc<CacheShared<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for TtlCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> TtlCache<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheShared {
                entries: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the cached value unless the entry has outlived its TTL.
    /// Expired entries are dropped on sight so the map stays bounded.
    pub fn get(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.inner.entries.get(key) {
            if entry.is_fresh() {
                return Some(entry.value.clone());
            }
        }
        self.inner.entries.remove_if(key, |_, entry| !entry.is_fresh());
        None
    }

    /// Replaces the entry for `key` wholesale.
    pub fn insert(&self, key: &str, value: T, ttl: Duration) {
        self.inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Single-flight read-through. A miss with no in-flight computation
    /// invokes `compute` exactly once; a miss with one in flight attaches
    /// to it. The successful value is cached for `ttl`; failures are
    /// returned to all waiters and cached never.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        if let Some(value) = self.get(key) {
            debug!("cache HIT for key {}", key);
            return Ok(value);
        }

        let computation = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .expect("cache in-flight lock poisoned");

            // Re-check under the lock: a computation may have completed
            // between the miss above and acquiring the lock.
            if let Some(entry) = self.inner.entries.get(key) {
                if entry.is_fresh() {
                    return Ok(entry.value.clone());
                }
            }

            if let Some(existing) = in_flight.get(key) {
                debug!("cache MISS for key {}, attaching to in-flight computation", key);
                existing.clone()
            } else {
                debug!("cache MISS for key {}, starting computation", key);
                let inner = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                let fut = compute();
                let computation: SharedComputation<T> = async move {
                    let result = fut.await;
                    if let Ok(value) = &result {
                        inner.entries.insert(
                            owned_key.clone(),
                            CacheEntry {
                                value: value.clone(),
                                inserted_at: Instant::now(),
                                ttl,
                            },
                        );
                    }
                    inner
                        .in_flight
                        .lock()
                        .expect("cache in-flight lock poisoned")
                        .remove(&owned_key);
                    result
                }
                .boxed()
                .shared();
                in_flight.insert(key.to_string(), computation.clone());
                computation
            }
        };

        computation.await
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic composite cache key: `prefix:part[:part...]`.
pub fn composite_key(prefix: &str, parts: &[&str]) -> String {
    let mut key = prefix.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn composite_key_is_deterministic() {
        assert_eq!(
            composite_key("snapshot", &["BTCUSDT", "1h", "any"]),
            "snapshot:BTCUSDT:1h:any"
        );
        assert_eq!(composite_key("health", &[]), "health");
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache: TtlCache<u32> = TtlCache::new();
        cache.insert("k", 7, Duration::from_millis(50));
        assert_eq!(cache.get("k"), Some(7));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_or_compute_runs_once() {
        let cache: TtlCache<u64> = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42_u64)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failures_propagate_to_all_waiters_and_are_not_cached() {
        let cache: TtlCache<u64> = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("failing", Duration::from_secs(60), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err::<u64, _>(EngineError::RemoteUnavailable("down".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(EngineError::RemoteUnavailable(_))));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        // A later call recomputes because nothing was cached.
        let calls2 = Arc::clone(&calls);
        let value = cache
            .get_or_compute("failing", Duration::from_secs(60), move || async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(9_u64)
            })
            .await
            .unwrap();
        assert_eq!(value, 9);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entry_triggers_recompute() {
        let cache: TtlCache<u64> = TtlCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |cache: TtlCache<u64>, calls: Arc<AtomicUsize>| async move {
            cache
                .get_or_compute("k", Duration::from_millis(40), move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u64 + 1)
                })
                .await
                .unwrap()
        };

        assert_eq!(fetch(cache.clone(), Arc::clone(&calls)).await, 1);
        // Fresh entry: served from cache, no recompute.
        assert_eq!(fetch(cache.clone(), Arc::clone(&calls)).await, 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Past TTL: treated as a miss.
        assert_eq!(fetch(cache.clone(), Arc::clone(&calls)).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
