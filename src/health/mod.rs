// src/health/mod.rs
//! Per-exchange circuit breakers and the registry that owns them.
//!
//! Each breaker is a three-state machine: CLOSED passes calls through and
//! counts consecutive failures; OPEN short-circuits until a cool-down
//! elapses; HALF_OPEN admits exactly one probe. The breaker itself
//! enforces the single-probe rule so the aggregator never has to.

use crate::error::{EngineError, Result};
use crate::exchange::ExchangeIdentity;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Admission token issued by [`CircuitBreaker::try_acquire`]. Outcomes are
/// recorded against the grant that admitted the call, so a straggler
/// admitted while CLOSED can never stand in for the HALF_OPEN probe: only
/// a probe grant's outcome moves the state machine out of HALF_OPEN.
#[derive(Debug, Clone, Copy)]
pub struct CallGrant {
    probe: bool,
}

impl CallGrant {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Read-only view of one breaker, rendered into health reports.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    last_failure_at: Option<DateTime<Utc>>,
    last_transition_at: DateTime<Utc>,
}

/// Circuit breaker for one exchange. All mutation happens inside a short
/// mutex-guarded critical section; the lock is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    exchange: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(exchange: &str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            exchange: exchange.to_string(),
            failure_threshold,
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                last_failure_at: None,
                last_transition_at: Utc::now(),
            }),
        }
    }

    /// Admission check, called once before dispatching a call. While OPEN
    /// the call is rejected without touching the network; once the
    /// cool-down has elapsed the breaker moves to HALF_OPEN and admits the
    /// caller as its single probe. The returned grant marks whether this
    /// call is that probe.
    pub fn try_acquire(&self) -> Result<CallGrant> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => Ok(CallGrant { probe: false }),
            CircuitState::Open => {
                let cooled_down = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.cooldown)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    inner.last_transition_at = Utc::now();
                    info!(
                        "breaker[{}]: cool-down elapsed, HALF_OPEN probe admitted",
                        self.exchange
                    );
                    Ok(CallGrant { probe: true })
                } else {
                    Err(EngineError::CircuitOpen(self.exchange.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(EngineError::CircuitOpen(self.exchange.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallGrant { probe: true })
                }
            }
        }
    }

    pub fn record_success(&self, grant: CallGrant) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                if grant.probe {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.probe_in_flight = false;
                    inner.opened_at = None;
                    inner.last_transition_at = Utc::now();
                    info!("breaker[{}]: probe succeeded, CLOSED", self.exchange);
                } else {
                    // A straggler admitted before the trip; the probe's
                    // outcome is still pending and decides the state.
                    debug!(
                        "breaker[{}]: straggler success while HALF_OPEN, ignored for state",
                        self.exchange
                    );
                }
            }
            CircuitState::Open => {
                // Late completion of an abandoned call; it cannot close an
                // open breaker but the counter reading stays honest.
                debug!(
                    "breaker[{}]: late success while OPEN, ignored for state",
                    self.exchange
                );
            }
        }
    }

    pub fn record_failure(&self, grant: CallGrant) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.last_failure_at = Some(Utc::now());
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.last_transition_at = Utc::now();
                    warn!(
                        "breaker[{}]: OPENED after {} consecutive failures",
                        self.exchange, inner.consecutive_failures
                    );
                } else {
                    debug!(
                        "breaker[{}]: failure recorded ({}/{})",
                        self.exchange, inner.consecutive_failures, self.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                if grant.probe {
                    inner.state = CircuitState::Open;
                    inner.probe_in_flight = false;
                    inner.opened_at = Some(Instant::now());
                    inner.last_transition_at = Utc::now();
                    warn!(
                        "breaker[{}]: probe failed, back to OPEN with fresh cool-down",
                        self.exchange
                    );
                } else {
                    debug!(
                        "breaker[{}]: straggler failure while HALF_OPEN, probe still pending",
                        self.exchange
                    );
                }
            }
            CircuitState::Open => {
                debug!(
                    "breaker[{}]: late failure while OPEN, cool-down unchanged",
                    self.exchange
                );
            }
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        HealthSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
            last_transition_at: inner.last_transition_at,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }
}

/// Owns one breaker per registered exchange. Constructed once, injected
/// into the aggregator; tests instantiate isolated registries per scenario.
pub struct HealthRegistry {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl HealthRegistry {
    pub fn new(identities: &[ExchangeIdentity], failure_threshold: u32, cooldown: Duration) -> Self {
        let breakers = identities
            .iter()
            .map(|id| {
                (
                    id.name.clone(),
                    Arc::new(CircuitBreaker::new(&id.name, failure_threshold, cooldown)),
                )
            })
            .collect();
        Self { breakers }
    }

    pub fn breaker(&self, exchange: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(exchange).cloned()
    }

    pub fn report(&self) -> HashMap<String, HealthSnapshot> {
        self.breakers
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.snapshot()))
            .collect()
    }
}
