use std::env;

/// Process configuration, loaded once from the environment at startup and
/// treated as immutable for the process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    // Circuit breaker
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    // Cache
    pub snapshot_cache_ttl_secs: u64,
    pub summary_cache_ttl_secs: u64,
    // Arbitrage
    pub min_spread_pct: f64,
    pub freshness_window_secs: u64,
    pub round_trip_fee_pct: Option<f64>,
    // Fan-out
    pub request_deadline_ms: u64,
    pub per_call_timeout_ms: u64,
    pub max_in_flight: usize,
    // Runner
    pub cycle_interval_secs: u64,
    pub watch_symbols: Vec<String>,
    pub default_interval: String,
    pub candle_limit: u32,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            failure_threshold: env::var("CB_FAILURE_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            cooldown_secs: env::var("CB_COOLDOWN_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            snapshot_cache_ttl_secs: env::var("SNAPSHOT_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            summary_cache_ttl_secs: env::var("SUMMARY_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            min_spread_pct: env::var("ARB_MIN_SPREAD_PCT")
                .unwrap_or_else(|_| "0.3".to_string())
                .parse()
                .unwrap_or(0.3),
            freshness_window_secs: env::var("ARB_FRESHNESS_WINDOW_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),
            round_trip_fee_pct: env::var("ARB_ROUND_TRIP_FEE_PCT")
                .ok()
                .and_then(|v| v.parse().ok()),
            request_deadline_ms: env::var("REQUEST_DEADLINE_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .unwrap_or(3000),
            per_call_timeout_ms: env::var("PER_CALL_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .unwrap_or(2000),
            max_in_flight: env::var("MAX_IN_FLIGHT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()
                .unwrap_or(4),
            cycle_interval_secs: env::var("CYCLE_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            watch_symbols: env::var("WATCH_SYMBOLS")
                .unwrap_or_else(|_| "BTCUSDT,ETHUSDT,SOLUSDT".to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            default_interval: env::var("DEFAULT_INTERVAL").unwrap_or_else(|_| "1h".to_string()),
            candle_limit: env::var("CANDLE_LIMIT")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
        }
    }

    pub fn validate_and_log(&self) {
        log::info!("Engine configuration loaded: {:?}", self);
        if self.per_call_timeout_ms >= self.request_deadline_ms {
            log::warn!(
                "PER_CALL_TIMEOUT_MS ({}) should be shorter than REQUEST_DEADLINE_MS ({}); slow calls will consume the whole deadline",
                self.per_call_timeout_ms,
                self.request_deadline_ms
            );
        }
        if self.failure_threshold == 0 {
            log::error!("CB_FAILURE_THRESHOLD cannot be 0; the breaker would trip on startup");
        }
        if self.max_in_flight == 0 {
            log::error!("MAX_IN_FLIGHT cannot be 0; no fan-out call could ever be dispatched");
        }
        if self.watch_symbols.is_empty() {
            log::warn!("WATCH_SYMBOLS is empty; the scan loop will have nothing to do");
        }
    }
}
