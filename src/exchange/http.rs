//! Shared async HTTP plumbing for exchange adapters: one pooled client,
//! per-exchange request pacing, and uniform status-to-error mapping.

use crate::error::{EngineError, Result};
use crate::exchange::RateLimitClass;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::sleep;
use url::Url;

const MAX_CONCURRENT_PER_EXCHANGE: usize = 4;

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent("exchange-aggregator/0.1")
        .build()
        .expect("failed to build shared HTTP client")
});

/// Paces requests to one exchange: bounded concurrency plus a minimum
/// inter-request delay derived from the exchange's rate-limit class.
pub struct RequestPacer {
    min_delay: Duration,
    semaphore: Semaphore,
    last_request: Mutex<Instant>,
}

impl RequestPacer {
    pub fn new(class: RateLimitClass) -> Self {
        Self {
            min_delay: class.min_request_delay(),
            semaphore: Semaphore::new(MAX_CONCURRENT_PER_EXCHANGE),
            last_request: Mutex::new(Instant::now() - class.min_request_delay()),
        }
    }
}

/// Performs a paced GET and deserializes the JSON body, mapping HTTP
/// failures onto the engine taxonomy: 429 is `RateLimited`, 5xx and other
/// non-success statuses are `RemoteUnavailable`, undecodable bodies are
/// `MalformedResponse`.
pub async fn get_json<T: DeserializeOwned>(
    pacer: &RequestPacer,
    base_url: &str,
    path_and_query: &str,
) -> Result<T> {
    let url = Url::parse(base_url)
        .and_then(|base| base.join(path_and_query))
        .map_err(|e| {
            EngineError::InvalidInput(format!(
                "bad request URL '{}{}': {}",
                base_url, path_and_query, e
            ))
        })?;

    let _permit = pacer
        .semaphore
        .acquire()
        .await
        .expect("request pacer semaphore closed");

    // Enforce the minimum delay between requests to this exchange.
    {
        let mut last = pacer.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < pacer.min_delay {
            sleep(pacer.min_delay - elapsed).await;
        }
        *last = Instant::now();
    }

    let response = HTTP_CLIENT.get(url.clone()).send().await?;
    let status = response.status();

    if status.as_u16() == 429 {
        return Err(EngineError::RateLimited(format!("{} returned 429", url)));
    }
    if !status.is_success() {
        return Err(EngineError::RemoteUnavailable(format!(
            "{} returned {}",
            url, status
        )));
    }

    let body = response.text().await?;
    serde_json::from_str::<T>(&body).map_err(|e| {
        EngineError::MalformedResponse(format!("{}: {} (body prefix: {:.120})", url, e, body))
    })
}

/// Parses a string-encoded decimal field, the dominant number encoding in
/// exchange REST payloads.
pub fn parse_price_field(raw: &str, field: &str) -> Result<f64> {
    raw.trim().parse::<f64>().map_err(|e| {
        EngineError::MalformedResponse(format!("field '{}' is not a number ('{}'): {}", field, raw, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_price_field_accepts_exchange_decimals() {
        assert_eq!(parse_price_field("65123.40000000", "lastPrice").unwrap(), 65123.4);
        assert!(parse_price_field("n/a", "lastPrice").is_err());
    }
}
