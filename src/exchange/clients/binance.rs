// src/exchange/clients/binance.rs
//! Binance spot adapter. Binance is the highest-priority venue; its kline
//! payload is a JSON array of mixed-type rows, its tickers use
//! string-encoded decimals.

use crate::error::{EngineError, Result};
use crate::exchange::http::{get_json, parse_price_field, RequestPacer};
use crate::exchange::{
    Candle, ExchangeClient, ExchangeIdentity, MarketSnapshot, OrderBookDepth, RateLimitClass,
};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use serde::Deserialize;
use serde_json::Value;

const BASE_URL: &str = "https://api.binance.com";
const SUPPORTED_INTERVALS: [&str; 6] = ["1m", "5m", "15m", "1h", "4h", "1d"];

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct Ticker24h {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

pub struct BinanceClient {
    identity: ExchangeIdentity,
    pacer: RequestPacer,
}

impl BinanceClient {
    pub fn new() -> Self {
        Self {
            identity: ExchangeIdentity::new("binance", BASE_URL, 1, RateLimitClass::Generous),
            pacer: RequestPacer::new(RateLimitClass::Generous),
        }
    }

    fn validate_interval(interval: &str) -> Result<&str> {
        if SUPPORTED_INTERVALS.contains(&interval) {
            Ok(interval)
        } else {
            Err(EngineError::InvalidInput(format!(
                "unsupported interval '{}' (expected one of {:?})",
                interval, SUPPORTED_INTERVALS
            )))
        }
    }

    /// Binance kline rows are positional arrays:
    /// [openTime, open, high, low, close, volume, closeTime, ...].
    fn parse_kline_rows(rows: &[Vec<Value>]) -> Result<Vec<Candle>> {
        rows.iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(EngineError::MalformedResponse(format!(
                        "kline row has {} fields, expected at least 6",
                        row.len()
                    )));
                }
                Ok(Candle {
                    open_time: value_as_i64(&row[0], "openTime")?,
                    open: value_as_f64(&row[1], "open")?,
                    high: value_as_f64(&row[2], "high")?,
                    low: value_as_f64(&row[3], "low")?,
                    close: value_as_f64(&row[4], "close")?,
                    volume: value_as_f64(&row[5], "volume")?,
                })
            })
            .collect()
    }
}

fn value_as_f64(value: &Value, field: &str) -> Result<f64> {
    match value {
        Value::String(s) => parse_price_field(s, field),
        Value::Number(n) => n.as_f64().ok_or_else(|| {
            EngineError::MalformedResponse(format!("field '{}' is not a finite number", field))
        }),
        other => Err(EngineError::MalformedResponse(format!(
            "field '{}' has unexpected type: {}",
            field, other
        ))),
    }
}

fn value_as_i64(value: &Value, field: &str) -> Result<i64> {
    value.as_i64().ok_or_else(|| {
        EngineError::MalformedResponse(format!("field '{}' is not an integer", field))
    })
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn identity(&self) -> &ExchangeIdentity {
        &self.identity
    }

    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let info: ExchangeInfo =
            get_json(&self.pacer, BASE_URL, "/api/v3/exchangeInfo").await?;
        Ok(info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| s.symbol)
            .collect())
    }

    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot> {
        let interval = Self::validate_interval(interval)?;

        let ticker: Ticker24h = get_json(
            &self.pacer,
            BASE_URL,
            &format!("/api/v3/ticker/24hr?symbol={}", symbol),
        )
        .await?;

        let rows: Vec<Vec<Value>> = get_json(
            &self.pacer,
            BASE_URL,
            &format!(
                "/api/v3/klines?symbol={}&interval={}&limit={}",
                symbol, interval, limit
            ),
        )
        .await?;
        let candles = Self::parse_kline_rows(&rows)?;
        debug!("binance: {} candles for {} {}", candles.len(), symbol, interval);

        Ok(MarketSnapshot {
            exchange: self.identity.name.clone(),
            symbol: symbol.to_string(),
            price: parse_price_field(&ticker.last_price, "lastPrice")?,
            change_24h_pct: parse_price_field(&ticker.price_change_percent, "priceChangePercent")?,
            volume_24h: parse_price_field(&ticker.quote_volume, "quoteVolume")?,
            candles,
            indicators: None,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_order_book_depth(&self, symbol: &str) -> Result<OrderBookDepth> {
        let depth: DepthResponse = get_json(
            &self.pacer,
            BASE_URL,
            &format!("/api/v3/depth?symbol={}&limit=50", symbol),
        )
        .await?;

        let parse_levels = |levels: Vec<(String, String)>, side: &str| -> Result<Vec<(f64, f64)>> {
            levels
                .into_iter()
                .map(|(price, qty)| {
                    Ok((
                        parse_price_field(&price, side)?,
                        parse_price_field(&qty, side)?,
                    ))
                })
                .collect()
        };

        Ok(OrderBookDepth {
            exchange: self.identity.name.clone(),
            symbol: symbol.to_string(),
            bids: parse_levels(depth.bids, "bid")?,
            asks: parse_levels(depth.asks, "ask")?,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_mixed_type_kline_rows() {
        let raw = r#"[
            [1700000000000, "35000.1", "35100.0", "34900.5", "35050.2", "123.45", 1700003599999],
            [1700003600000, "35050.2", "35200.0", "35000.0", "35150.8", "98.76", 1700007199999]
        ]"#;
        let rows: Vec<Vec<Value>> = serde_json::from_str(raw).unwrap();
        let candles = BinanceClient::parse_kline_rows(&rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 1700000000000);
        assert_eq!(candles[0].close, 35050.2);
        assert_eq!(candles[1].high, 35200.0);
    }

    #[test]
    fn rejects_short_kline_rows() {
        let rows: Vec<Vec<Value>> =
            serde_json::from_str(r#"[[1700000000000, "1.0"]]"#).unwrap();
        let err = BinanceClient::parse_kline_rows(&rows).unwrap_err();
        assert!(matches!(err, EngineError::MalformedResponse(_)));
    }

    #[test]
    fn rejects_unknown_interval() {
        assert!(BinanceClient::validate_interval("2h").is_err());
        assert!(BinanceClient::validate_interval("1h").is_ok());
    }
}
