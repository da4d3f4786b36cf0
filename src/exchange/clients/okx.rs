// src/exchange/clients/okx.rs
//! OKX v5 adapter. OKX uses dashed instrument ids ("BTC-USDT"), a
//! `{code, msg, data}` envelope, and does not report a 24h change
//! directly, so the adapter derives it from `last` and `open24h`.

use crate::error::{EngineError, Result};
use crate::exchange::clients::split_symbol;
use crate::exchange::http::{get_json, parse_price_field, RequestPacer};
use crate::exchange::{
    Candle, ExchangeClient, ExchangeIdentity, MarketSnapshot, RateLimitClass,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

const BASE_URL: &str = "https://www.okx.com";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    msg: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T> {
        if self.code != "0" {
            return Err(EngineError::RemoteUnavailable(format!(
                "okx returned code {}: {}",
                self.code, self.msg
            )));
        }
        self.data.ok_or_else(|| {
            EngineError::MalformedResponse("okx envelope missing data field".to_string())
        })
    }
}

#[derive(Debug, Deserialize)]
struct Instrument {
    #[serde(rename = "instId")]
    inst_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    last: String,
    #[serde(rename = "open24h")]
    open_24h: String,
    #[serde(rename = "volCcy24h")]
    vol_ccy_24h: String,
}

pub struct OkxClient {
    identity: ExchangeIdentity,
    pacer: RequestPacer,
}

impl OkxClient {
    pub fn new() -> Self {
        Self {
            identity: ExchangeIdentity::new("okx", BASE_URL, 4, RateLimitClass::Standard),
            pacer: RequestPacer::new(RateLimitClass::Standard),
        }
    }

    fn map_interval(interval: &str) -> Result<&'static str> {
        match interval {
            "1m" => Ok("1m"),
            "5m" => Ok("5m"),
            "15m" => Ok("15m"),
            "1h" => Ok("1H"),
            "4h" => Ok("4H"),
            "1d" => Ok("1D"),
            other => Err(EngineError::InvalidInput(format!(
                "unsupported interval '{}' for okx",
                other
            ))),
        }
    }

    fn inst_id(symbol: &str) -> Result<String> {
        let (base, quote) = split_symbol(symbol)?;
        Ok(format!("{}-{}", base, quote))
    }

    /// OKX candle rows are [ts(ms), open, high, low, close, vol, ...],
    /// newest first.
    fn parse_candle_rows(rows: &[Vec<String>]) -> Result<Vec<Candle>> {
        let mut candles: Vec<Candle> = rows
            .iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(EngineError::MalformedResponse(format!(
                        "okx candle row has {} fields, expected at least 6",
                        row.len()
                    )));
                }
                Ok(Candle {
                    open_time: row[0].trim().parse::<i64>().map_err(|e| {
                        EngineError::MalformedResponse(format!(
                            "okx candle ts '{}' is not an integer: {}",
                            row[0], e
                        ))
                    })?,
                    open: parse_price_field(&row[1], "open")?,
                    high: parse_price_field(&row[2], "high")?,
                    low: parse_price_field(&row[3], "low")?,
                    close: parse_price_field(&row[4], "close")?,
                    volume: parse_price_field(&row[5], "vol")?,
                })
            })
            .collect::<Result<_>>()?;
        candles.reverse();
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeClient for OkxClient {
    fn identity(&self) -> &ExchangeIdentity {
        &self.identity
    }

    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let envelope: Envelope<Vec<Instrument>> = get_json(
            &self.pacer,
            BASE_URL,
            "/api/v5/public/instruments?instType=SPOT",
        )
        .await?;
        Ok(envelope
            .into_data()?
            .into_iter()
            .filter(|i| i.state == "live")
            .map(|i| i.inst_id.replace('-', ""))
            .collect())
    }

    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot> {
        let okx_interval = Self::map_interval(interval)?;
        let inst_id = Self::inst_id(symbol)?;

        let tickers: Envelope<Vec<Ticker>> = get_json(
            &self.pacer,
            BASE_URL,
            &format!("/api/v5/market/ticker?instId={}", inst_id),
        )
        .await?;
        let ticker = tickers.into_data()?.into_iter().next().ok_or_else(|| {
            EngineError::MalformedResponse(format!("okx returned no ticker for {}", inst_id))
        })?;

        let candles: Envelope<Vec<Vec<String>>> = get_json(
            &self.pacer,
            BASE_URL,
            &format!(
                "/api/v5/market/candles?instId={}&bar={}&limit={}",
                inst_id, okx_interval, limit
            ),
        )
        .await?;
        let candles = Self::parse_candle_rows(&candles.into_data()?)?;

        let last = parse_price_field(&ticker.last, "last")?;
        let open_24h = parse_price_field(&ticker.open_24h, "open24h")?;
        let change_24h_pct = if open_24h > 0.0 {
            (last - open_24h) / open_24h * 100.0
        } else {
            0.0
        };

        Ok(MarketSnapshot {
            exchange: self.identity.name.clone(),
            symbol: symbol.to_string(),
            price: last,
            change_24h_pct,
            volume_24h: parse_price_field(&ticker.vol_ccy_24h, "volCcy24h")?,
            candles,
            indicators: None,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn derives_change_pct_from_open_24h() {
        let last = 101.0_f64;
        let open = 100.0_f64;
        assert_approx_eq!((last - open) / open * 100.0, 1.0, 1e-9);
    }

    #[test]
    fn candle_rows_are_reversed_to_oldest_first() {
        let rows = vec![
            vec![
                "1700003600000".to_string(),
                "35050.2".to_string(),
                "35200.0".to_string(),
                "35000.0".to_string(),
                "35150.8".to_string(),
                "98.76".to_string(),
            ],
            vec![
                "1700000000000".to_string(),
                "35000.1".to_string(),
                "35100.0".to_string(),
                "34900.5".to_string(),
                "35050.2".to_string(),
                "123.45".to_string(),
            ],
        ];
        let candles = OkxClient::parse_candle_rows(&rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time < candles[1].open_time);
    }

    #[test]
    fn inst_id_mapping() {
        assert_eq!(OkxClient::inst_id("BTCUSDT").unwrap(), "BTC-USDT");
        assert!(OkxClient::inst_id("junk").is_err());
    }
}
