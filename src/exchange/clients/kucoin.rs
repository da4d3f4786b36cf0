// src/exchange/clients/kucoin.rs
//! KuCoin spot adapter. KuCoin wraps every payload in a `{code, data}`
//! envelope, uses dashed symbols ("BTC-USDT"), fractional 24h change
//! rates, and returns candles newest-first as all-string rows.

use crate::error::{EngineError, Result};
use crate::exchange::clients::split_symbol;
use crate::exchange::http::{get_json, parse_price_field, RequestPacer};
use crate::exchange::{
    Candle, ExchangeClient, ExchangeIdentity, MarketSnapshot, RateLimitClass,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

const BASE_URL: &str = "https://api.kucoin.com";
const OK_CODE: &str = "200000";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T> {
        if self.code != OK_CODE {
            return Err(EngineError::RemoteUnavailable(format!(
                "kucoin returned code {}",
                self.code
            )));
        }
        self.data.ok_or_else(|| {
            EngineError::MalformedResponse("kucoin envelope missing data field".to_string())
        })
    }
}

#[derive(Debug, Deserialize)]
struct KucoinSymbol {
    symbol: String,
    #[serde(rename = "enableTrading")]
    enable_trading: bool,
}

#[derive(Debug, Deserialize)]
struct MarketStats {
    last: Option<String>,
    #[serde(rename = "changeRate")]
    change_rate: Option<String>,
    #[serde(rename = "volValue")]
    vol_value: Option<String>,
}

pub struct KucoinClient {
    identity: ExchangeIdentity,
    pacer: RequestPacer,
}

impl KucoinClient {
    pub fn new() -> Self {
        Self {
            identity: ExchangeIdentity::new("kucoin", BASE_URL, 2, RateLimitClass::Strict),
            pacer: RequestPacer::new(RateLimitClass::Strict),
        }
    }

    fn map_interval(interval: &str) -> Result<&'static str> {
        match interval {
            "1m" => Ok("1min"),
            "5m" => Ok("5min"),
            "15m" => Ok("15min"),
            "1h" => Ok("1hour"),
            "4h" => Ok("4hour"),
            "1d" => Ok("1day"),
            other => Err(EngineError::InvalidInput(format!(
                "unsupported interval '{}' for kucoin",
                other
            ))),
        }
    }

    fn dashed_symbol(symbol: &str) -> Result<String> {
        let (base, quote) = split_symbol(symbol)?;
        Ok(format!("{}-{}", base, quote))
    }

    /// KuCoin candle rows are [time(s), open, close, high, low, volume,
    /// turnover], newest first.
    fn parse_candle_rows(rows: &[Vec<String>], limit: u32) -> Result<Vec<Candle>> {
        let mut candles: Vec<Candle> = rows
            .iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(EngineError::MalformedResponse(format!(
                        "kucoin candle row has {} fields, expected at least 6",
                        row.len()
                    )));
                }
                Ok(Candle {
                    open_time: parse_price_field(&row[0], "time")? as i64 * 1000,
                    open: parse_price_field(&row[1], "open")?,
                    close: parse_price_field(&row[2], "close")?,
                    high: parse_price_field(&row[3], "high")?,
                    low: parse_price_field(&row[4], "low")?,
                    volume: parse_price_field(&row[5], "volume")?,
                })
            })
            .collect::<Result<_>>()?;
        candles.truncate(limit as usize);
        candles.reverse(); // oldest first, matching the canonical ordering
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeClient for KucoinClient {
    fn identity(&self) -> &ExchangeIdentity {
        &self.identity
    }

    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let envelope: Envelope<Vec<KucoinSymbol>> =
            get_json(&self.pacer, BASE_URL, "/api/v1/symbols").await?;
        Ok(envelope
            .into_data()?
            .into_iter()
            .filter(|s| s.enable_trading)
            .map(|s| s.symbol.replace('-', ""))
            .collect())
    }

    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot> {
        let kucoin_interval = Self::map_interval(interval)?;
        let dashed = Self::dashed_symbol(symbol)?;

        let stats: Envelope<MarketStats> = get_json(
            &self.pacer,
            BASE_URL,
            &format!("/api/v1/market/stats?symbol={}", dashed),
        )
        .await?;
        let stats = stats.into_data()?;

        let candles: Envelope<Vec<Vec<String>>> = get_json(
            &self.pacer,
            BASE_URL,
            &format!(
                "/api/v1/market/candles?type={}&symbol={}",
                kucoin_interval, dashed
            ),
        )
        .await?;
        let candles = Self::parse_candle_rows(&candles.into_data()?, limit)?;

        let last = stats.last.ok_or_else(|| {
            EngineError::MalformedResponse(format!("kucoin stats for {} carry no last price", dashed))
        })?;
        // changeRate is a fraction (0.012 = +1.2%)
        let change_rate = match stats.change_rate {
            Some(raw) => parse_price_field(&raw, "changeRate")? * 100.0,
            None => 0.0,
        };
        let volume = match stats.vol_value {
            Some(raw) => parse_price_field(&raw, "volValue")?,
            None => 0.0,
        };

        Ok(MarketSnapshot {
            exchange: self.identity.name.clone(),
            symbol: symbol.to_string(),
            price: parse_price_field(&last, "last")?,
            change_24h_pct: change_rate,
            volume_24h: volume,
            candles,
            indicators: None,
            fetched_at: Utc::now(),
        })
    }
}
