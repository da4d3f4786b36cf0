// src/exchange/clients/bybit.rs
//! Bybit v5 spot adapter. Bybit wraps payloads in a `{retCode, retMsg,
//! result}` envelope, encodes 24h change as a fraction, uses bare-number
//! interval codes ("60" for one hour) and returns klines newest-first.

use crate::error::{EngineError, Result};
use crate::exchange::http::{get_json, parse_price_field, RequestPacer};
use crate::exchange::{
    Candle, ExchangeClient, ExchangeIdentity, MarketSnapshot, RateLimitClass,
};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

const BASE_URL: &str = "https://api.bybit.com";
const RET_CODE_RATE_LIMITED: i64 = 10006;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<T> {
        match self.ret_code {
            0 => self.result.ok_or_else(|| {
                EngineError::MalformedResponse("bybit envelope missing result field".to_string())
            }),
            RET_CODE_RATE_LIMITED => Err(EngineError::RateLimited(format!(
                "bybit: {}",
                self.ret_msg
            ))),
            code => Err(EngineError::RemoteUnavailable(format!(
                "bybit returned retCode {}: {}",
                code, self.ret_msg
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstrumentList {
    list: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
struct Instrument {
    symbol: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TickerList {
    list: Vec<Ticker>,
}

#[derive(Debug, Deserialize)]
struct Ticker {
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "price24hPcnt")]
    price_24h_pcnt: String,
    #[serde(rename = "turnover24h")]
    turnover_24h: String,
}

#[derive(Debug, Deserialize)]
struct KlineList {
    list: Vec<Vec<String>>,
}

pub struct BybitClient {
    identity: ExchangeIdentity,
    pacer: RequestPacer,
}

impl BybitClient {
    pub fn new() -> Self {
        Self {
            identity: ExchangeIdentity::new("bybit", BASE_URL, 3, RateLimitClass::Standard),
            pacer: RequestPacer::new(RateLimitClass::Standard),
        }
    }

    fn map_interval(interval: &str) -> Result<&'static str> {
        match interval {
            "1m" => Ok("1"),
            "5m" => Ok("5"),
            "15m" => Ok("15"),
            "1h" => Ok("60"),
            "4h" => Ok("240"),
            "1d" => Ok("D"),
            other => Err(EngineError::InvalidInput(format!(
                "unsupported interval '{}' for bybit",
                other
            ))),
        }
    }

    /// Bybit kline rows are [startTime(ms), open, high, low, close, volume,
    /// turnover], newest first.
    fn parse_kline_rows(rows: &[Vec<String>]) -> Result<Vec<Candle>> {
        let mut candles: Vec<Candle> = rows
            .iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(EngineError::MalformedResponse(format!(
                        "bybit kline row has {} fields, expected at least 6",
                        row.len()
                    )));
                }
                Ok(Candle {
                    open_time: row[0].trim().parse::<i64>().map_err(|e| {
                        EngineError::MalformedResponse(format!(
                            "bybit startTime '{}' is not an integer: {}",
                            row[0], e
                        ))
                    })?,
                    open: parse_price_field(&row[1], "open")?,
                    high: parse_price_field(&row[2], "high")?,
                    low: parse_price_field(&row[3], "low")?,
                    close: parse_price_field(&row[4], "close")?,
                    volume: parse_price_field(&row[5], "volume")?,
                })
            })
            .collect::<Result<_>>()?;
        candles.reverse();
        Ok(candles)
    }
}

#[async_trait]
impl ExchangeClient for BybitClient {
    fn identity(&self) -> &ExchangeIdentity {
        &self.identity
    }

    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let envelope: Envelope<InstrumentList> = get_json(
            &self.pacer,
            BASE_URL,
            "/v5/market/instruments-info?category=spot",
        )
        .await?;
        Ok(envelope
            .into_result()?
            .list
            .into_iter()
            .filter(|i| i.status == "Trading")
            .map(|i| i.symbol)
            .collect())
    }

    async fn fetch_snapshot(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<MarketSnapshot> {
        let bybit_interval = Self::map_interval(interval)?;

        let tickers: Envelope<TickerList> = get_json(
            &self.pacer,
            BASE_URL,
            &format!("/v5/market/tickers?category=spot&symbol={}", symbol),
        )
        .await?;
        let ticker = tickers
            .into_result()?
            .list
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::MalformedResponse(format!("bybit returned no ticker for {}", symbol))
            })?;

        let klines: Envelope<KlineList> = get_json(
            &self.pacer,
            BASE_URL,
            &format!(
                "/v5/market/kline?category=spot&symbol={}&interval={}&limit={}",
                symbol, bybit_interval, limit
            ),
        )
        .await?;
        let candles = Self::parse_kline_rows(&klines.into_result()?.list)?;

        Ok(MarketSnapshot {
            exchange: self.identity.name.clone(),
            symbol: symbol.to_string(),
            price: parse_price_field(&ticker.last_price, "lastPrice")?,
            // price24hPcnt is a fraction (0.012 = +1.2%)
            change_24h_pct: parse_price_field(&ticker.price_24h_pcnt, "price24hPcnt")? * 100.0,
            volume_24h: parse_price_field(&ticker.turnover_24h, "turnover24h")?,
            candles,
            indicators: None,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn kline_rows_are_reversed_to_oldest_first() {
        let rows = vec![
            vec![
                "1700003600000".to_string(),
                "35050.2".to_string(),
                "35200.0".to_string(),
                "35000.0".to_string(),
                "35150.8".to_string(),
                "98.76".to_string(),
                "3460000.0".to_string(),
            ],
            vec![
                "1700000000000".to_string(),
                "35000.1".to_string(),
                "35100.0".to_string(),
                "34900.5".to_string(),
                "35050.2".to_string(),
                "123.45".to_string(),
                "4320000.0".to_string(),
            ],
        ];
        let candles = BybitClient::parse_kline_rows(&rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].open_time < candles[1].open_time);
        assert_eq!(candles[1].close, 35150.8);
    }

    #[test]
    fn rate_limit_ret_code_maps_to_rate_limited() {
        let envelope = Envelope::<TickerList> {
            ret_code: RET_CODE_RATE_LIMITED,
            ret_msg: "Too many visits".to_string(),
            result: None,
        };
        assert!(matches!(
            envelope.into_result().unwrap_err(),
            EngineError::RateLimited(_)
        ));
    }
}
