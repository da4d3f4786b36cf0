//! One adapter per upstream exchange. Each adapter owns its identity and
//! request pacer, speaks its exchange's wire dialect, and emits canonical
//! `MarketSnapshot` values only.

pub mod binance;
pub mod bybit;
pub mod kucoin;
pub mod okx;

use crate::error::{EngineError, Result};

/// Quote assets recognised when splitting a canonical symbol like
/// "BTCUSDT" into the dashed form some exchanges use ("BTC-USDT").
/// Ordered longest-first so "BTCUSDC" does not match the "BTC" quote.
const KNOWN_QUOTE_ASSETS: [&str; 6] = ["USDT", "USDC", "TUSD", "BTC", "ETH", "EUR"];

/// Splits a canonical symbol into (base, quote) using the known quote list.
pub(crate) fn split_symbol(symbol: &str) -> Result<(&str, &str)> {
    for quote in KNOWN_QUOTE_ASSETS {
        if symbol.len() > quote.len() && symbol.ends_with(quote) {
            return Ok((&symbol[..symbol.len() - quote.len()], quote));
        }
    }
    Err(EngineError::InvalidInput(format!(
        "cannot derive base/quote assets from symbol '{}'",
        symbol
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_symbol_handles_common_quotes() {
        assert_eq!(split_symbol("BTCUSDT").unwrap(), ("BTC", "USDT"));
        assert_eq!(split_symbol("ETHBTC").unwrap(), ("ETH", "BTC"));
        assert!(split_symbol("USDT").is_err());
        assert!(split_symbol("XYZ").is_err());
    }
}
