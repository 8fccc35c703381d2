// =============================================================================
// Futures REST Client — public market-data endpoints
// =============================================================================
//
// Only public endpoints are consumed: funding rates, open interest, and
// klines. Every call carries the client-wide 10 s deadline; a failure is
// reported to the caller, which keeps its previous cache authoritative.
//
// Open-interest sweeps across the top-100 universe are issued in groups of 10
// with a 100 ms inter-group gap to stay inside the exchange request weight.
// =============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::indicators::rsi;
use crate::market_data::Candle;

/// Request deadline applied to every outbound REST call.
const REST_TIMEOUT_SECS: u64 = 10;

/// Open-interest batch size per request group.
const OI_BATCH_SIZE: usize = 10;

/// Gap between open-interest request groups.
const OI_BATCH_GAP_MS: u64 = 100;

/// Funding snapshot for a single perpetual contract.
#[derive(Debug, Clone, Serialize)]
pub struct FundingRate {
    pub symbol: String,
    /// Raw funding rate as a decimal (0.0001 = 0.01%).
    pub rate: f64,
    /// Timestamp (ms) of the next funding event.
    pub next_funding_ts: i64,
    pub mark_price: f64,
}

/// Open interest snapshot for a single symbol.
#[derive(Debug, Clone, Serialize)]
pub struct OpenInterest {
    pub symbol: String,
    /// Outstanding contracts.
    pub open_interest: f64,
    pub ts: i64,
}

/// Public futures REST client.
#[derive(Clone)]
pub struct FuturesRestClient {
    base_url: String,
    client: reqwest::Client,
}

impl FuturesRestClient {
    pub fn new() -> Self {
        Self::with_base_url("https://fapi.binance.com")
    }

    /// Point the client at a different host (tests use a local mock).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client for FuturesRestClient");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Funding
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/premiumIndex — funding rate and mark price for every
    /// perpetual in one call.
    pub async fn get_funding_rates(&self) -> Result<Vec<FundingRate>> {
        let url = format!("{}/fapi/v1/premiumIndex", self.base_url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/premiumIndex request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse premiumIndex response")?;

        if !status.is_success() {
            return Err(EngineError::ExchangeRest(format!(
                "premiumIndex returned {status}: {body}"
            ))
            .into());
        }

        let arr = body
            .as_array()
            .context("premiumIndex response is not an array")?;

        let mut rates = Vec::with_capacity(arr.len());
        for entry in arr {
            let symbol = match entry["symbol"].as_str() {
                Some(s) => s.to_string(),
                None => continue,
            };
            let rate: f64 = entry["lastFundingRate"]
                .as_str()
                .unwrap_or("0")
                .parse()
                .unwrap_or(0.0);
            let mark_price: f64 = entry["markPrice"]
                .as_str()
                .unwrap_or("0")
                .parse()
                .unwrap_or(0.0);
            let next_funding_ts = entry["nextFundingTime"].as_i64().unwrap_or(0);

            rates.push(FundingRate {
                symbol,
                rate,
                next_funding_ts,
                mark_price,
            });
        }

        debug!(count = rates.len(), "funding rates fetched");
        Ok(rates)
    }

    // -------------------------------------------------------------------------
    // Open interest
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/openInterest for a single symbol.
    pub async fn get_open_interest(&self, symbol: &str) -> Result<OpenInterest> {
        let url = format!(
            "{}/fapi/v1/openInterest?symbol={}",
            self.base_url, symbol
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET open interest for {symbol}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse open interest response")?;

        if !status.is_success() {
            return Err(EngineError::ExchangeRest(format!(
                "openInterest returned {status}: {body}"
            ))
            .into());
        }

        let open_interest: f64 = body["openInterest"]
            .as_str()
            .unwrap_or("0")
            .parse()
            .unwrap_or(0.0);
        let ts = body["time"].as_i64().unwrap_or(0);

        Ok(OpenInterest {
            symbol: symbol.to_string(),
            open_interest,
            ts,
        })
    }

    /// Sweep open interest across `symbols` in groups of ten with a 100 ms
    /// inter-group gap. A failed symbol is skipped with a warning; the sweep
    /// continues.
    pub async fn get_open_interest_batch(&self, symbols: &[String]) -> Vec<OpenInterest> {
        let mut results = Vec::with_capacity(symbols.len());

        for (group_idx, group) in symbols.chunks(OI_BATCH_SIZE).enumerate() {
            if group_idx > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(OI_BATCH_GAP_MS)).await;
            }

            for symbol in group {
                match self.get_open_interest(symbol).await {
                    Ok(oi) => results.push(oi),
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "open interest fetch failed — skipping");
                    }
                }
            }
        }

        debug!(
            requested = symbols.len(),
            fetched = results.len(),
            "open interest sweep complete"
        );
        results
    }

    // -------------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines (public).
    ///
    /// Array indices: [0] openTime, [1] open, [2] high, [3] low, [4] close,
    /// [5] volume, [6] closeTime, [7] quoteAssetVolume.
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v1/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            return Err(EngineError::ExchangeRest(format!(
                "klines returned {status}: {body}"
            ))
            .into());
        }

        let raw = body.as_array().context("klines response is not an array")?;

        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = entry.as_array().context("kline entry is not an array")?;
            if arr.len() < 8 {
                warn!("skipping malformed kline entry with {} elements", arr.len());
                continue;
            }

            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1])?;
            let high = Self::parse_str_f64(&arr[2])?;
            let low = Self::parse_str_f64(&arr[3])?;
            let close = Self::parse_str_f64(&arr[4])?;
            let volume = Self::parse_str_f64(&arr[5])?;
            let close_time = arr[6].as_i64().unwrap_or(0);
            let quote_volume = Self::parse_str_f64(&arr[7])?;

            let mut candle = Candle::new(open_time, open, high, low, close, volume, close_time);
            candle.quote_volume = quote_volume;
            candles.push(candle);
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    /// Most recent Wilder 14-period RSI for `symbol` at `interval`, computed
    /// from the last 100 closes.
    pub async fn get_symbol_rsi(&self, symbol: &str, interval: &str) -> Result<f64> {
        let candles = self.get_klines(symbol, interval, 100).await?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

        rsi::current_rsi(&closes, 14)
            .map(|(value, _label)| value)
            .with_context(|| format!("not enough closes to compute RSI for {symbol}@{interval}"))
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl Default for FuturesRestClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FuturesRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuturesRestClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_accepts_both_forms() {
        assert!((FuturesRestClient::parse_str_f64(&serde_json::json!("1.5")).unwrap() - 1.5).abs() < 1e-12);
        assert!((FuturesRestClient::parse_str_f64(&serde_json::json!(2.5)).unwrap() - 2.5).abs() < 1e-12);
        assert!(FuturesRestClient::parse_str_f64(&serde_json::json!(null)).is_err());
        assert!(FuturesRestClient::parse_str_f64(&serde_json::json!("abc")).is_err());
    }

    #[test]
    fn oi_batching_groups_of_ten() {
        let symbols: Vec<String> = (0..25).map(|i| format!("SYM{i}USDT")).collect();
        let groups: Vec<_> = symbols.chunks(OI_BATCH_SIZE).collect();
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].len(), 10);
        assert_eq!(groups[2].len(), 5);
    }
}
