// =============================================================================
// Ticker Stream — all-market 24h ticker ingest
// =============================================================================
//
// Connects to the futures exchange's `!ticker@arr` stream, which pushes a JSON
// array of per-symbol 24h ticker objects. All numeric fields arrive as
// strings. Parsed batches are handed to the caller's sink; the caller owns the
// reconnect loop (fixed 5 s backoff, mirroring the kline streams this engine
// grew out of).
// =============================================================================

use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Serialize;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use super::parse_string_f64;
use crate::error::EngineError;

/// Snapshot of a symbol's 24h statistics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub open_price: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    /// Exchange event time, milliseconds.
    pub event_time: i64,
}

/// Parse one element of the `!ticker@arr` payload.
///
/// Field mapping: `s` symbol, `c` last, `p` change, `P` change%, `o` open,
/// `h` high, `l` low, `v` base volume, `q` quote volume, `n` trades,
/// `E` event time.
pub fn parse_ticker(entry: &serde_json::Value) -> Result<Ticker> {
    let symbol = entry["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();

    Ok(Ticker {
        last_price: parse_string_f64(&entry["c"], "c")?,
        price_change: parse_string_f64(&entry["p"], "p")?,
        price_change_percent: parse_string_f64(&entry["P"], "P")?,
        open_price: parse_string_f64(&entry["o"], "o")?,
        high_price: parse_string_f64(&entry["h"], "h")?,
        low_price: parse_string_f64(&entry["l"], "l")?,
        base_volume: parse_string_f64(&entry["v"], "v")?,
        quote_volume: parse_string_f64(&entry["q"], "q")?,
        trade_count: entry["n"].as_u64().unwrap_or(0),
        event_time: entry["E"].as_i64().context("missing field E")?,
        symbol,
    })
}

/// Parse a full ticker-array message. Malformed elements are skipped with a
/// warning; a malformed envelope is an error (the stream is resynced by the
/// caller's reconnect loop).
pub fn parse_ticker_batch(text: &str) -> Result<Vec<Ticker>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse ticker JSON")?;

    // Combined-stream envelope support: { "stream": ..., "data": [...] }.
    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    let arr = data.as_array().context("ticker payload is not an array")?;

    let mut batch = Vec::with_capacity(arr.len());
    for entry in arr {
        match parse_ticker(entry) {
            Ok(t) => batch.push(t),
            Err(e) => warn!(error = %e, "skipping malformed ticker element"),
        }
    }
    Ok(batch)
}

/// Connect to the all-market ticker WebSocket and feed parsed batches to
/// `sink` until the stream disconnects or errors.
///
/// Runs until the stream ends, then returns so that the caller can handle
/// reconnection with its fixed backoff.
pub async fn run_ticker_stream<F>(ws_url: &str, mut sink: F) -> Result<()>
where
    F: FnMut(Vec<Ticker>),
{
    info!(url = %ws_url, "connecting to ticker WebSocket");

    let (ws_stream, _response) = connect_async(ws_url)
        .await
        .context("failed to connect to ticker WebSocket")?;

    info!("ticker WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_ticker_batch(&text) {
                        Ok(batch) => {
                            if !batch.is_empty() {
                                debug!(count = batch.len(), "ticker batch received");
                                sink(batch);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse ticker message");
                        }
                    }
                }
                // Ping/Pong/Binary/Close frames are handled by tungstenite.
            }
            Some(Err(e)) => {
                error!(error = %e, "ticker WebSocket read error");
                return Err(EngineError::Stream(e.to_string()).into());
            }
            None => {
                warn!("ticker WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Default stream endpoint for the all-market 24h ticker array.
pub const DEFAULT_TICKER_STREAM_URL: &str = "wss://fstream.binance.com/ws/!ticker@arr";
