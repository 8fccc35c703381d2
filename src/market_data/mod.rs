// =============================================================================
// Market Data Module
// =============================================================================
//
// Inbound market data for the engine:
//
//   1. Ticker stream  — the exchange's all-market 24h ticker array, parsed
//                       into typed batches and fed to the DataStore.
//   2. DataStore      — per-symbol rolling state (single writer).
//   3. Candles        — OHLCV bars fetched over REST by the slower detectors.

pub mod candles;
pub mod data_store;
pub mod ticker;

pub use candles::Candle;
pub use data_store::{DataStore, SymbolState, UpdateOutcome};
pub use ticker::Ticker;

use anyhow::{Context, Result};

/// The exchange sends numeric values as JSON strings; parse either form.
pub(crate) fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}
