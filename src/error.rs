// =============================================================================
// Engine error kinds
// =============================================================================
//
// Transient kinds (stream, exchange REST, predictor, store) are logged and
// absorbed at their origin: detectors return empty alert lists, the scheduler
// skips the tick, the signal is emitted unenhanced. Only ConfigError is fatal,
// and only at startup.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Exchange stream disconnect or malformed payload. Reconnect with fixed
    /// backoff; no state mutation.
    #[error("stream error: {0}")]
    Stream(String),

    /// Exchange REST failure (HTTP error, timeout, rate limit). The previous
    /// detector cache remains authoritative.
    #[error("exchange REST error: {0}")]
    ExchangeRest(String),

    /// Predictor unreachable, timed out, or unhealthy. The signal is emitted
    /// without ML enhancement; no retry within the same analysis cycle.
    #[error("predictor error: {0}")]
    Predictor(String),

    /// Store write failure. Dropped only when the data is recoverable on the
    /// next save pulse.
    #[error("store error: {0}")]
    Store(String),

    /// Missing or out-of-bounds configuration. Fatal at startup only.
    #[error("config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind() {
        let e = EngineError::ExchangeRest("timeout after 10s".into());
        assert!(e.to_string().contains("exchange REST"));
        assert!(e.to_string().contains("timeout"));
    }
}
