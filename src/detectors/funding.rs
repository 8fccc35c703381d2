// =============================================================================
// Funding Detector — perpetual funding-rate screen
// =============================================================================
//
// Funding rates are periodic payments between longs and shorts that anchor
// the perpetual contract price to spot. Extreme rates mark an overleveraged
// crowd and are read contrarian; a squeeze pairs an elevated rate with a 24h
// move against the crowd.
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::exchange::{FundingRate, FuturesRestClient};
use crate::market_data::DataStore;
use crate::types::Direction;

/// Funding classification. Only classified symbols emit alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FundingSignal {
    /// rate > +0.1% — overleveraged longs.
    ExtremePositive,
    /// rate < -0.1% — overleveraged shorts.
    ExtremeNegative,
    /// rate < -0.05% while price is down > 5% — longs being flushed.
    LongSqueeze,
    /// rate > +0.05% while price is up > 5% — shorts being flushed.
    ShortSqueeze,
}

impl FundingSignal {
    /// Signed feature encoding; 0 is reserved for "no signal".
    pub fn encode(self) -> i8 {
        match self {
            Self::ExtremePositive => 2,
            Self::ShortSqueeze => 1,
            Self::LongSqueeze => -1,
            Self::ExtremeNegative => -2,
        }
    }
}

impl std::fmt::Display for FundingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExtremePositive => write!(f, "EXTREME_POSITIVE"),
            Self::ExtremeNegative => write!(f, "EXTREME_NEGATIVE"),
            Self::LongSqueeze => write!(f, "LONG_SQUEEZE"),
            Self::ShortSqueeze => write!(f, "SHORT_SQUEEZE"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingAlert {
    pub symbol: String,
    /// Funding rate as a percentage (0.01 = one basis point).
    pub rate_pct: f64,
    pub signal: FundingSignal,
    /// Magnitude band in [0, 100].
    pub strength: f64,
    pub change_24h: f64,
    pub next_funding_ts: i64,
    pub mark_price: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct FundingDetector {
    client: Arc<FuturesRestClient>,
    store: Arc<DataStore>,
    cache: RwLock<Vec<FundingAlert>>,
    /// Raw rates from the last successful poll, for consumers that need the
    /// unclassified feed (sentiment aggregation, feature building).
    last_rates: RwLock<Vec<FundingRate>>,
}

impl FundingDetector {
    pub fn new(client: Arc<FuturesRestClient>, store: Arc<DataStore>) -> Self {
        Self {
            client,
            store,
            cache: RwLock::new(Vec::new()),
            last_rates: RwLock::new(Vec::new()),
        }
    }

    /// Poll funding rates and rebuild the alert cache. On failure the
    /// previous cache remains authoritative.
    pub async fn update(&self) -> Result<()> {
        let rates = self.client.get_funding_rates().await?;
        let now = self.store.clock().now_ms();

        let mut alerts = Vec::new();
        for rate in &rates {
            let change_24h = self
                .store
                .current(&rate.symbol)
                .map(|t| t.price_change_percent)
                .unwrap_or(0.0);

            let rate_pct = rate.rate * 100.0;
            let Some(signal) = classify(rate_pct, change_24h) else {
                continue;
            };

            let direction = match signal {
                FundingSignal::ExtremePositive | FundingSignal::ShortSqueeze => Direction::Short,
                FundingSignal::ExtremeNegative | FundingSignal::LongSqueeze => Direction::Long,
            };

            alerts.push(FundingAlert {
                symbol: rate.symbol.clone(),
                rate_pct,
                signal,
                strength: strength_band(rate_pct),
                change_24h,
                next_funding_ts: rate.next_funding_ts,
                mark_price: rate.mark_price,
                direction,
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.rate_pct);
        debug!(count = alerts.len(), "funding alerts refreshed");

        *self.cache.write() = alerts;
        *self.last_rates.write() = rates;
        Ok(())
    }

    pub fn detect(&self) -> Vec<FundingAlert> {
        self.cache.read().clone()
    }

    /// Latest classified alert for `symbol`.
    pub fn alert_for(&self, symbol: &str) -> Option<FundingAlert> {
        self.cache.read().iter().find(|a| a.symbol == symbol).cloned()
    }

    /// Raw funding rate (percent) for `symbol` from the last poll, classified
    /// or not.
    pub fn rate_pct_for(&self, symbol: &str) -> Option<f64> {
        self.last_rates
            .read()
            .iter()
            .find(|r| r.symbol == symbol)
            .map(|r| r.rate * 100.0)
    }

    /// Per-symbol funding rates (percent) from the last poll.
    pub fn all_rates_pct(&self) -> std::collections::HashMap<String, f64> {
        self.last_rates
            .read()
            .iter()
            .map(|r| (r.symbol.clone(), r.rate * 100.0))
            .collect()
    }

    /// Mean funding rate (percent) across the last poll.
    pub fn mean_rate_pct(&self) -> f64 {
        let rates = self.last_rates.read();
        if rates.is_empty() {
            return 0.0;
        }
        rates.iter().map(|r| r.rate * 100.0).sum::<f64>() / rates.len() as f64
    }
}

/// Classification per the screen's thresholds. Extremes win over squeezes.
fn classify(rate_pct: f64, change_24h: f64) -> Option<FundingSignal> {
    if rate_pct > 0.1 {
        Some(FundingSignal::ExtremePositive)
    } else if rate_pct < -0.1 {
        Some(FundingSignal::ExtremeNegative)
    } else if rate_pct < -0.05 && change_24h < -5.0 {
        Some(FundingSignal::LongSqueeze)
    } else if rate_pct > 0.05 && change_24h > 5.0 {
        Some(FundingSignal::ShortSqueeze)
    } else {
        None
    }
}

/// Magnitude band in [0, 100].
fn strength_band(rate_pct: f64) -> f64 {
    let mag = rate_pct.abs();
    if mag >= 0.15 {
        95.0
    } else if mag >= 0.1 {
        80.0
    } else if mag >= 0.075 {
        65.0
    } else if mag >= 0.05 {
        50.0
    } else {
        30.0
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_rates_classify_regardless_of_price() {
        assert_eq!(classify(0.12, 0.0), Some(FundingSignal::ExtremePositive));
        assert_eq!(classify(-0.2, 0.0), Some(FundingSignal::ExtremeNegative));
    }

    #[test]
    fn squeezes_require_price_confirmation() {
        assert_eq!(classify(-0.06, -6.0), Some(FundingSignal::LongSqueeze));
        assert_eq!(classify(-0.06, -2.0), None);
        assert_eq!(classify(0.06, 6.0), Some(FundingSignal::ShortSqueeze));
        assert_eq!(classify(0.06, 2.0), None);
    }

    #[test]
    fn mild_rates_are_silent() {
        assert_eq!(classify(0.02, 8.0), None);
        assert_eq!(classify(-0.04, -8.0), None);
    }

    #[test]
    fn strength_bands_are_monotone() {
        assert!(strength_band(0.2) > strength_band(0.11));
        assert!(strength_band(0.11) > strength_band(0.08));
        assert!(strength_band(0.08) > strength_band(0.06));
        assert!(strength_band(0.06) > strength_band(0.01));
        assert!((strength_band(-0.2) - strength_band(0.2)).abs() < 1e-12);
    }
}
