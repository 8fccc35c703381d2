// =============================================================================
// Open Interest Detector — participation changes co-read with price
// =============================================================================
//
// OI rising means new money entering; falling means positions closing. The
// (OI delta, price delta) pair between two polls classifies what the new
// money is doing. Emission needs at least two historical points per symbol.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::exchange::FuturesRestClient;
use crate::market_data::DataStore;
use crate::types::Direction;

/// Minimum |OI change| between polls to emit, percent.
const MIN_OI_CHANGE_PCT: f64 = 2.0;

/// Price move treated as directional between polls, percent.
const PRICE_MOVE_PCT: f64 = 1.0;

/// Universe size for the OI sweep.
const OI_UNIVERSE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OiSignal {
    /// OI up with price up — new longs pressing a move.
    StrongTrend,
    /// OI up with price down — shorts building into weakness.
    BuildingShorts,
    /// OI up with price flat — positions accumulating ahead of a move.
    BuildingLongs,
    /// OI down — positions being closed or liquidated.
    ClosingPositions,
    Neutral,
}

impl OiSignal {
    /// Signed feature encoding.
    pub fn encode(self) -> i8 {
        match self {
            Self::StrongTrend => 2,
            Self::BuildingLongs => 1,
            Self::Neutral => 0,
            Self::BuildingShorts => -1,
            Self::ClosingPositions => -2,
        }
    }
}

impl std::fmt::Display for OiSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongTrend => write!(f, "STRONG_TREND"),
            Self::BuildingShorts => write!(f, "BUILDING_SHORTS"),
            Self::BuildingLongs => write!(f, "BUILDING_LONGS"),
            Self::ClosingPositions => write!(f, "CLOSING_POSITIONS"),
            Self::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OiAlert {
    pub symbol: String,
    pub oi_change_pct: f64,
    pub price_change_pct: f64,
    pub open_interest: f64,
    pub signal: OiSignal,
    pub direction: Direction,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy)]
struct OiPoint {
    open_interest: f64,
    price: f64,
}

pub struct OpenInterestDetector {
    client: Arc<FuturesRestClient>,
    store: Arc<DataStore>,
    previous: RwLock<HashMap<String, OiPoint>>,
    cache: RwLock<Vec<OiAlert>>,
}

impl OpenInterestDetector {
    pub fn new(client: Arc<FuturesRestClient>, store: Arc<DataStore>) -> Self {
        Self {
            client,
            store,
            previous: RwLock::new(HashMap::new()),
            cache: RwLock::new(Vec::new()),
        }
    }

    /// Sweep OI across the top-100 liquidity universe and rebuild the alert
    /// cache from poll-over-poll changes.
    pub async fn update(&self) {
        let universe = self.universe();
        if universe.is_empty() {
            return;
        }

        let snapshots = self.client.get_open_interest_batch(&universe).await;
        let now = self.store.clock().now_ms();

        let mut alerts = Vec::new();
        {
            let mut previous = self.previous.write();
            for snap in snapshots {
                let Some(current) = self.store.current(&snap.symbol) else {
                    continue;
                };
                let point = OiPoint {
                    open_interest: snap.open_interest,
                    price: current.last_price,
                };

                // First observation only seeds history.
                let Some(prev) = previous.insert(snap.symbol.clone(), point) else {
                    continue;
                };
                if prev.open_interest <= 0.0 || prev.price <= 0.0 {
                    continue;
                }

                let oi_change_pct =
                    (snap.open_interest - prev.open_interest) / prev.open_interest * 100.0;
                if oi_change_pct.abs() < MIN_OI_CHANGE_PCT {
                    continue;
                }
                let price_change_pct = (point.price - prev.price) / prev.price * 100.0;

                let (signal, direction) = classify(oi_change_pct, price_change_pct);
                alerts.push(OiAlert {
                    symbol: snap.symbol,
                    oi_change_pct,
                    price_change_pct,
                    open_interest: snap.open_interest,
                    signal,
                    direction,
                    timestamp: now,
                });
            }
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.oi_change_pct);
        debug!(count = alerts.len(), "open interest alerts refreshed");
        *self.cache.write() = alerts;
    }

    pub fn detect(&self) -> Vec<OiAlert> {
        self.cache.read().clone()
    }

    pub fn alert_for(&self, symbol: &str) -> Option<OiAlert> {
        self.cache.read().iter().find(|a| a.symbol == symbol).cloned()
    }

    /// Per-symbol OI changes (percent) from the current alert cache.
    pub fn changes_by_symbol(&self) -> std::collections::HashMap<String, f64> {
        self.cache
            .read()
            .iter()
            .map(|a| (a.symbol.clone(), a.oi_change_pct))
            .collect()
    }

    /// Mean OI change (percent) across the current alert cache.
    pub fn mean_oi_change_pct(&self) -> f64 {
        let cache = self.cache.read();
        if cache.is_empty() {
            return 0.0;
        }
        cache.iter().map(|a| a.oi_change_pct).sum::<f64>() / cache.len() as f64
    }

    /// Top-100 symbols by 24h quote volume.
    fn universe(&self) -> Vec<String> {
        let mut currents = self.store.all_currents();
        currents.sort_by(|a, b| {
            b.quote_volume
                .partial_cmp(&a.quote_volume)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        currents
            .into_iter()
            .take(OI_UNIVERSE)
            .map(|t| t.symbol)
            .collect()
    }
}

fn classify(oi_change_pct: f64, price_change_pct: f64) -> (OiSignal, Direction) {
    if oi_change_pct >= MIN_OI_CHANGE_PCT {
        if price_change_pct >= PRICE_MOVE_PCT {
            (OiSignal::StrongTrend, Direction::Long)
        } else if price_change_pct <= -PRICE_MOVE_PCT {
            (OiSignal::BuildingShorts, Direction::Short)
        } else {
            (OiSignal::BuildingLongs, Direction::Long)
        }
    } else if oi_change_pct <= -MIN_OI_CHANGE_PCT {
        (OiSignal::ClosingPositions, Direction::Neutral)
    } else {
        (OiSignal::Neutral, Direction::Neutral)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_pairs() {
        assert_eq!(classify(3.0, 2.0), (OiSignal::StrongTrend, Direction::Long));
        assert_eq!(
            classify(3.0, -2.0),
            (OiSignal::BuildingShorts, Direction::Short)
        );
        assert_eq!(
            classify(3.0, 0.2),
            (OiSignal::BuildingLongs, Direction::Long)
        );
        assert_eq!(
            classify(-3.0, 2.0),
            (OiSignal::ClosingPositions, Direction::Neutral)
        );
        assert_eq!(classify(1.0, 5.0), (OiSignal::Neutral, Direction::Neutral));
    }

    #[test]
    fn threshold_is_two_percent() {
        assert_eq!(classify(1.9, 2.0).0, OiSignal::Neutral);
        assert_eq!(classify(2.0, 2.0).0, OiSignal::StrongTrend);
        assert_eq!(classify(-2.0, 0.0).0, OiSignal::ClosingPositions);
    }
}
