// =============================================================================
// Whale Detector — outsized quote-volume flow bursts
// =============================================================================
//
// Tracks cumulative quote-volume snapshots and compares the recent ten-point
// flow against the twenty points behind it. A burst that is both large in
// absolute terms and a multiple of the baseline reads as a single large
// participant; the concurrent price move tells which side they are on.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

/// Snapshots retained per symbol.
const TRACKING_DEPTH: usize = 60;

const RECENT_WINDOW: usize = 10;
const BASELINE_WINDOW: usize = 20;

/// Minimum recent flow to consider, USD.
const MIN_RECENT_FLOW: f64 = 100_000.0;

/// Minimum recent/baseline rate ratio.
const MIN_RATIO: f64 = 3.0;

/// Ratio above which the burst reads as deliberate accumulation rather than
/// a one-off order.
const STEALTH_RATIO: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WhaleActivity {
    Accumulation,
    Distribution,
    LargeBuy,
    LargeSell,
}

impl WhaleActivity {
    /// Signed feature encoding; 0 is reserved for "no whale flow".
    pub fn encode(self) -> i8 {
        match self {
            Self::Accumulation => 2,
            Self::LargeBuy => 1,
            Self::LargeSell => -1,
            Self::Distribution => -2,
        }
    }
}

impl std::fmt::Display for WhaleActivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accumulation => write!(f, "ACCUMULATION"),
            Self::Distribution => write!(f, "DISTRIBUTION"),
            Self::LargeBuy => write!(f, "LARGE_BUY"),
            Self::LargeSell => write!(f, "LARGE_SELL"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WhaleAlert {
    pub symbol: String,
    /// Quote volume moved across the recent window, USD.
    pub flow_usd: f64,
    /// Recent flow rate over baseline flow rate.
    pub ratio: f64,
    pub activity: WhaleActivity,
    pub price_move_pct: f64,
    pub confidence: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct WhaleDetector {
    store: Arc<DataStore>,
    /// (cumulative quote volume, price) snapshots per symbol.
    tracking: RwLock<HashMap<String, VecDeque<(f64, f64)>>>,
}

impl WhaleDetector {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            tracking: RwLock::new(HashMap::new()),
        }
    }

    /// Record one snapshot per tracked symbol. Runs on the whale cadence.
    pub fn update(&self) {
        let mut tracking = self.tracking.write();
        for t in self.store.all_currents() {
            let ring = tracking
                .entry(t.symbol)
                .or_insert_with(|| VecDeque::with_capacity(TRACKING_DEPTH + 1));
            ring.push_back((t.quote_volume, t.last_price));
            while ring.len() > TRACKING_DEPTH {
                ring.pop_front();
            }
        }
    }

    pub fn detect(&self) -> Vec<WhaleAlert> {
        let now = self.store.clock().now_ms();
        let tracking = self.tracking.read();
        let mut alerts = Vec::new();

        for (symbol, ring) in tracking.iter() {
            if ring.len() < RECENT_WINDOW + BASELINE_WINDOW + 1 {
                continue;
            }

            let n = ring.len();
            let (last_vol, last_price) = ring[n - 1];
            let (recent_start_vol, recent_start_price) = ring[n - 1 - RECENT_WINDOW];
            let (baseline_start_vol, _) = ring[n - 1 - RECENT_WINDOW - BASELINE_WINDOW];

            let flow = last_vol - recent_start_vol;
            let recent_rate = flow / RECENT_WINDOW as f64;
            let baseline_rate = (recent_start_vol - baseline_start_vol) / BASELINE_WINDOW as f64;
            if flow <= MIN_RECENT_FLOW || baseline_rate <= 0.0 {
                continue;
            }

            let ratio = recent_rate / baseline_rate;
            if ratio < MIN_RATIO {
                continue;
            }

            let price_move_pct = if recent_start_price != 0.0 {
                (last_price - recent_start_price) / recent_start_price * 100.0
            } else {
                0.0
            };

            let buying = price_move_pct >= 0.0;
            let activity = match (ratio > STEALTH_RATIO, buying) {
                (true, true) => WhaleActivity::Accumulation,
                (true, false) => WhaleActivity::Distribution,
                (false, true) => WhaleActivity::LargeBuy,
                (false, false) => WhaleActivity::LargeSell,
            };

            let confidence = (flow * 25.0 / 1_000_000.0 + ratio * 50.0 / 10.0).clamp(0.0, 100.0);

            alerts.push(WhaleAlert {
                symbol: symbol.clone(),
                flow_usd: flow,
                ratio,
                activity,
                price_move_pct,
                confidence,
                direction: if buying { Direction::Long } else { Direction::Short },
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.flow_usd);
        alerts
    }

    /// Whether `symbol` currently shows whale flow; used as a feature input.
    pub fn activity_for(&self, symbol: &str) -> Option<WhaleAlert> {
        self.detect().into_iter().find(|a| a.symbol == symbol)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::market_data::Ticker;

    fn ticker(symbol: &str, price: f64, qv: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: price,
            high_price: price,
            low_price: price,
            base_volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time,
        }
    }

    fn setup() -> (Clock, Arc<DataStore>, WhaleDetector) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock.clone(), 5, 60));
        let det = WhaleDetector::new(store.clone());
        (clock, store, det)
    }

    /// Baseline +10K per snapshot, then a 60K-per-snapshot burst with price
    /// climbing: a 6x ratio on $600K of flow reads as accumulation.
    #[test]
    fn accumulation_burst() {
        let (clock, store, det) = setup();

        let mut cumulative = 10_000_000.0;
        let mut price = 100.0;
        for i in 0..60 {
            if i < 50 {
                cumulative += 10_000.0;
            } else {
                cumulative += 60_000.0;
                price += 0.05;
            }
            store.update(vec![ticker("WHLUSDT", price, cumulative, i + 1)]);
            det.update();
            clock.advance_ms(10_000);
        }

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert!((a.ratio - 6.0).abs() < 1e-6, "ratio {}", a.ratio);
        assert!(a.flow_usd >= 600_000.0 - 1.0);
        assert_eq!(a.activity, WhaleActivity::Accumulation);
        assert_eq!(a.direction, Direction::Long);
        assert!(a.confidence > 0.0 && a.confidence <= 100.0);
    }

    #[test]
    fn moderate_burst_with_falling_price_is_large_sell() {
        let (clock, store, det) = setup();

        let mut cumulative = 10_000_000.0;
        let mut price = 100.0;
        for i in 0..60 {
            if i < 50 {
                cumulative += 10_000.0;
            } else {
                cumulative += 40_000.0; // 4x burst
                price -= 0.05;
            }
            store.update(vec![ticker("WHLUSDT", price, cumulative, i + 1)]);
            det.update();
            clock.advance_ms(10_000);
        }

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].activity, WhaleActivity::LargeSell);
        assert_eq!(alerts[0].direction, Direction::Short);
    }

    #[test]
    fn small_flow_is_ignored() {
        let (clock, store, det) = setup();

        let mut cumulative = 1_000_000.0;
        for i in 0..60 {
            cumulative += if i < 50 { 1_000.0 } else { 5_000.0 };
            store.update(vec![ticker("WHLUSDT", 100.0, cumulative, i + 1)]);
            det.update();
            clock.advance_ms(10_000);
        }

        // 5x ratio but only $50K of flow: below the absolute floor.
        assert!(det.detect().is_empty());
    }
}
