// =============================================================================
// Volume Detector — cumulative-volume flow-rate spike screen
// =============================================================================
//
// The exchange reports cumulative 24h quote volume, so flow rate is estimated
// from differences between successive snapshots. The estimate is approximate
// near the UTC midnight roll-over when the cumulative counter resets; that is
// accepted as-is.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::{DataStore, Ticker};
use crate::types::Direction;

/// Snapshots retained per symbol.
const TRACKING_DEPTH: usize = 60;

/// Points in the recent flow window.
const RECENT_WINDOW: usize = 10;

/// Points in the older baseline window preceding the recent one.
const BASELINE_WINDOW: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct VolumeAlert {
    pub symbol: String,
    /// Recent flow rate over baseline flow rate.
    pub multiplier: f64,
    pub recent_rate: f64,
    pub baseline_rate: f64,
    pub quote_volume_24h: f64,
    pub current_price: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct VolumeDetector {
    store: Arc<DataStore>,
    spike_multiplier: f64,
    min_quote_volume: f64,
    tracking: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl VolumeDetector {
    pub fn new(store: Arc<DataStore>, spike_multiplier: f64, min_quote_volume: f64) -> Self {
        Self {
            store,
            spike_multiplier,
            min_quote_volume,
            tracking: RwLock::new(HashMap::new()),
        }
    }

    /// Record one cumulative-volume snapshot per symbol in the batch. Called
    /// by the scheduler straight after the store absorbs each ticker batch.
    pub fn update_tracking(&self, batch: &[Ticker]) {
        let mut tracking = self.tracking.write();
        for ticker in batch {
            let ring = tracking
                .entry(ticker.symbol.clone())
                .or_insert_with(|| VecDeque::with_capacity(TRACKING_DEPTH + 1));
            ring.push_back(ticker.quote_volume);
            while ring.len() > TRACKING_DEPTH {
                ring.pop_front();
            }
        }
    }

    pub fn detect(&self) -> Vec<VolumeAlert> {
        let now = self.store.clock().now_ms();
        let tracking = self.tracking.read();
        let mut alerts = Vec::new();

        for (symbol, ring) in tracking.iter() {
            // Need the recent window plus the full baseline behind it.
            if ring.len() < RECENT_WINDOW + BASELINE_WINDOW + 1 {
                continue;
            }

            let n = ring.len();
            let last = ring[n - 1];
            let recent_start = ring[n - 1 - RECENT_WINDOW];
            let baseline_start = ring[n - 1 - RECENT_WINDOW - BASELINE_WINDOW];

            let recent_rate = (last - recent_start) / RECENT_WINDOW as f64;
            let baseline_rate = (recent_start - baseline_start) / BASELINE_WINDOW as f64;
            if baseline_rate <= 0.0 || recent_rate <= 0.0 {
                continue;
            }

            let multiplier = recent_rate / baseline_rate;
            if multiplier < self.spike_multiplier {
                continue;
            }

            let Some(current) = self.store.current(symbol) else {
                continue;
            };
            // Volume floor is a strict cut-off: equal is excluded.
            if current.quote_volume <= self.min_quote_volume {
                continue;
            }

            alerts.push(VolumeAlert {
                symbol: symbol.clone(),
                multiplier,
                recent_rate,
                baseline_rate,
                quote_volume_24h: current.quote_volume,
                current_price: current.last_price,
                direction: Direction::from_sign(current.price_change_percent),
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.multiplier);
        alerts
    }

    /// Latest spike multiplier for `symbol`, if it currently clears the gate.
    pub fn multiplier_for(&self, symbol: &str) -> Option<f64> {
        self.detect()
            .into_iter()
            .find(|a| a.symbol == symbol)
            .map(|a| a.multiplier)
    }

    /// Flow multiplier for `symbol` regardless of the emission gates. Fusion
    /// and feature building read this; only `detect` applies the thresholds.
    pub fn raw_multiplier_for(&self, symbol: &str) -> Option<f64> {
        let tracking = self.tracking.read();
        let ring = tracking.get(symbol)?;
        if ring.len() < RECENT_WINDOW + BASELINE_WINDOW + 1 {
            return None;
        }

        let n = ring.len();
        let recent_rate = (ring[n - 1] - ring[n - 1 - RECENT_WINDOW]) / RECENT_WINDOW as f64;
        let baseline_rate = (ring[n - 1 - RECENT_WINDOW] - ring[n - 1 - RECENT_WINDOW - BASELINE_WINDOW])
            / BASELINE_WINDOW as f64;
        (baseline_rate > 0.0).then(|| recent_rate / baseline_rate)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;

    fn ticker(symbol: &str, qv: f64, pct: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 10.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 10.0,
            high_price: 10.0,
            low_price: 10.0,
            base_volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time,
        }
    }

    fn setup() -> (Clock, Arc<DataStore>, VolumeDetector) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock.clone(), 5, 60));
        let det = VolumeDetector::new(store.clone(), 3.0, 1_000_000.0);
        (clock, store, det)
    }

    /// Feed 60 snapshots: +100 per step for the first 50, +400 for the last
    /// 10. The spike multiplier comes out at 4.0.
    #[test]
    fn volume_spike_scenario() {
        let (clock, store, det) = setup();

        let mut cumulative = 2_000_000.0; // comfortably above the 1M floor
        for i in 0..60 {
            cumulative += if i < 50 { 100.0 } else { 400.0 };
            let t = ticker("BBBUSDT", cumulative, 4.2, i + 1);
            store.update(vec![t.clone()]);
            det.update_tracking(&[t]);
            clock.advance_ms(2_000);
        }

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert!((a.multiplier - 4.0).abs() < 1e-9, "multiplier {}", a.multiplier);
        assert_eq!(a.direction, Direction::Long);
    }

    #[test]
    fn volume_floor_is_strict() {
        let (clock, store, det) = setup();

        // Same spike shape, but the 24h quote volume ends exactly on the
        // floor: the equality case is excluded.
        let mut cumulative = 1_000_000.0 - 9_000.0;
        for i in 0..60 {
            cumulative += if i < 50 { 100.0 } else { 400.0 };
            let t = ticker("BBBUSDT", cumulative, 1.0, i + 1);
            store.update(vec![t.clone()]);
            det.update_tracking(&[t]);
            clock.advance_ms(2_000);
        }
        assert!((cumulative - 1_000_000.0).abs() < 1e-6);
        assert!(det.detect().is_empty());
    }

    #[test]
    fn steady_flow_is_silent() {
        let (clock, store, det) = setup();
        let mut cumulative = 5_000_000.0;
        for i in 0..60 {
            cumulative += 100.0;
            let t = ticker("BBBUSDT", cumulative, 1.0, i + 1);
            store.update(vec![t.clone()]);
            det.update_tracking(&[t]);
            clock.advance_ms(2_000);
        }
        assert!(det.detect().is_empty());
    }

    #[test]
    fn short_history_is_silent() {
        let (clock, store, det) = setup();
        let mut cumulative = 5_000_000.0;
        for i in 0..20 {
            cumulative += 400.0;
            let t = ticker("BBBUSDT", cumulative, 1.0, i + 1);
            store.update(vec![t.clone()]);
            det.update_tracking(&[t]);
            clock.advance_ms(2_000);
        }
        assert!(det.detect().is_empty());
    }
}
