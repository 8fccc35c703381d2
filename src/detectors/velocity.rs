// =============================================================================
// Velocity Detector — short-horizon price rate of change
// =============================================================================
//
// Velocity is the percent move across the rolling price window divided by the
// minutes it spans. The trend label compares against the velocity observed on
// the previous call, so the detector keeps a small per-symbol cache.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::{Direction, TrendState};

#[derive(Debug, Clone, Serialize)]
pub struct VelocityAlert {
    pub symbol: String,
    /// Percent per minute across the window.
    pub velocity: f64,
    /// Velocity minus the previous call's velocity.
    pub acceleration: f64,
    pub trend: TrendState,
    pub current_price: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct VelocityDetector {
    store: Arc<DataStore>,
    /// Minimum |%/min| to emit.
    min_velocity: f64,
    /// Velocity delta beyond which the trend leaves Steady.
    acceleration_threshold: f64,
    previous: RwLock<HashMap<String, f64>>,
}

impl VelocityDetector {
    pub fn new(store: Arc<DataStore>, min_velocity: f64, acceleration_threshold: f64) -> Self {
        Self {
            store,
            min_velocity,
            acceleration_threshold,
            previous: RwLock::new(HashMap::new()),
        }
    }

    pub fn detect(&self) -> Vec<VelocityAlert> {
        let now = self.store.clock().now_ms();
        let mut alerts = Vec::new();
        let mut previous = self.previous.write();

        for symbol in self.store.tracked_symbols() {
            let history = self.store.price_history(&symbol);
            // Velocity needs at least two points.
            if history.len() < 2 {
                continue;
            }

            let first = history.first().expect("len checked");
            let last = history.last().expect("len checked");
            let minutes = (last.ts - first.ts) as f64 / 60_000.0;
            if minutes <= 0.0 || first.value == 0.0 {
                continue;
            }

            let velocity = (last.value - first.value) / first.value * 100.0 / minutes;
            let prev = previous.insert(symbol.clone(), velocity);

            if velocity.abs() < self.min_velocity {
                continue;
            }

            let acceleration = prev.map(|p| velocity.abs() - p.abs()).unwrap_or(0.0);
            let trend = if acceleration > self.acceleration_threshold {
                TrendState::Accelerating
            } else if acceleration < -self.acceleration_threshold {
                TrendState::Decelerating
            } else {
                TrendState::Steady
            };

            alerts.push(VelocityAlert {
                symbol,
                velocity,
                acceleration,
                trend,
                current_price: last.value,
                direction: Direction::from_sign(velocity),
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.velocity);
        alerts
    }

    /// Current velocity and acceleration for `symbol` regardless of the
    /// emission threshold, without touching the previous-call cache. Fusion
    /// and feature building read this.
    pub fn velocity_for(&self, symbol: &str) -> Option<(f64, f64)> {
        let history = self.store.price_history(symbol);
        if history.len() < 2 {
            return None;
        }

        let first = history.first()?;
        let last = history.last()?;
        let minutes = (last.ts - first.ts) as f64 / 60_000.0;
        if minutes <= 0.0 || first.value == 0.0 {
            return None;
        }

        let velocity = (last.value - first.value) / first.value * 100.0 / minutes;
        let acceleration = self
            .previous
            .read()
            .get(symbol)
            .map(|p| velocity.abs() - p.abs())
            .unwrap_or(0.0);
        Some((velocity, acceleration))
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

    fn ticker(symbol: &str, price: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: price,
            high_price: price,
            low_price: price,
            base_volume: 0.0,
            quote_volume: 1e7,
            trade_count: 0,
            event_time,
        }
    }

    fn setup() -> (Clock, Arc<DataStore>, VelocityDetector) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock.clone(), 5, 60));
        let det = VelocityDetector::new(store.clone(), 0.5, 0.1);
        (clock, store, det)
    }

    #[test]
    fn single_point_never_appears() {
        let (_clock, store, det) = setup();
        store.update(vec![ticker("AAAUSDT", 100.0, 1)]);
        assert!(det.detect().is_empty());
    }

    #[test]
    fn fast_move_emits_with_direction() {
        let (clock, store, det) = setup();
        store.update(vec![ticker("AAAUSDT", 100.0, 1)]);
        clock.advance_ms(60_000);
        store.update(vec![ticker("AAAUSDT", 101.0, 2)]); // +1% in 1 minute

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        assert!((alerts[0].velocity - 1.0).abs() < 1e-9);
        assert_eq!(alerts[0].direction, Direction::Long);
    }

    #[test]
    fn slow_drift_is_silent() {
        let (clock, store, det) = setup();
        store.update(vec![ticker("AAAUSDT", 100.0, 1)]);
        clock.advance_ms(4 * 60_000);
        store.update(vec![ticker("AAAUSDT", 100.4, 2)]); // 0.1 %/min

        assert!(det.detect().is_empty());
    }

    #[test]
    fn trend_classification_uses_previous_call() {
        let (clock, store, det) = setup();
        store.update(vec![ticker("AAAUSDT", 100.0, 1)]);
        clock.advance_ms(60_000);
        store.update(vec![ticker("AAAUSDT", 101.0, 2)]);

        // First sighting: no previous velocity, trend is Steady.
        let first = det.detect();
        assert_eq!(first[0].trend, TrendState::Steady);

        // Window speeds up: velocity rises, trend flips to Accelerating.
        clock.advance_ms(60_000);
        store.update(vec![ticker("AAAUSDT", 104.0, 3)]);
        let second = det.detect();
        assert_eq!(second[0].trend, TrendState::Accelerating);
        assert!(second[0].acceleration > 0.1);
    }
}
