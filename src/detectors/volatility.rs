// =============================================================================
// Volatility Detector — 24h price-change screen
// =============================================================================

use std::sync::Arc;

use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

/// A symbol whose 24h move cleared the volatility threshold.
#[derive(Debug, Clone, Serialize)]
pub struct VolatilityAlert {
    pub symbol: String,
    pub change_24h: f64,
    pub current_price: f64,
    pub quote_volume_24h: f64,
    pub is_critical: bool,
    pub direction: Direction,
    pub timestamp: i64,
}

/// Emits when `|change 24h| >= min_change`; marks critical at
/// `>= critical_change`. Direction follows the sign of the move.
pub struct VolatilityDetector {
    store: Arc<DataStore>,
    min_change: f64,
    critical_change: f64,
}

impl VolatilityDetector {
    pub fn new(store: Arc<DataStore>, min_change: f64, critical_change: f64) -> Self {
        Self {
            store,
            min_change,
            critical_change,
        }
    }

    pub fn detect(&self) -> Vec<VolatilityAlert> {
        let now = self.store.clock().now_ms();

        let mut alerts: Vec<VolatilityAlert> = self
            .store
            .all_currents()
            .into_iter()
            .filter(|t| t.price_change_percent.abs() >= self.min_change)
            .map(|t| VolatilityAlert {
                is_critical: t.price_change_percent.abs() >= self.critical_change,
                direction: Direction::from_sign(t.price_change_percent),
                change_24h: t.price_change_percent,
                current_price: t.last_price,
                quote_volume_24h: t.quote_volume,
                symbol: t.symbol,
                timestamp: now,
            })
            .collect();

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.change_24h);
        alerts
    }

    /// Symbols currently in the critical band. The scheduler diffs this set
    /// between snapshot ticks to fire one-shot edge alerts.
    pub fn critical_set(&self) -> std::collections::HashSet<String> {
        self.detect()
            .into_iter()
            .filter(|a| a.is_critical)
            .map(|a| a.symbol)
            .collect()
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

    fn ticker(symbol: &str, open: f64, last: f64, high: f64, low: f64, qv: f64, pct: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: last,
            price_change: last - open,
            price_change_percent: pct,
            open_price: open,
            high_price: high,
            low_price: low,
            base_volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time: 1,
        }
    }

    fn detector() -> (Clock, Arc<DataStore>, VolatilityDetector) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock.clone(), 5, 60));
        let det = VolatilityDetector::new(store.clone(), 10.0, 25.0);
        (clock, store, det)
    }

    #[test]
    fn single_ticker_gate_scenario() {
        // Literal end-to-end scenario: 11% move emits exactly one LONG,
        // non-critical alert.
        let (_clock, store, det) = detector();
        store.update(vec![ticker("AAAUSDT", 100.0, 111.0, 112.0, 99.0, 2e7, 11.0)]);

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.symbol, "AAAUSDT");
        assert_eq!(a.direction, Direction::Long);
        assert!(!a.is_critical);
        assert!((a.change_24h - 11.0).abs() < 1e-12);
    }

    #[test]
    fn below_threshold_is_silent() {
        let (_clock, store, det) = detector();
        store.update(vec![ticker("AAAUSDT", 100.0, 105.0, 106.0, 99.0, 2e7, 5.0)]);
        assert!(det.detect().is_empty());
    }

    #[test]
    fn critical_band_and_sort_order() {
        let (_clock, store, det) = detector();
        store.update(vec![
            ticker("AAAUSDT", 100.0, 112.0, 113.0, 99.0, 2e7, 12.0),
            ticker("BBBUSDT", 100.0, 70.0, 101.0, 69.0, 2e7, -30.0),
            ticker("CCCUSDT", 100.0, 112.0, 113.0, 99.0, 2e7, 12.0),
        ]);

        let alerts = det.detect();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].symbol, "BBBUSDT");
        assert!(alerts[0].is_critical);
        assert_eq!(alerts[0].direction, Direction::Short);
        // Tie between AAA and CCC resolves by symbol.
        assert_eq!(alerts[1].symbol, "AAAUSDT");
        assert_eq!(alerts[2].symbol, "CCCUSDT");

        let critical = det.critical_set();
        assert_eq!(critical.len(), 1);
        assert!(critical.contains("BBBUSDT"));
    }
}
