// =============================================================================
// Range Detector — wide 24h range screen with in-range positioning
// =============================================================================

use std::sync::Arc;

use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

/// Where the last price sits inside the 24h range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RangePosition {
    /// Within 0.1% of either extreme.
    Breaking,
    /// Top 20% of the range.
    NearHigh,
    /// Bottom 20% of the range.
    NearLow,
    Middle,
}

impl std::fmt::Display for RangePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Breaking => write!(f, "BREAKING"),
            Self::NearHigh => write!(f, "NEAR_HIGH"),
            Self::NearLow => write!(f, "NEAR_LOW"),
            Self::Middle => write!(f, "MIDDLE"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeAlert {
    pub symbol: String,
    /// (high - low) / open, percent.
    pub range_pct: f64,
    pub high_24h: f64,
    pub low_24h: f64,
    pub current_price: f64,
    pub position: RangePosition,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct RangeDetector {
    store: Arc<DataStore>,
    min_range: f64,
}

impl RangeDetector {
    pub fn new(store: Arc<DataStore>, min_range: f64) -> Self {
        Self { store, min_range }
    }

    pub fn detect(&self) -> Vec<RangeAlert> {
        let now = self.store.clock().now_ms();
        let mut alerts = Vec::new();

        for t in self.store.all_currents() {
            if t.open_price <= 0.0 || t.high_price <= t.low_price {
                continue;
            }

            let range_pct = (t.high_price - t.low_price) / t.open_price * 100.0;
            if range_pct < self.min_range {
                continue;
            }

            let position = classify_position(t.last_price, t.high_price, t.low_price);
            let direction = match position {
                RangePosition::NearHigh => Direction::Long,
                RangePosition::NearLow => Direction::Short,
                // A break resolves in the direction of the touched extreme.
                RangePosition::Breaking => {
                    if (t.high_price - t.last_price).abs() <= (t.last_price - t.low_price).abs() {
                        Direction::Long
                    } else {
                        Direction::Short
                    }
                }
                RangePosition::Middle => Direction::Neutral,
            };

            alerts.push(RangeAlert {
                symbol: t.symbol,
                range_pct,
                high_24h: t.high_price,
                low_24h: t.low_price,
                current_price: t.last_price,
                position,
                direction,
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.range_pct);
        alerts
    }
}

fn classify_position(price: f64, high: f64, low: f64) -> RangePosition {
    let span = high - low;
    // Breaking takes precedence: within 0.1% of either extreme.
    if (high - price).abs() / high <= 0.001 || (price - low).abs() / low <= 0.001 {
        return RangePosition::Breaking;
    }
    let pos = (price - low) / span;
    if pos >= 0.8 {
        RangePosition::NearHigh
    } else if pos <= 0.2 {
        RangePosition::NearLow
    } else {
        RangePosition::Middle
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

    fn ticker(symbol: &str, open: f64, last: f64, high: f64, low: f64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: last,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: open,
            high_price: high,
            low_price: low,
            base_volume: 0.0,
            quote_volume: 1e7,
            trade_count: 0,
            event_time: 1,
        }
    }

    fn setup() -> (Arc<DataStore>, RangeDetector) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock, 5, 60));
        let det = RangeDetector::new(store.clone(), 15.0);
        (store, det)
    }

    #[test]
    fn narrow_range_is_silent() {
        let (store, det) = setup();
        store.update(vec![ticker("AAAUSDT", 100.0, 101.0, 105.0, 95.0)]); // 10%
        assert!(det.detect().is_empty());
    }

    #[test]
    fn wide_range_positions() {
        let (store, det) = setup();
        store.update(vec![
            ticker("HIGUSDT", 100.0, 118.0, 120.0, 100.0), // top 20 percent
            ticker("LOWUSDT", 100.0, 103.0, 120.0, 100.0), // bottom 20 percent
            ticker("MIDUSDT", 100.0, 110.0, 120.0, 100.0),
            ticker("BRKUSDT", 100.0, 119.99, 120.0, 100.0), // within 0.1 percent of high
        ]);

        let alerts = det.detect();
        assert_eq!(alerts.len(), 4);

        let by_symbol = |s: &str| alerts.iter().find(|a| a.symbol == s).unwrap().clone();
        assert_eq!(by_symbol("HIGUSDT").position, RangePosition::NearHigh);
        assert_eq!(by_symbol("HIGUSDT").direction, Direction::Long);
        assert_eq!(by_symbol("LOWUSDT").position, RangePosition::NearLow);
        assert_eq!(by_symbol("LOWUSDT").direction, Direction::Short);
        assert_eq!(by_symbol("MIDUSDT").position, RangePosition::Middle);
        assert_eq!(by_symbol("BRKUSDT").position, RangePosition::Breaking);
        assert_eq!(by_symbol("BRKUSDT").direction, Direction::Long);
    }

    #[test]
    fn range_pct_matches_definition() {
        let (store, det) = setup();
        store.update(vec![ticker("AAAUSDT", 100.0, 110.0, 125.0, 100.0)]);
        let alerts = det.detect();
        assert!((alerts[0].range_pct - 25.0).abs() < 1e-9);
    }
}
