// =============================================================================
// Top Picker — cross-detector symbol ranking
// =============================================================================
//
// The one detector allowed to look at the others. It folds every active
// alert cache into a single per-symbol opportunity score and keeps the top
// ten. The dependency is strictly one-way: nothing reads the TopPicker back.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

use super::{
    CorrelationDetector, FundingDetector, LiquidationDetector, MultiTimeframeDetector,
    PatternDetector, RangeDetector, VelocityDetector, VolatilityDetector, VolumeDetector,
    WhaleDetector,
};

/// Picks retained per cycle.
const MAX_PICKS: usize = 10;

#[derive(Debug, Clone, Serialize)]
pub struct TopPickAlert {
    pub symbol: String,
    pub score: f64,
    /// Which screens contributed, for the dashboard.
    pub reasons: Vec<String>,
    pub direction: Direction,
    pub current_price: f64,
    pub timestamp: i64,
}

pub struct TopPicker {
    store: Arc<DataStore>,
    volatility: Arc<VolatilityDetector>,
    volume: Arc<VolumeDetector>,
    velocity: Arc<VelocityDetector>,
    range: Arc<RangeDetector>,
    funding: Arc<FundingDetector>,
    mtf: Arc<MultiTimeframeDetector>,
    whale: Arc<WhaleDetector>,
    pattern: Arc<PatternDetector>,
    liquidation: Arc<LiquidationDetector>,
    correlation: Arc<CorrelationDetector>,
    cache: RwLock<Vec<TopPickAlert>>,
}

#[allow(clippy::too_many_arguments)]
impl TopPicker {
    pub fn new(
        store: Arc<DataStore>,
        volatility: Arc<VolatilityDetector>,
        volume: Arc<VolumeDetector>,
        velocity: Arc<VelocityDetector>,
        range: Arc<RangeDetector>,
        funding: Arc<FundingDetector>,
        mtf: Arc<MultiTimeframeDetector>,
        whale: Arc<WhaleDetector>,
        pattern: Arc<PatternDetector>,
        liquidation: Arc<LiquidationDetector>,
        correlation: Arc<CorrelationDetector>,
    ) -> Self {
        Self {
            store,
            volatility,
            volume,
            velocity,
            range,
            funding,
            mtf,
            whale,
            pattern,
            liquidation,
            correlation,
            cache: RwLock::new(Vec::new()),
        }
    }

    /// Rebuild the ranking from the current detector caches.
    pub fn update(&self) {
        let now = self.store.clock().now_ms();

        struct Tally {
            score: f64,
            reasons: Vec<String>,
            votes: i64,
        }
        let mut tallies: HashMap<String, Tally> = HashMap::new();

        let mut add = |symbol: &str, points: f64, reason: &str, direction: Direction| {
            let tally = tallies.entry(symbol.to_string()).or_insert(Tally {
                score: 0.0,
                reasons: Vec::new(),
                votes: 0,
            });
            tally.score += points;
            tally.reasons.push(reason.to_string());
            tally.votes += direction.encode() as i64;
        };

        for a in self.volatility.detect() {
            let weight = if a.is_critical { 1.5 } else { 1.0 };
            add(&a.symbol, a.change_24h.abs() * weight, "volatility", a.direction);
        }
        for a in self.volume.detect() {
            add(&a.symbol, a.multiplier * 5.0, "volume_spike", a.direction);
        }
        for a in self.velocity.detect() {
            add(&a.symbol, a.velocity.abs() * 10.0, "velocity", a.direction);
        }
        for a in self.range.detect() {
            add(&a.symbol, a.range_pct * 0.5, "wide_range", a.direction);
        }
        for a in self.funding.detect() {
            add(&a.symbol, a.strength * 0.2, "funding", a.direction);
        }
        for a in self.mtf.detect() {
            add(
                &a.symbol,
                a.alignment.encode().unsigned_abs() as f64 * 10.0,
                "mtf_alignment",
                a.direction,
            );
        }
        for a in self.whale.detect() {
            add(&a.symbol, a.confidence * 0.3, "whale_flow", a.direction);
        }
        for a in self.pattern.detect() {
            add(&a.symbol, a.confidence * 0.2, "pattern", a.direction);
        }
        for a in self.liquidation.detect() {
            add(
                &a.symbol,
                (a.estimated_notional / 1_000_000.0).min(10.0),
                "liquidation_pressure",
                a.direction,
            );
        }
        for a in self.correlation.detect() {
            add(&a.symbol, a.relative_pct.abs(), "btc_relative", a.direction);
        }

        let mut picks: Vec<TopPickAlert> = tallies
            .into_iter()
            .filter_map(|(symbol, tally)| {
                let current = self.store.current(&symbol)?;
                Some(TopPickAlert {
                    direction: Direction::from_sign(tally.votes as f64),
                    symbol,
                    score: tally.score,
                    reasons: tally.reasons,
                    current_price: current.last_price,
                    timestamp: now,
                })
            })
            .collect();

        super::sort_by_magnitude(&mut picks, |a| &a.symbol, |a| a.score);
        picks.truncate(MAX_PICKS);
        *self.cache.write() = picks;
    }

    pub fn detect(&self) -> Vec<TopPickAlert> {
        self.cache.read().clone()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::exchange::FuturesRestClient;
    use crate::market_data::Ticker;

    fn ticker(symbol: &str, pct: f64, qv: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 100.0,
            low_price: 100.0,
            base_volume: 0.0,
            quote_volume: qv,
            trade_count: 0,
            event_time,
        }
    }

    fn build_picker(store: Arc<DataStore>) -> TopPicker {
        let client = Arc::new(FuturesRestClient::new());
        TopPicker::new(
            store.clone(),
            Arc::new(VolatilityDetector::new(store.clone(), 10.0, 25.0)),
            Arc::new(VolumeDetector::new(store.clone(), 3.0, 1_000_000.0)),
            Arc::new(VelocityDetector::new(store.clone(), 0.5, 0.1)),
            Arc::new(RangeDetector::new(store.clone(), 15.0)),
            Arc::new(FundingDetector::new(client.clone(), store.clone())),
            Arc::new(MultiTimeframeDetector::new(client.clone(), store.clone())),
            Arc::new(WhaleDetector::new(store.clone())),
            Arc::new(PatternDetector::new(client.clone(), store.clone())),
            Arc::new(LiquidationDetector::new(store.clone())),
            Arc::new(CorrelationDetector::new(store)),
        )
    }

    #[test]
    fn ranks_volatile_symbols_above_quiet_ones() {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock, 5, 60));
        store.update(vec![
            ticker("BIGUSDT", 30.0, 2e7, 1),
            ticker("MIDUSDT", 12.0, 2e7, 1),
            ticker("QUIUSDT", 1.0, 2e7, 1),
        ]);

        let picker = build_picker(store);
        picker.update();
        let picks = picker.detect();

        assert_eq!(picks.len(), 2); // quiet symbol contributes nothing
        assert_eq!(picks[0].symbol, "BIGUSDT");
        assert!(picks[0].score > picks[1].score);
        assert_eq!(picks[0].direction, Direction::Long);
        assert!(picks[0].reasons.contains(&"volatility".to_string()));
    }

    #[test]
    fn empty_market_yields_no_picks() {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock, 5, 60));
        let picker = build_picker(store);
        picker.update();
        assert!(picker.detect().is_empty());
    }
}
