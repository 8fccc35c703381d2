// =============================================================================
// Sentiment Detector — greed/fear composite
// =============================================================================
//
// Reduces market state to a 0-100 greed/fear score: funding 30%, momentum
// 35%, volatility 15%, open interest 20%. Funding and OI inputs are raw
// exchange data handed over by the scheduler's fan-out; momentum and
// volatility come straight from the store.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

const WEIGHT_FUNDING: f64 = 0.30;
const WEIGHT_MOMENTUM: f64 = 0.35;
const WEIGHT_VOLATILITY: f64 = 0.15;
const WEIGHT_OPEN_INTEREST: f64 = 0.20;

/// Per-symbol score beyond which an alert is emitted.
const EXTREME_SCORE_HIGH: f64 = 75.0;
const EXTREME_SCORE_LOW: f64 = 25.0;

/// Aggregate market mood.
#[derive(Debug, Clone, Serialize)]
pub struct MarketSentiment {
    /// 0 = extreme fear, 100 = extreme greed.
    pub score: f64,
    pub label: &'static str,
    pub funding_component: f64,
    pub momentum_component: f64,
    pub volatility_component: f64,
    pub open_interest_component: f64,
    pub timestamp: i64,
}

/// Per-symbol mood.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolSentiment {
    pub symbol: String,
    pub score: f64,
    pub label: &'static str,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentimentAlert {
    pub symbol: String,
    pub score: f64,
    pub label: &'static str,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct SentimentDetector {
    store: Arc<DataStore>,
    /// Mean funding rate (percent) and per-symbol rates from the last poll.
    funding: RwLock<(f64, HashMap<String, f64>)>,
    /// Mean OI change (percent) and per-symbol changes from the last sweep.
    open_interest: RwLock<(f64, HashMap<String, f64>)>,
}

impl SentimentDetector {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            funding: RwLock::new((0.0, HashMap::new())),
            open_interest: RwLock::new((0.0, HashMap::new())),
        }
    }

    /// Raw funding fan-out from the scheduler's funding poll.
    pub fn set_funding_inputs(&self, mean_rate_pct: f64, per_symbol: HashMap<String, f64>) {
        *self.funding.write() = (mean_rate_pct, per_symbol);
    }

    /// Raw OI-change fan-out from the scheduler's OI sweep.
    pub fn set_open_interest_inputs(&self, mean_change_pct: f64, per_symbol: HashMap<String, f64>) {
        *self.open_interest.write() = (mean_change_pct, per_symbol);
    }

    /// Aggregate greed/fear composite across the whole market.
    pub fn market_sentiment(&self) -> MarketSentiment {
        let now = self.store.clock().now_ms();
        let currents = self.store.all_currents();

        let (mean_change, mean_abs_change) = if currents.is_empty() {
            (0.0, 0.0)
        } else {
            let n = currents.len() as f64;
            (
                currents.iter().map(|t| t.price_change_percent).sum::<f64>() / n,
                currents
                    .iter()
                    .map(|t| t.price_change_percent.abs())
                    .sum::<f64>()
                    / n,
            )
        };

        let funding_component = funding_component(self.funding.read().0);
        let momentum_component = momentum_component(mean_change);
        let volatility_component = volatility_component(mean_abs_change);
        let open_interest_component = oi_component(self.open_interest.read().0);

        let score = funding_component * WEIGHT_FUNDING
            + momentum_component * WEIGHT_MOMENTUM
            + volatility_component * WEIGHT_VOLATILITY
            + open_interest_component * WEIGHT_OPEN_INTEREST;

        MarketSentiment {
            score,
            label: label(score),
            funding_component,
            momentum_component,
            volatility_component,
            open_interest_component,
            timestamp: now,
        }
    }

    /// Per-symbol composite using that symbol's funding and OI where known.
    pub fn symbol_sentiment(&self, symbol: &str) -> Option<SymbolSentiment> {
        let now = self.store.clock().now_ms();
        let current = self.store.current(symbol)?;

        let funding = self.funding.read();
        let oi = self.open_interest.read();
        let rate = funding.1.get(symbol).copied().unwrap_or(funding.0);
        let oi_change = oi.1.get(symbol).copied().unwrap_or(oi.0);

        let score = funding_component(rate) * WEIGHT_FUNDING
            + momentum_component(current.price_change_percent) * WEIGHT_MOMENTUM
            + volatility_component(current.price_change_percent.abs()) * WEIGHT_VOLATILITY
            + oi_component(oi_change) * WEIGHT_OPEN_INTEREST;

        Some(SymbolSentiment {
            symbol: symbol.to_string(),
            score,
            label: label(score),
            timestamp: now,
        })
    }

    /// Alerts for symbols at sentiment extremes.
    pub fn detect(&self) -> Vec<SentimentAlert> {
        let mut alerts = Vec::new();
        for symbol in self.store.tracked_symbols() {
            let Some(s) = self.symbol_sentiment(&symbol) else {
                continue;
            };
            if s.score >= EXTREME_SCORE_HIGH || s.score <= EXTREME_SCORE_LOW {
                alerts.push(SentimentAlert {
                    direction: if s.score >= EXTREME_SCORE_HIGH {
                        Direction::Long
                    } else {
                        Direction::Short
                    },
                    symbol: s.symbol,
                    score: s.score,
                    label: s.label,
                    timestamp: s.timestamp,
                });
            }
        }
        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.score - 50.0);
        alerts
    }
}

/// Positive funding reads as greed; saturates at ±0.1%.
fn funding_component(rate_pct: f64) -> f64 {
    50.0 + (rate_pct / 0.1).clamp(-1.0, 1.0) * 50.0
}

/// Mean 24h move; saturates at ±10%.
fn momentum_component(mean_change_pct: f64) -> f64 {
    50.0 + (mean_change_pct / 10.0).clamp(-1.0, 1.0) * 50.0
}

/// Churn without direction reads as fear; saturates at 20 points of mean
/// absolute move.
fn volatility_component(mean_abs_change_pct: f64) -> f64 {
    50.0 - (mean_abs_change_pct / 20.0).clamp(0.0, 1.0) * 50.0
}

/// Rising participation reads as greed; saturates at ±5%.
fn oi_component(mean_oi_change_pct: f64) -> f64 {
    50.0 + (mean_oi_change_pct / 5.0).clamp(-1.0, 1.0) * 50.0
}

fn label(score: f64) -> &'static str {
    if score >= 80.0 {
        "EXTREME_GREED"
    } else if score >= 60.0 {
        "GREED"
    } else if score > 40.0 {
        "NEUTRAL"
    } else if score > 20.0 {
        "FEAR"
    } else {
        "EXTREME_FEAR"
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

    fn ticker(symbol: &str, pct: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 100.0,
            low_price: 100.0,
            base_volume: 0.0,
            quote_volume: 1e7,
            trade_count: 0,
            event_time,
        }
    }

    fn setup() -> (Arc<DataStore>, SentimentDetector) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock, 5, 60));
        let det = SentimentDetector::new(store.clone());
        (store, det)
    }

    #[test]
    fn components_saturate_and_center() {
        assert!((funding_component(0.0) - 50.0).abs() < 1e-12);
        assert!((funding_component(0.5) - 100.0).abs() < 1e-12);
        assert!((funding_component(-0.5)).abs() < 1e-12);
        assert!((momentum_component(10.0) - 100.0).abs() < 1e-12);
        assert!((volatility_component(0.0) - 50.0).abs() < 1e-12);
        assert!(volatility_component(25.0).abs() < 1e-12);
        assert!((oi_component(5.0) - 100.0).abs() < 1e-12);
    }

    #[test]
    fn label_bands() {
        assert_eq!(label(90.0), "EXTREME_GREED");
        assert_eq!(label(65.0), "GREED");
        assert_eq!(label(50.0), "NEUTRAL");
        assert_eq!(label(30.0), "FEAR");
        assert_eq!(label(10.0), "EXTREME_FEAR");
    }

    #[test]
    fn greedy_market_scores_high() {
        let (store, det) = setup();
        store.update(vec![
            ticker("AAAUSDT", 8.0, 1),
            ticker("BBBUSDT", 6.0, 1),
        ]);
        det.set_funding_inputs(0.08, HashMap::new());
        det.set_open_interest_inputs(4.0, HashMap::new());

        let market = det.market_sentiment();
        assert!(market.score > 60.0, "score {}", market.score);
        assert!(matches!(market.label, "GREED" | "EXTREME_GREED"));
    }

    #[test]
    fn fearful_market_scores_low() {
        let (store, det) = setup();
        store.update(vec![
            ticker("AAAUSDT", -9.0, 1),
            ticker("BBBUSDT", -7.0, 1),
        ]);
        det.set_funding_inputs(-0.09, HashMap::new());
        det.set_open_interest_inputs(-4.0, HashMap::new());

        let market = det.market_sentiment();
        assert!(market.score < 40.0, "score {}", market.score);
        assert!(matches!(market.label, "FEAR" | "EXTREME_FEAR"));
    }

    #[test]
    fn weights_sum_to_one() {
        let total = WEIGHT_FUNDING + WEIGHT_MOMENTUM + WEIGHT_VOLATILITY + WEIGHT_OPEN_INTEREST;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn extreme_symbols_emit_alerts() {
        let (store, det) = setup();
        store.update(vec![ticker("HOTUSDT", 10.0, 1), ticker("MEHUSDT", 0.5, 1)]);
        let mut per_symbol = HashMap::new();
        per_symbol.insert("HOTUSDT".to_string(), 0.1);
        det.set_funding_inputs(0.0, per_symbol);
        det.set_open_interest_inputs(0.0, HashMap::new());

        let alerts = det.detect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].symbol, "HOTUSDT");
        assert_eq!(alerts[0].direction, Direction::Long);
    }
}
