// =============================================================================
// Pattern Detector — key levels and double top/bottom formations
// =============================================================================
//
// Works over 48 hourly candles per symbol, refreshed five symbols per cycle
// across the top-30 liquidity universe (kline polling is rationed the same
// way as the multi-timeframe scan). Identifies:
//
//   - proximity (within 2%) to key levels: the 24h high/low, round numbers,
//     and multi-touch clusters with at least three bar-extreme touches;
//   - double top / double bottom formations in the last 20 closes, where the
//     two halves' extremes agree within 2% and the current close has moved
//     at least 2% off the formation.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::exchange::FuturesRestClient;
use crate::market_data::{Candle, DataStore};
use crate::types::Direction;

const UNIVERSE_SIZE: usize = 30;
const REFRESH_PER_CYCLE: usize = 5;
const CANDLE_COUNT: u32 = 48;

/// Proximity band around a level, percent.
const LEVEL_PROXIMITY_PCT: f64 = 2.0;

/// Tolerance for clustering bar extremes into one level, percent.
const CLUSTER_TOLERANCE_PCT: f64 = 0.5;

/// Touches needed before a cluster counts as a level.
const MIN_CLUSTER_TOUCHES: usize = 3;

/// Closes examined for double formations.
const FORMATION_WINDOW: usize = 20;

/// Agreement between the two formation extremes, and the reclaim off the
/// formation, percent.
const FORMATION_TOLERANCE_PCT: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PatternKind {
    NearHigh24h,
    NearLow24h,
    RoundNumber,
    TouchCluster,
    DoubleTop,
    DoubleBottom,
}

impl PatternKind {
    /// Stable feature encoding; 0 is reserved for "no pattern".
    pub fn encode(self) -> u8 {
        match self {
            Self::NearHigh24h => 1,
            Self::NearLow24h => 2,
            Self::RoundNumber => 3,
            Self::TouchCluster => 4,
            Self::DoubleTop => 5,
            Self::DoubleBottom => 6,
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NearHigh24h => write!(f, "NEAR_24H_HIGH"),
            Self::NearLow24h => write!(f, "NEAR_24H_LOW"),
            Self::RoundNumber => write!(f, "ROUND_NUMBER"),
            Self::TouchCluster => write!(f, "TOUCH_CLUSTER"),
            Self::DoubleTop => write!(f, "DOUBLE_TOP"),
            Self::DoubleBottom => write!(f, "DOUBLE_BOTTOM"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternAlert {
    pub symbol: String,
    pub kind: PatternKind,
    pub level: f64,
    /// Signed distance of price from the level, percent of the level.
    pub distance_pct: f64,
    pub confidence: f64,
    pub current_price: f64,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct PatternDetector {
    client: Arc<FuturesRestClient>,
    store: Arc<DataStore>,
    rotation: RwLock<VecDeque<String>>,
    cache: RwLock<HashMap<String, Vec<PatternAlert>>>,
}

impl PatternDetector {
    pub fn new(client: Arc<FuturesRestClient>, store: Arc<DataStore>) -> Self {
        Self {
            client,
            store,
            rotation: RwLock::new(VecDeque::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn update(&self) {
        let batch = self.next_batch();
        for symbol in batch {
            match self.client.get_klines(&symbol, "1h", CANDLE_COUNT).await {
                Ok(candles) => {
                    let Some(current) = self.store.current(&symbol) else {
                        continue;
                    };
                    let now = self.store.clock().now_ms();
                    let alerts = analyze(
                        &symbol,
                        &candles,
                        current.last_price,
                        current.high_price,
                        current.low_price,
                        now,
                    );
                    self.cache.write().insert(symbol, alerts);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "pattern refresh failed — keeping previous");
                }
            }
        }
    }

    pub fn detect(&self) -> Vec<PatternAlert> {
        let mut alerts: Vec<PatternAlert> =
            self.cache.read().values().flatten().cloned().collect();
        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.confidence);
        alerts
    }

    /// Best pattern for `symbol`, for feature encoding.
    pub fn pattern_for(&self, symbol: &str) -> Option<PatternAlert> {
        self.cache.read().get(symbol).and_then(|alerts| {
            alerts
                .iter()
                .max_by(|a, b| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned()
        })
    }

    fn next_batch(&self) -> Vec<String> {
        let mut rotation = self.rotation.write();
        if rotation.is_empty() {
            let mut currents = self.store.all_currents();
            currents.sort_by(|a, b| {
                b.quote_volume
                    .partial_cmp(&a.quote_volume)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            rotation.extend(currents.into_iter().take(UNIVERSE_SIZE).map(|t| t.symbol));
            debug!(universe = rotation.len(), "pattern rotation rebuilt");
        }
        let take = REFRESH_PER_CYCLE.min(rotation.len());
        rotation.drain(..take).collect()
    }
}

/// Pure analysis over one symbol's candles. Exposed for tests.
fn analyze(
    symbol: &str,
    candles: &[Candle],
    price: f64,
    high_24h: f64,
    low_24h: f64,
    now: i64,
) -> Vec<PatternAlert> {
    let mut alerts = Vec::new();
    if price <= 0.0 || candles.len() < FORMATION_WINDOW {
        return alerts;
    }

    let mut push_level = |kind: PatternKind, level: f64, confidence: f64| {
        if level <= 0.0 {
            return;
        }
        let distance_pct = (price - level) / level * 100.0;
        if distance_pct.abs() > LEVEL_PROXIMITY_PCT {
            return;
        }
        // Below a level it acts as resistance, above as support.
        let direction = if distance_pct < 0.0 {
            Direction::Short
        } else {
            Direction::Long
        };
        alerts.push(PatternAlert {
            symbol: symbol.to_string(),
            kind,
            level,
            distance_pct,
            confidence,
            current_price: price,
            direction,
            timestamp: now,
        });
    };

    push_level(PatternKind::NearHigh24h, high_24h, 55.0);
    push_level(PatternKind::NearLow24h, low_24h, 55.0);
    push_level(PatternKind::RoundNumber, nearest_round_number(price), 50.0);

    for (level, touches) in touch_clusters(candles) {
        push_level(
            PatternKind::TouchCluster,
            level,
            (50.0 + touches as f64 * 10.0).min(90.0),
        );
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let tail = &closes[closes.len() - FORMATION_WINDOW..];
    if let Some((kind, level)) = double_formation(tail) {
        let distance_pct = (price - level) / level * 100.0;
        alerts.push(PatternAlert {
            symbol: symbol.to_string(),
            kind,
            level,
            distance_pct,
            confidence: 70.0,
            current_price: price,
            direction: if kind == PatternKind::DoubleTop {
                Direction::Short
            } else {
                Direction::Long
            },
            timestamp: now,
        });
    }

    alerts
}

/// Nearest "round" price: 1, 2 or 5 times a power of ten.
fn nearest_round_number(price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    let magnitude = 10f64.powf(price.abs().log10().floor());
    [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .min_by(|a, b| {
            (a - price)
                .abs()
                .partial_cmp(&(b - price).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(magnitude)
}

/// Cluster bar extremes into levels touched at least three times.
fn touch_clusters(candles: &[Candle]) -> Vec<(f64, usize)> {
    let mut extremes: Vec<f64> = candles
        .iter()
        .flat_map(|c| [c.high, c.low])
        .filter(|v| *v > 0.0)
        .collect();
    extremes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mut clusters = Vec::new();
    let mut start = 0;
    for i in 1..=extremes.len() {
        let closes_cluster = i == extremes.len()
            || (extremes[i] - extremes[start]) / extremes[start] * 100.0 > CLUSTER_TOLERANCE_PCT;
        if closes_cluster {
            let touches = i - start;
            if touches >= MIN_CLUSTER_TOUCHES {
                let level = extremes[start..i].iter().sum::<f64>() / touches as f64;
                clusters.push((level, touches));
            }
            start = i;
        }
    }
    clusters
}

/// Double top/bottom over the close window: the two halves' extremes agree
/// within tolerance and the current close has moved off the formation by at
/// least the same tolerance.
fn double_formation(closes: &[f64]) -> Option<(PatternKind, f64)> {
    if closes.len() < FORMATION_WINDOW {
        return None;
    }
    let mid = closes.len() / 2;
    let (first, second) = (&closes[..mid], &closes[mid..]);
    let current = *closes.last()?;

    let max1 = first.iter().cloned().fold(f64::MIN, f64::max);
    let max2 = second.iter().cloned().fold(f64::MIN, f64::max);
    let min1 = first.iter().cloned().fold(f64::MAX, f64::min);
    let min2 = second.iter().cloned().fold(f64::MAX, f64::min);

    let tops_agree = (max1 - max2).abs() / max1.max(max2) * 100.0 <= FORMATION_TOLERANCE_PCT;
    let top = max1.max(max2);
    if tops_agree && (top - current) / top * 100.0 >= FORMATION_TOLERANCE_PCT {
        return Some((PatternKind::DoubleTop, top));
    }

    let bottoms_agree = (min1 - min2).abs() / min1.min(min2) * 100.0 <= FORMATION_TOLERANCE_PCT;
    let bottom = min1.min(min2);
    if bottoms_agree && (current - bottom) / bottom * 100.0 >= FORMATION_TOLERANCE_PCT {
        return Some((PatternKind::DoubleBottom, bottom));
    }

    None
}
