// =============================================================================
// Multi-Timeframe Detector — 15m / 1h / 4h trend alignment
// =============================================================================
//
// Kline polling is expensive, so the detector walks a rotating queue over the
// 50 highest-liquidity symbols, refreshing five per cycle. Each refresh pulls
// 15m, 1h and 4h candles plus the 1h Wilder RSI, then classifies alignment,
// divergence and momentum across the three horizons.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::exchange::FuturesRestClient;
use crate::market_data::{Candle, DataStore};
use crate::types::{Direction, DivergenceType, MtfAlignment, TrendState};

/// Liquidity universe size.
const UNIVERSE_SIZE: usize = 50;

/// Symbols refreshed per update cycle.
const REFRESH_PER_CYCLE: usize = 5;

/// Candles fetched per timeframe window.
const BARS_PER_TIMEFRAME: u32 = 6;

/// Per-timeframe move treated as strong, percent.
const STRONG_MOVE_PCT: f64 = 2.0;

/// Opposing 4h move needed to call a divergence, percent.
const DIVERGENCE_PCT: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct MtfAlert {
    pub symbol: String,
    pub change_15m: f64,
    pub change_1h: f64,
    pub change_4h: f64,
    pub rsi_1h: f64,
    pub alignment: MtfAlignment,
    pub divergence: DivergenceType,
    pub momentum: TrendState,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct MultiTimeframeDetector {
    client: Arc<FuturesRestClient>,
    store: Arc<DataStore>,
    rotation: RwLock<VecDeque<String>>,
    cache: RwLock<HashMap<String, MtfAlert>>,
}

impl MultiTimeframeDetector {
    pub fn new(client: Arc<FuturesRestClient>, store: Arc<DataStore>) -> Self {
        Self {
            client,
            store,
            rotation: RwLock::new(VecDeque::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Refresh the next five symbols in the rotation. Failed symbols keep
    /// their previous cache entry.
    pub async fn update(&self) {
        let batch = self.next_batch();
        if batch.is_empty() {
            return;
        }

        for symbol in batch {
            match self.analyze_symbol(&symbol).await {
                Ok(Some(alert)) => {
                    self.cache.write().insert(symbol, alert);
                }
                Ok(None) => {
                    // Not enough candles yet; drop any stale entry.
                    self.cache.write().remove(&symbol);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "mtf refresh failed — keeping previous");
                }
            }
        }
    }

    pub fn detect(&self) -> Vec<MtfAlert> {
        let mut alerts: Vec<MtfAlert> = self.cache.read().values().cloned().collect();
        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| {
            (a.change_15m.abs() + a.change_1h.abs() + a.change_4h.abs()) / 3.0
        });
        alerts
    }

    pub fn alert_for(&self, symbol: &str) -> Option<MtfAlert> {
        self.cache.read().get(symbol).cloned()
    }

    /// Pop the next refresh batch, rebuilding the rotation from the current
    /// top-50 liquidity universe whenever it runs dry.
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
            debug!(universe = rotation.len(), "mtf rotation rebuilt");
        }

        let take = REFRESH_PER_CYCLE.min(rotation.len());
        rotation.drain(..take).collect()
    }

    async fn analyze_symbol(&self, symbol: &str) -> anyhow::Result<Option<MtfAlert>> {
        let c15 = self.client.get_klines(symbol, "15m", BARS_PER_TIMEFRAME).await?;
        let c1h = self.client.get_klines(symbol, "1h", BARS_PER_TIMEFRAME).await?;
        let c4h = self.client.get_klines(symbol, "4h", BARS_PER_TIMEFRAME).await?;

        let (Some(change_15m), Some(change_4h)) = (window_change(&c15), window_change(&c4h))
        else {
            return Ok(None);
        };
        let Some(change_1h) = window_change(&c1h) else {
            return Ok(None);
        };

        let rsi_1h = self.client.get_symbol_rsi(symbol, "1h").await.unwrap_or(50.0);

        let alignment = classify_alignment(change_15m, change_1h, change_4h);
        let divergence = classify_divergence(change_15m, change_4h);
        let momentum = classify_momentum(change_15m, change_1h, change_4h);
        let direction = Direction::from_sign(alignment.encode() as f64);

        Ok(Some(MtfAlert {
            symbol: symbol.to_string(),
            change_15m,
            change_1h,
            change_4h,
            rsi_1h,
            alignment,
            divergence,
            momentum,
            direction,
            timestamp: self.store.clock().now_ms(),
        }))
    }
}

/// Percent change across a candle window (first close to last close).
fn window_change(candles: &[Candle]) -> Option<f64> {
    if candles.len() < 2 {
        return None;
    }
    let first = candles.first()?.close;
    let last = candles.last()?.close;
    (first != 0.0).then(|| (last - first) / first * 100.0)
}

fn classify_alignment(c15: f64, c1h: f64, c4h: f64) -> MtfAlignment {
    let all_positive = c15 > 0.0 && c1h > 0.0 && c4h > 0.0;
    let all_negative = c15 < 0.0 && c1h < 0.0 && c4h < 0.0;
    let all_strong =
        c15.abs() >= STRONG_MOVE_PCT && c1h.abs() >= STRONG_MOVE_PCT && c4h.abs() >= STRONG_MOVE_PCT;

    if all_positive && all_strong {
        MtfAlignment::StrongBullish
    } else if all_positive {
        MtfAlignment::Bullish
    } else if all_negative && all_strong {
        MtfAlignment::StrongBearish
    } else if all_negative {
        MtfAlignment::Bearish
    } else {
        MtfAlignment::Mixed
    }
}

fn classify_divergence(c15: f64, c4h: f64) -> DivergenceType {
    if c15 > 0.0 && c4h <= -DIVERGENCE_PCT {
        DivergenceType::BullishDivergence
    } else if c15 < 0.0 && c4h >= DIVERGENCE_PCT {
        DivergenceType::BearishDivergence
    } else {
        DivergenceType::None
    }
}

/// Shorter horizons outrunning longer ones reads as acceleration.
fn classify_momentum(c15: f64, c1h: f64, c4h: f64) -> TrendState {
    if c15.abs() > c1h.abs() && c1h.abs() > c4h.abs() {
        TrendState::Accelerating
    } else if c15.abs() < c1h.abs() && c1h.abs() < c4h.abs() {
        TrendState::Decelerating
    } else {
        TrendState::Steady
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_classification() {
        assert_eq!(classify_alignment(3.0, 2.5, 2.1), MtfAlignment::StrongBullish);
        assert_eq!(classify_alignment(0.5, 0.4, 0.3), MtfAlignment::Bullish);
        assert_eq!(classify_alignment(-3.0, -2.5, -2.1), MtfAlignment::StrongBearish);
        assert_eq!(classify_alignment(-0.5, -0.4, -0.3), MtfAlignment::Bearish);
        assert_eq!(classify_alignment(1.0, -0.5, 2.0), MtfAlignment::Mixed);
    }

    #[test]
    fn divergence_requires_opposing_4h() {
        assert_eq!(
            classify_divergence(1.0, -2.5),
            DivergenceType::BullishDivergence
        );
        assert_eq!(
            classify_divergence(-0.5, 2.0),
            DivergenceType::BearishDivergence
        );
        assert_eq!(classify_divergence(1.0, -1.5), DivergenceType::None);
        assert_eq!(classify_divergence(1.0, 2.0), DivergenceType::None);
    }

    #[test]
    fn momentum_ordering() {
        assert_eq!(classify_momentum(3.0, 2.0, 1.0), TrendState::Accelerating);
        assert_eq!(classify_momentum(1.0, 2.0, 3.0), TrendState::Decelerating);
        assert_eq!(classify_momentum(2.0, 2.0, 1.0), TrendState::Steady);
    }

    #[test]
    fn window_change_needs_two_closes() {
        let one = vec![Candle::new(0, 1.0, 1.0, 1.0, 100.0, 1.0, 0)];
        assert!(window_change(&one).is_none());

        let two = vec![
            Candle::new(0, 100.0, 100.0, 100.0, 100.0, 1.0, 0),
            Candle::new(0, 100.0, 103.0, 100.0, 103.0, 1.0, 0),
        ];
        assert!((window_change(&two).unwrap() - 3.0).abs() < 1e-9);
    }
}
