// =============================================================================
// Entry Timing Detector — ATR-sized trade plans on the 15m chart
// =============================================================================
//
// For each symbol in the rotating top-20 universe, pulls 50 15m candles and
// computes ATR(14), VWAP(20) and RSI(14). The entry thesis is the first
// matching class: pullback near VWAP, reversal at an RSI extreme, breakout
// beyond the prior 20-bar extreme, else momentum. Stops sit 2 ATR away with
// targets at 1.5 / 3 / 5 ATR; plans below a 1.5 reward-to-risk are dropped.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::exchange::FuturesRestClient;
use crate::indicators::{atr, rsi, vwap};
use crate::market_data::{Candle, DataStore};
use crate::types::{Direction, EntryType};

const UNIVERSE_SIZE: usize = 20;
const REFRESH_PER_CYCLE: usize = 5;
const CANDLE_COUNT: u32 = 50;

const ATR_PERIOD: usize = 14;
const VWAP_WINDOW: usize = 20;
const RSI_PERIOD: usize = 14;

/// VWAP proximity that reads as a pullback entry, percent.
const PULLBACK_VWAP_PCT: f64 = 0.5;

const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;

/// Bars behind the current one defining the breakout box.
const BREAKOUT_LOOKBACK: usize = 20;

const SL_ATR: f64 = 2.0;
const TP_ATR: [f64; 3] = [1.5, 3.0, 5.0];

/// Minimum reward-to-risk (furthest target over stop distance) to keep.
const MIN_RISK_REWARD: f64 = 1.5;

#[derive(Debug, Clone, Serialize)]
pub struct EntryTimingAlert {
    pub symbol: String,
    pub entry_type: EntryType,
    pub direction: Direction,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub take_profit_3: f64,
    pub atr: f64,
    pub atr_pct: f64,
    pub vwap: f64,
    pub vwap_distance_pct: f64,
    pub rsi: f64,
    pub risk_reward: f64,
    pub timestamp: i64,
}

pub struct EntryTimingDetector {
    client: Arc<FuturesRestClient>,
    store: Arc<DataStore>,
    rotation: RwLock<VecDeque<String>>,
    cache: RwLock<HashMap<String, EntryTimingAlert>>,
}

impl EntryTimingDetector {
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
            match self.client.get_klines(&symbol, "15m", CANDLE_COUNT).await {
                Ok(candles) => {
                    let now = self.store.clock().now_ms();
                    match plan_entry(&symbol, &candles, now) {
                        Some(alert) => {
                            self.cache.write().insert(symbol, alert);
                        }
                        None => {
                            self.cache.write().remove(&symbol);
                        }
                    }
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "entry timing refresh failed — keeping previous");
                }
            }
        }
    }

    pub fn detect(&self) -> Vec<EntryTimingAlert> {
        let mut alerts: Vec<EntryTimingAlert> = self.cache.read().values().cloned().collect();
        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.risk_reward);
        alerts
    }

    pub fn plan_for(&self, symbol: &str) -> Option<EntryTimingAlert> {
        self.cache.read().get(symbol).cloned()
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
            debug!(universe = rotation.len(), "entry timing rotation rebuilt");
        }
        let take = REFRESH_PER_CYCLE.min(rotation.len());
        rotation.drain(..take).collect()
    }
}

/// Build the trade plan for one symbol, or None when the data is too short or
/// the plan fails the reward-to-risk gate.
fn plan_entry(symbol: &str, candles: &[Candle], now: i64) -> Option<EntryTimingAlert> {
    if candles.len() < BREAKOUT_LOOKBACK + 1 {
        return None;
    }

    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let price = *closes.last()?;

    let atr_value = atr::calculate_atr(candles, ATR_PERIOD)?;
    let atr_pct = atr::calculate_atr_pct(candles, ATR_PERIOD)?;
    let vwap_value = vwap::calculate_vwap(candles, VWAP_WINDOW)?;
    let vwap_distance = vwap::vwap_distance_pct(candles, VWAP_WINDOW, price)?;
    let rsi_value = rsi::current_rsi(&closes, RSI_PERIOD).map(|(v, _)| v)?;

    // Box of the 20 bars preceding the current one.
    let lookback = &candles[candles.len() - 1 - BREAKOUT_LOOKBACK..candles.len() - 1];
    let box_high = lookback.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let box_low = lookback.iter().map(|c| c.low).fold(f64::MAX, f64::min);

    // First matching thesis wins.
    let (entry_type, direction) = if vwap_distance.abs() <= PULLBACK_VWAP_PCT {
        // Sitting on VWAP: trade the prevailing window drift.
        let drift = price - closes.first().copied().unwrap_or(price);
        (EntryType::Early, Direction::from_sign(drift))
    } else if rsi_value >= RSI_OVERBOUGHT {
        (EntryType::Reversal, Direction::Short)
    } else if rsi_value <= RSI_OVERSOLD {
        (EntryType::Reversal, Direction::Long)
    } else if price > box_high {
        (EntryType::Breakout, Direction::Long)
    } else if price < box_low {
        (EntryType::Breakout, Direction::Short)
    } else {
        let drift = price - closes.first().copied().unwrap_or(price);
        (EntryType::Momentum, Direction::from_sign(drift))
    };

    if direction == Direction::Neutral {
        return None;
    }

    let sign = direction.encode() as f64;
    let stop_loss = price - sign * SL_ATR * atr_value;
    let targets: Vec<f64> = TP_ATR.iter().map(|m| price + sign * m * atr_value).collect();

    let risk = (price - stop_loss).abs();
    let reward = (targets[2] - price).abs();
    if risk <= 0.0 {
        return None;
    }
    let risk_reward = reward / risk;
    if risk_reward < MIN_RISK_REWARD {
        return None;
    }

    Some(EntryTimingAlert {
        symbol: symbol.to_string(),
        entry_type,
        direction,
        entry_price: price,
        stop_loss,
        take_profit_1: targets[0],
        take_profit_2: targets[1],
        take_profit_3: targets[2],
        atr: atr_value,
        atr_pct,
        vwap: vwap_value,
        vwap_distance_pct: vwap_distance,
        rsi: rsi_value,
        risk_reward,
        timestamp: now,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(high: f64, low: f64, close: f64) -> Candle {
        Candle::new(0, close, high, low, close, 100.0, 0)
    }

    /// Choppy range (RSI near 50) closing above the prior 20-bar high:
    /// breakout long.
    #[test]
    fn breakout_long_plan() {
        let mut candles: Vec<Candle> = (0..49)
            .map(|i| {
                let base = 100.0 + (i % 2) as f64 * 2.0; // alternates 100 / 102
                candle(base + 1.0, base - 1.0, base)
            })
            .collect();
        candles.push(candle(111.0, 104.0, 110.0)); // clears the 103 box high

        let alert = plan_entry("TSTUSDT", &candles, 0).expect("plan expected");
        assert_eq!(alert.entry_type, EntryType::Breakout);
        assert_eq!(alert.direction, Direction::Long);
        assert!(alert.stop_loss < alert.entry_price);
        assert!(alert.take_profit_1 > alert.entry_price);
        assert!(alert.take_profit_3 > alert.take_profit_2);
        assert!((alert.risk_reward - 2.5).abs() < 1e-9);
    }

    /// Collapsing closes drive RSI to the floor: reversal long.
    #[test]
    fn oversold_reversal_plan() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| {
                let base = 200.0 - i as f64 * 1.5;
                candle(base + 1.0, base - 1.0, base)
            })
            .collect();

        let alert = plan_entry("TSTUSDT", &candles, 0).expect("plan expected");
        assert_eq!(alert.entry_type, EntryType::Reversal);
        assert_eq!(alert.direction, Direction::Long);
        assert!(alert.rsi <= RSI_OVERSOLD);
        assert!(alert.stop_loss < alert.entry_price);
    }

    /// Price glued to VWAP in a gentle drift: early pullback entry.
    #[test]
    fn pullback_near_vwap() {
        let candles: Vec<Candle> = (0..50)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.01;
                candle(base + 0.2, base - 0.2, base)
            })
            .collect();

        let alert = plan_entry("TSTUSDT", &candles, 0).expect("plan expected");
        assert_eq!(alert.entry_type, EntryType::Early);
        assert!(alert.vwap_distance_pct.abs() <= PULLBACK_VWAP_PCT);
    }

    #[test]
    fn short_history_yields_no_plan() {
        let candles: Vec<Candle> = (0..10).map(|_| candle(101.0, 99.0, 100.0)).collect();
        assert!(plan_entry("TSTUSDT", &candles, 0).is_none());
    }

    #[test]
    fn targets_mirror_for_shorts() {
        let mut candles: Vec<Candle> = (0..49)
            .map(|i| {
                let base = 200.0 - (i % 2) as f64 * 2.0; // alternates 200 / 198
                candle(base + 1.0, base - 1.0, base)
            })
            .collect();
        candles.push(candle(193.0, 190.0, 191.0)); // breaks the 197 box low

        let alert = plan_entry("TSTUSDT", &candles, 0).expect("plan expected");
        assert_eq!(alert.entry_type, EntryType::Breakout);
        assert_eq!(alert.direction, Direction::Short);
        assert!(alert.stop_loss > alert.entry_price);
        assert!(alert.take_profit_3 < alert.take_profit_1);
    }
}
