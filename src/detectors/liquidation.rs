// =============================================================================
// Liquidation Detector — liquidation pressure inferred from public data
// =============================================================================
//
// OPERATOR NOTE: this detector does NOT consume a liquidation feed. It infers
// likely liquidation notional from sharp price moves on heavy 24h volume in
// the public ticker, so the totals are estimates, not ground truth. Treat the
// intensity bands as a pressure gauge only.
//
// Estimate per observation: notional = volume_24h * |move%| / 100 * 0.3,
// accumulated per symbol over a five-minute window.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

/// Price snapshots examined per observation.
const MOVE_WINDOW: usize = 10;

/// Minimum |move| across the window to infer liquidations, percent.
const MIN_MOVE_PCT: f64 = 1.0;

/// Minimum 24h quote volume to consider the symbol, USD.
const MIN_VOLUME: f64 = 5_000_000.0;

/// Share of move-proportional volume attributed to forced closes.
const LIQUIDATION_SHARE: f64 = 0.3;

/// Accumulation window, ms.
const ACCUMULATION_WINDOW_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LiquidationIntensity {
    Extreme,
    High,
    Medium,
    Low,
}

impl LiquidationIntensity {
    fn from_total(total: f64) -> Self {
        if total >= 5_000_000.0 {
            Self::Extreme
        } else if total >= 1_000_000.0 {
            Self::High
        } else if total >= 500_000.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl std::fmt::Display for LiquidationIntensity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extreme => write!(f, "EXTREME"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidationAlert {
    pub symbol: String,
    /// Estimated notional over the five-minute window, USD.
    pub estimated_notional: f64,
    pub move_pct: f64,
    pub intensity: LiquidationIntensity,
    /// Side being liquidated follows the move: a dump flushes longs.
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct LiquidationDetector {
    store: Arc<DataStore>,
    /// (estimated notional, signed move, observed-at) per symbol.
    accumulator: RwLock<HashMap<String, VecDeque<(f64, f64, i64)>>>,
}

impl LiquidationDetector {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            accumulator: RwLock::new(HashMap::new()),
        }
    }

    /// Scan for sharp moves and accumulate estimated notional. Runs on the
    /// fast cadence; no network involved.
    pub fn update(&self) {
        let now = self.store.clock().now_ms();
        let mut accumulator = self.accumulator.write();

        for symbol in self.store.tracked_symbols() {
            let history = self.store.price_history(&symbol);
            if history.len() < MOVE_WINDOW {
                continue;
            }

            let window = &history[history.len() - MOVE_WINDOW..];
            let first = window.first().expect("len checked").value;
            let last = window.last().expect("len checked").value;
            if first == 0.0 {
                continue;
            }
            let move_pct = (last - first) / first * 100.0;
            if move_pct.abs() <= MIN_MOVE_PCT {
                continue;
            }

            let Some(current) = self.store.current(&symbol) else {
                continue;
            };
            if current.quote_volume <= MIN_VOLUME {
                continue;
            }

            let estimate = current.quote_volume * move_pct.abs() / 100.0 * LIQUIDATION_SHARE;
            let ring = accumulator.entry(symbol).or_default();
            ring.push_back((estimate, move_pct, now));
        }

        // Trim everything outside the accumulation window.
        for ring in accumulator.values_mut() {
            while let Some(&(_, _, ts)) = ring.front() {
                if ts > now - ACCUMULATION_WINDOW_MS {
                    break;
                }
                ring.pop_front();
            }
        }
        accumulator.retain(|_, ring| !ring.is_empty());
    }

    pub fn detect(&self) -> Vec<LiquidationAlert> {
        let now = self.store.clock().now_ms();
        let accumulator = self.accumulator.read();

        let mut alerts: Vec<LiquidationAlert> = accumulator
            .iter()
            .map(|(symbol, ring)| {
                let total: f64 = ring.iter().map(|(est, _, _)| est).sum();
                let latest_move = ring.back().map(|(_, mv, _)| *mv).unwrap_or(0.0);
                LiquidationAlert {
                    symbol: symbol.clone(),
                    estimated_notional: total,
                    move_pct: latest_move,
                    intensity: LiquidationIntensity::from_total(total),
                    direction: Direction::from_sign(latest_move),
                    timestamp: now,
                }
            })
            .collect();

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.estimated_notional);
        alerts
    }
}
