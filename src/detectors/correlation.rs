// =============================================================================
// Correlation Detector — BTC beta, decoupling and relative strength
// =============================================================================
//
// Keeps a rolling 60-point price history per symbol and measures Pearson
// correlation against BTC over equal-length windows. A low |r| flags a
// decoupled symbol; a correlated symbol whose window move beats BTC's by more
// than two points is reported as out/under-performing.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::market_data::DataStore;
use crate::types::Direction;

/// Points retained per symbol.
const HISTORY_DEPTH: usize = 60;

/// Minimum overlapping points before correlating.
const MIN_POINTS: usize = 20;

/// |r| below this reads as decoupled.
const DECOUPLE_R: f64 = 0.3;

/// Window-move gap against BTC that counts as out/under-performance, points.
const OUTPERFORM_GAP_PCT: f64 = 2.0;

/// Reference symbol all others are measured against.
const REFERENCE_SYMBOL: &str = "BTCUSDT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrelationKind {
    Decoupled,
    Outperforming,
    Underperforming,
}

impl std::fmt::Display for CorrelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decoupled => write!(f, "DECOUPLED"),
            Self::Outperforming => write!(f, "OUTPERFORMING"),
            Self::Underperforming => write!(f, "UNDERPERFORMING"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationAlert {
    pub symbol: String,
    /// Pearson r against BTC over the shared window.
    pub correlation: f64,
    pub change_pct: f64,
    pub btc_change_pct: f64,
    /// change_pct - btc_change_pct.
    pub relative_pct: f64,
    pub kind: CorrelationKind,
    pub direction: Direction,
    pub timestamp: i64,
}

pub struct CorrelationDetector {
    store: Arc<DataStore>,
    history: RwLock<HashMap<String, VecDeque<f64>>>,
}

impl CorrelationDetector {
    pub fn new(store: Arc<DataStore>) -> Self {
        Self {
            store,
            history: RwLock::new(HashMap::new()),
        }
    }

    /// Push one price point per tracked symbol.
    pub fn update(&self) {
        let mut history = self.history.write();
        for t in self.store.all_currents() {
            let ring = history
                .entry(t.symbol)
                .or_insert_with(|| VecDeque::with_capacity(HISTORY_DEPTH + 1));
            ring.push_back(t.last_price);
            while ring.len() > HISTORY_DEPTH {
                ring.pop_front();
            }
        }
    }

    pub fn detect(&self) -> Vec<CorrelationAlert> {
        let now = self.store.clock().now_ms();
        let history = self.history.read();

        let Some(btc) = history.get(REFERENCE_SYMBOL) else {
            return Vec::new();
        };
        if btc.len() < MIN_POINTS {
            return Vec::new();
        }
        let btc: Vec<f64> = btc.iter().copied().collect();

        let mut alerts = Vec::new();
        for (symbol, ring) in history.iter() {
            if symbol == REFERENCE_SYMBOL || ring.len() < MIN_POINTS {
                continue;
            }

            // Align both series to their shared tail.
            let len = ring.len().min(btc.len());
            let alt: Vec<f64> = ring.iter().skip(ring.len() - len).copied().collect();
            let btc_tail = &btc[btc.len() - len..];

            let Some(r) = pearson(&alt, btc_tail) else {
                continue;
            };
            let (Some(alt_change), Some(btc_change)) =
                (window_change_pct(&alt), window_change_pct(btc_tail))
            else {
                continue;
            };
            let relative = alt_change - btc_change;

            let kind = if r.abs() < DECOUPLE_R {
                CorrelationKind::Decoupled
            } else if relative > OUTPERFORM_GAP_PCT {
                CorrelationKind::Outperforming
            } else if relative < -OUTPERFORM_GAP_PCT {
                CorrelationKind::Underperforming
            } else {
                continue;
            };

            let direction = match kind {
                CorrelationKind::Decoupled => Direction::Neutral,
                _ => Direction::from_sign(relative),
            };

            alerts.push(CorrelationAlert {
                symbol: symbol.clone(),
                correlation: r,
                change_pct: alt_change,
                btc_change_pct: btc_change,
                relative_pct: relative,
                kind,
                direction,
                timestamp: now,
            });
        }

        super::sort_by_magnitude(&mut alerts, |a| &a.symbol, |a| a.relative_pct);
        alerts
    }

    /// Latest correlation figures for `symbol`, used as feature inputs.
    pub fn correlation_for(&self, symbol: &str) -> Option<(f64, f64)> {
        self.detect()
            .into_iter()
            .find(|a| a.symbol == symbol)
            .map(|a| (a.correlation, a.relative_pct))
    }
}

/// Pearson correlation over equal-length slices. None when either side has
/// zero variance.
fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    let r = cov / (var_a.sqrt() * var_b.sqrt());
    r.is_finite().then_some(r)
}

fn window_change_pct(series: &[f64]) -> Option<f64> {
    let first = *series.first()?;
    let last = *series.last()?;
    (first != 0.0).then(|| (last - first) / first * 100.0)
}
