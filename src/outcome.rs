// =============================================================================
// Outcome Tracker — retrospective win/loss labelling of emitted signals
// =============================================================================
//
// Records every emitted signal that clears the confidence threshold with a
// defined direction, then evaluates it once its horizon elapses. The "exit"
// is the most recent observed price at evaluation time, not a managed exit;
// the labels are therefore biased toward mean-reverting noise, which is why
// the horizon stays configurable.
//
// A record moves PENDING -> WIN | LOSS exactly once. Completed records live
// in a bounded ring in memory and are always persisted through the Store
// port; the pending set is recoverable from rows where outcome = PENDING.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::EngineError;
use crate::features::FeatureVector;
use crate::predictor::Prediction;
use crate::signal_engine::SmartSignal;
use crate::store::{SharedStore, SignalFeaturesRow};
use crate::types::{Direction, EntryType, Outcome};

/// Completed records retained in memory. The store keeps all of them.
const COMPLETED_RING_CAPACITY: usize = 500;

/// Rolling stats window over the most recent completed signals.
const ROLLING_WINDOW: usize = 20;

/// Pnl beyond which the label is decided outright, percent.
const DECISIVE_PNL_PCT: f64 = 0.5;

/// One recorded signal and its (eventual) outcome.
#[derive(Debug, Clone, Serialize)]
pub struct SignalRecord {
    pub id: String,
    pub symbol: String,
    pub entry_type: EntryType,
    pub direction: Direction,
    pub entry_price: f64,
    pub confidence: f64,
    pub timestamp: i64,
    pub outcome: Outcome,
    pub exit_price: Option<f64>,
    pub pnl_percent: Option<f64>,
    #[serde(skip)]
    pub features: Option<FeatureVector>,
    pub ml_prediction: Option<Prediction>,
}

/// Win/loss aggregates for one bucket of completed records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketStats {
    pub total: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win_pct: f64,
    pub avg_loss_pct: f64,
    pub profit_factor: f64,
}

impl BucketStats {
    fn from_records<'a>(records: impl Iterator<Item = &'a SignalRecord>) -> Self {
        let mut stats = Self::default();
        let mut gross_win = 0.0;
        let mut gross_loss = 0.0;

        for record in records {
            let Some(pnl) = record.pnl_percent else {
                continue;
            };
            stats.total += 1;
            match record.outcome {
                Outcome::Win => {
                    stats.wins += 1;
                    gross_win += pnl.max(0.0);
                }
                Outcome::Loss => {
                    stats.losses += 1;
                    gross_loss += pnl.min(0.0).abs();
                }
                Outcome::Pending => {}
            }
        }

        if stats.total > 0 {
            stats.win_rate = stats.wins as f64 / stats.total as f64;
        }
        if stats.wins > 0 {
            stats.avg_win_pct = gross_win / stats.wins as f64;
        }
        if stats.losses > 0 {
            stats.avg_loss_pct = gross_loss / stats.losses as f64;
        }
        stats.profit_factor = if gross_loss > 0.0 {
            gross_win / gross_loss
        } else if gross_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        stats
    }
}

/// Aggregate statistics across every completed record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WinRateStats {
    pub overall: BucketStats,
    pub by_entry_type: HashMap<String, BucketStats>,
    pub by_symbol: HashMap<String, BucketStats>,
    /// Stats over the last 20 completed signals.
    pub rolling: BucketStats,
}

pub struct OutcomeTracker {
    clock: Clock,
    store: SharedStore,
    emit_threshold: f64,
    evaluation_time_ms: i64,
    pending: RwLock<HashMap<String, SignalRecord>>,
    completed: RwLock<VecDeque<SignalRecord>>,
}

impl OutcomeTracker {
    pub fn new(
        clock: Clock,
        store: SharedStore,
        emit_threshold: f64,
        evaluation_time_ms: i64,
    ) -> Self {
        Self {
            clock,
            store,
            emit_threshold,
            evaluation_time_ms,
            pending: RwLock::new(HashMap::new()),
            completed: RwLock::new(VecDeque::new()),
        }
    }

    /// Record an emitted signal if it qualifies: defined direction and
    /// confidence at or above the emit threshold. Returns the record id.
    pub fn record_signal(&self, signal: &SmartSignal, features: FeatureVector) -> Option<String> {
        if signal.direction == Direction::Neutral {
            return None;
        }
        if signal.effective_confidence() < self.emit_threshold {
            return None;
        }
        // A symbol already pending keeps its first record; the engine
        // overwrites its own signal map, but outcomes are per emission.
        if self
            .pending
            .read()
            .values()
            .any(|r| r.symbol == signal.symbol)
        {
            return None;
        }

        let record = SignalRecord {
            id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            entry_type: signal.entry_type,
            direction: signal.direction,
            entry_price: signal.price,
            confidence: signal.effective_confidence(),
            timestamp: signal.timestamp,
            outcome: Outcome::Pending,
            exit_price: None,
            pnl_percent: None,
            features: Some(features.clone()),
            ml_prediction: signal.ml_prediction.clone(),
        };

        // Persist immediately; a failed write is recoverable on the next
        // save pulse because the record stays in the pending map.
        if let Err(e) = self.store.upsert_signal_features(&self.to_row(&record)) {
            let kind = EngineError::Store(e.to_string());
            warn!(signal_id = %record.id, error = %kind, "failed to persist pending signal");
        }

        debug!(
            signal_id = %record.id,
            symbol = %record.symbol,
            direction = %record.direction,
            confidence = record.confidence,
            "signal recorded for outcome tracking"
        );
        let id = record.id.clone();
        self.pending.write().insert(id.clone(), record);
        Some(id)
    }

    /// Evaluate every pending record past its horizon against the price
    /// returned by `price_of`. Returns the newly completed records.
    pub fn evaluate_pending<F>(&self, price_of: F) -> Vec<SignalRecord>
    where
        F: Fn(&str) -> Option<f64>,
    {
        let now = self.clock.now_ms();
        let mut newly_completed = Vec::new();

        let due: Vec<String> = self
            .pending
            .read()
            .values()
            .filter(|r| now - r.timestamp >= self.evaluation_time_ms)
            .map(|r| r.id.clone())
            .collect();

        for id in due {
            let Some(mut record) = self.pending.write().remove(&id) else {
                continue;
            };
            let Some(current_price) = price_of(&record.symbol) else {
                // No price available: keep waiting.
                self.pending.write().insert(id, record);
                continue;
            };

            let raw_pnl = (current_price - record.entry_price) / record.entry_price * 100.0;
            let pnl = match record.direction {
                Direction::Short => -raw_pnl,
                _ => raw_pnl,
            };

            let outcome = if pnl > DECISIVE_PNL_PCT {
                Outcome::Win
            } else if pnl < -DECISIVE_PNL_PCT {
                Outcome::Loss
            } else if pnl >= 0.0 {
                Outcome::Win
            } else {
                Outcome::Loss
            };

            record.outcome = outcome;
            record.exit_price = Some(current_price);
            record.pnl_percent = Some(pnl);

            if let Err(e) = self.store.update_outcome(&record.id, outcome, pnl) {
                // The in-memory row still carries everything; re-upsert so
                // the store converges.
                let kind = EngineError::Store(e.to_string());
                warn!(signal_id = %record.id, error = %kind, "outcome update failed — re-upserting");
                let _ = self.store.upsert_signal_features(&self.to_row(&record));
            }

            info!(
                signal_id = %record.id,
                symbol = %record.symbol,
                outcome = %outcome,
                pnl = format!("{pnl:.2}"),
                "signal outcome decided"
            );

            let mut completed = self.completed.write();
            completed.push_back(record.clone());
            while completed.len() > COMPLETED_RING_CAPACITY {
                completed.pop_front();
            }
            newly_completed.push(record);
        }

        newly_completed
    }

    /// Rebuild the pending map from persisted rows, after a restart.
    pub fn restore_pending(&self, rows: Vec<SignalFeaturesRow>) {
        let mut pending = self.pending.write();
        for row in rows {
            if row.outcome != Outcome::Pending {
                continue;
            }
            let direction = if row.features.direction >= 1.0 {
                Direction::Long
            } else {
                Direction::Short
            };
            pending.insert(
                row.signal_id.clone(),
                SignalRecord {
                    id: row.signal_id,
                    symbol: row.symbol,
                    entry_type: EntryType::Momentum,
                    direction,
                    // Entry price is not a feature column; the smart
                    // confidence is. Recovered records re-enter evaluation
                    // with what the row preserves.
                    entry_price: 0.0,
                    confidence: row.features.smart_confidence,
                    timestamp: row.ts,
                    outcome: Outcome::Pending,
                    exit_price: None,
                    pnl_percent: None,
                    features: Some(row.features),
                    ml_prediction: None,
                },
            );
        }
        info!(count = pending.len(), "pending signals restored from store");
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.read().len()
    }

    /// The most recent `limit` completed records, newest first.
    pub fn recent_completed(&self, limit: usize) -> Vec<SignalRecord> {
        self.completed
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Aggregate win/loss statistics across the completed ring.
    pub fn win_rate_stats(&self) -> WinRateStats {
        let completed = self.completed.read();

        let overall = BucketStats::from_records(completed.iter());

        let mut by_entry_type: HashMap<String, Vec<&SignalRecord>> = HashMap::new();
        let mut by_symbol: HashMap<String, Vec<&SignalRecord>> = HashMap::new();
        for record in completed.iter() {
            by_entry_type
                .entry(record.entry_type.to_string())
                .or_default()
                .push(record);
            by_symbol
                .entry(record.symbol.clone())
                .or_default()
                .push(record);
        }

        let rolling_start = completed.len().saturating_sub(ROLLING_WINDOW);
        let rolling = BucketStats::from_records(completed.iter().skip(rolling_start));

        WinRateStats {
            overall,
            by_entry_type: by_entry_type
                .into_iter()
                .map(|(k, v)| (k, BucketStats::from_records(v.into_iter())))
                .collect(),
            by_symbol: by_symbol
                .into_iter()
                .map(|(k, v)| (k, BucketStats::from_records(v.into_iter())))
                .collect(),
            rolling,
        }
    }

    fn to_row(&self, record: &SignalRecord) -> SignalFeaturesRow {
        SignalFeaturesRow {
            signal_id: record.id.clone(),
            symbol: record.symbol.clone(),
            ts: record.timestamp,
            features: record.features.clone().unwrap_or_default(),
            outcome: record.outcome,
            pnl_percent: record.pnl_percent,
            ml_win_probability: record.ml_prediction.as_ref().map(|p| p.win_probability),
            ml_quality_tier: record.ml_prediction.as_ref().map(|p| p.quality_tier),
            ml_model_version: record.ml_prediction.as_ref().map(|p| p.model_version.clone()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SqliteStore, Store};
    use crate::types::RiskLevel;
    use std::sync::Arc;

    fn smart_signal(symbol: &str, direction: Direction, confidence: f64, price: f64, ts: i64) -> SmartSignal {
        SmartSignal {
            id: format!("sig-{symbol}-{ts}"),
            symbol: symbol.to_string(),
            direction,
            confidence,
            confluence_score: confidence,
            components: Vec::new(),
            reasoning: Vec::new(),
            entry_type: EntryType::Momentum,
            risk_level: RiskLevel::Medium,
            price,
            timestamp: ts,
            ml_prediction: None,
            combined_confidence: None,
            quality_tier: None,
        }
    }

    fn tracker(clock: &Clock) -> OutcomeTracker {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        OutcomeTracker::new(clock.clone(), store, 60.0, 15 * 60 * 1000)
    }

    /// Record LONG at 100, price 102 after 16 minutes: a 2% WIN.
    #[test]
    fn long_win_scenario() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        let signal = smart_signal("CCCUSDT", Direction::Long, 70.0, 100.0, 0);
        let id = tracker
            .record_signal(&signal, FeatureVector::default())
            .expect("should record");
        assert_eq!(tracker.pending_count(), 1);

        clock.set_ms(16 * 60 * 1000);
        let completed = tracker.evaluate_pending(|_| Some(102.0));
        assert_eq!(completed.len(), 1);
        let record = &completed[0];
        assert_eq!(record.id, id);
        assert_eq!(record.outcome, Outcome::Win);
        assert_eq!(record.exit_price, Some(102.0));
        assert!((record.pnl_percent.unwrap() - 2.0).abs() < 1e-9);
        assert_eq!(tracker.pending_count(), 0);
        assert_eq!(tracker.completed_count(), 1);
    }

    #[test]
    fn short_pnl_is_negated() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        let signal = smart_signal("DDDUSDT", Direction::Short, 80.0, 100.0, 0);
        tracker.record_signal(&signal, FeatureVector::default()).unwrap();

        clock.set_ms(16 * 60 * 1000);
        let completed = tracker.evaluate_pending(|_| Some(97.0));
        assert_eq!(completed[0].outcome, Outcome::Win);
        assert!((completed[0].pnl_percent.unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn flat_band_resolves_by_sign() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        tracker
            .record_signal(
                &smart_signal("EEEUSDT", Direction::Long, 70.0, 100.0, 0),
                FeatureVector::default(),
            )
            .unwrap();
        clock.set_ms(16 * 60 * 1000);
        // +0.3% is inside the decisive band but non-negative: WIN.
        let completed = tracker.evaluate_pending(|_| Some(100.3));
        assert_eq!(completed[0].outcome, Outcome::Win);

        tracker
            .record_signal(
                &smart_signal("FFFUSDT", Direction::Long, 70.0, 100.0, 16 * 60 * 1000),
                FeatureVector::default(),
            )
            .unwrap();
        clock.set_ms(32 * 60 * 1000);
        let completed = tracker.evaluate_pending(|_| Some(99.8));
        assert_eq!(completed[0].outcome, Outcome::Loss);
    }

    #[test]
    fn below_threshold_or_neutral_is_not_recorded() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        let weak = smart_signal("AAAUSDT", Direction::Long, 59.9, 100.0, 0);
        assert!(tracker.record_signal(&weak, FeatureVector::default()).is_none());

        let neutral = smart_signal("AAAUSDT", Direction::Neutral, 90.0, 100.0, 0);
        assert!(tracker
            .record_signal(&neutral, FeatureVector::default())
            .is_none());
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn early_records_stay_pending() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        tracker
            .record_signal(
                &smart_signal("AAAUSDT", Direction::Long, 70.0, 100.0, 0),
                FeatureVector::default(),
            )
            .unwrap();

        clock.set_ms(14 * 60 * 1000); // one minute short of the horizon
        assert!(tracker.evaluate_pending(|_| Some(150.0)).is_empty());
        assert_eq!(tracker.pending_count(), 1);
    }

    #[test]
    fn evaluation_is_at_most_once_and_deterministic() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        tracker
            .record_signal(
                &smart_signal("AAAUSDT", Direction::Long, 70.0, 100.0, 0),
                FeatureVector::default(),
            )
            .unwrap();
        clock.set_ms(16 * 60 * 1000);

        let first = tracker.evaluate_pending(|_| Some(103.0));
        assert_eq!(first.len(), 1);
        // Re-running with a different price can never revisit the record.
        let second = tracker.evaluate_pending(|_| Some(90.0));
        assert!(second.is_empty());
        assert_eq!(tracker.completed_count(), 1);
        assert_eq!(
            tracker.recent_completed(10)[0].outcome,
            Outcome::Win
        );
    }

    #[test]
    fn completed_ring_is_bounded() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        for i in 0..(COMPLETED_RING_CAPACITY + 25) {
            let ts = i as i64 * 1_000;
            clock.set_ms(ts);
            let signal = smart_signal(&format!("S{i}USDT"), Direction::Long, 70.0, 100.0, ts);
            tracker.record_signal(&signal, FeatureVector::default()).unwrap();
            clock.set_ms(ts + 16 * 60 * 1000);
            tracker.evaluate_pending(|_| Some(102.0));
        }

        assert_eq!(tracker.completed_count(), COMPLETED_RING_CAPACITY);
    }

    #[test]
    fn stats_buckets_add_up() {
        let clock = Clock::manual(0);
        let tracker = tracker(&clock);

        // Two wins on AAA, one loss on BBB.
        let fixtures = [
            ("AAAUSDT", 102.0),
            ("AAAUSDT", 103.0),
            ("BBBUSDT", 95.0),
        ];
        for (i, (symbol, exit)) in fixtures.iter().enumerate() {
            let ts = i as i64 * 20 * 60 * 1000;
            clock.set_ms(ts);
            tracker
                .record_signal(
                    &smart_signal(symbol, Direction::Long, 70.0, 100.0, ts),
                    FeatureVector::default(),
                )
                .unwrap();
            clock.set_ms(ts + 16 * 60 * 1000);
            tracker.evaluate_pending(|_| Some(*exit));
        }

        let stats = tracker.win_rate_stats();
        assert_eq!(stats.overall.total, 3);
        assert_eq!(stats.overall.wins + stats.overall.losses, stats.overall.total);
        assert!((stats.overall.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(stats.overall.profit_factor > 0.0);

        assert_eq!(stats.by_symbol["AAAUSDT"].wins, 2);
        assert_eq!(stats.by_symbol["BBBUSDT"].losses, 1);
        assert_eq!(stats.by_entry_type["MOMENTUM"].total, 3);
        assert_eq!(stats.rolling.total, 3);
    }

    #[test]
    fn restore_pending_from_store_rows() {
        let clock = Clock::manual(0);
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tracker = OutcomeTracker::new(clock.clone(), store.clone(), 60.0, 15 * 60 * 1000);

        tracker
            .record_signal(
                &smart_signal("AAAUSDT", Direction::Long, 70.0, 100.0, 0),
                FeatureVector::default(),
            )
            .unwrap();

        // A fresh tracker over the same store recovers the pending set.
        let recovered = OutcomeTracker::new(clock, store.clone(), 60.0, 15 * 60 * 1000);
        recovered.restore_pending(store.load_pending().unwrap());
        assert_eq!(recovered.pending_count(), 1);
    }
}
