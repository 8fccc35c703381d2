// =============================================================================
// Scheduler — cadence loops over the detector family
// =============================================================================
//
// One logical task owns ingest; a small set of spawned loops drive the
// detectors at their production cadences. Every loop carries an in-flight
// latch: if the previous update is still running when the tick fires, the
// tick is skipped, never queued. A single failed tick never disturbs the
// loop.
//
// Cadences (seconds): funding/OI 120, MTF/pattern 60, entry-timing and
// correlation 30, whale 10, top-picks and liquidation 5, snapshot 2,
// outcome evaluation 15, save pulse 30.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::detectors::DetectorSet;
use crate::market_data::{DataStore, Ticker};
use crate::outcome::OutcomeTracker;
use crate::runtime_config::CadenceConfig;
use crate::signal_engine::SignalEngine;
use crate::snapshot::{EngineSnapshot, NotificationBuffer, SnapshotAssembler};
use crate::store::{AlertRow, OpportunityRow, SharedStore};

/// Snapshot fan-out channel depth; slow consumers drop, never block.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

pub struct Scheduler {
    store: Arc<DataStore>,
    detectors: Arc<DetectorSet>,
    engine: Arc<SignalEngine>,
    tracker: Arc<OutcomeTracker>,
    assembler: Arc<SnapshotAssembler>,
    notifications: Arc<NotificationBuffer>,
    persistence: SharedStore,
    cadences: CadenceConfig,

    snapshot_tx: broadcast::Sender<Arc<EngineSnapshot>>,
    ingest_pulse: AtomicU64,
    total_opportunities: AtomicU64,
    total_alerts: AtomicU64,
    session_id: RwLock<Option<i64>>,
    previous_critical: RwLock<HashSet<String>>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DataStore>,
        detectors: Arc<DetectorSet>,
        engine: Arc<SignalEngine>,
        tracker: Arc<OutcomeTracker>,
        assembler: Arc<SnapshotAssembler>,
        notifications: Arc<NotificationBuffer>,
        persistence: SharedStore,
        cadences: CadenceConfig,
    ) -> Self {
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            store,
            detectors,
            engine,
            tracker,
            assembler,
            notifications,
            persistence,
            cadences,
            snapshot_tx,
            ingest_pulse: AtomicU64::new(0),
            total_opportunities: AtomicU64::new(0),
            total_alerts: AtomicU64::new(0),
            session_id: RwLock::new(None),
            previous_critical: RwLock::new(HashSet::new()),
        }
    }

    /// Subscribe to the snapshot fan-out.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<EngineSnapshot>> {
        self.snapshot_tx.subscribe()
    }

    /// Number of ingested batches so far.
    pub fn ingest_pulse(&self) -> u64 {
        self.ingest_pulse.load(Ordering::Relaxed)
    }

    // ── Ingest ──────────────────────────────────────────────────────────

    /// Absorb one ticker batch: store update, volume tracking, then the
    /// ingested pulse. Runs on the ingest task only; never touches the
    /// network.
    pub fn ingest(&self, batch: Vec<Ticker>) {
        let outcome = {
            let tracking_batch = batch.clone();
            let outcome = self.store.update(batch);
            self.detectors.volume.update_tracking(&tracking_batch);
            outcome
        };

        for symbol in &outcome.new_listings {
            info!(symbol = %symbol, "new listing detected");
            self.notifications.push(
                "new_listing",
                symbol,
                format!("{symbol} listed"),
                "info",
            );
            self.total_alerts.fetch_add(1, Ordering::Relaxed);
        }

        self.ingest_pulse.fetch_add(1, Ordering::Relaxed);
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Open the session row and spawn every cadence loop. Loops exit
    /// cooperatively when `shutdown` flips to true.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) {
        match self.persistence.open_session(self.store.clock().now_ms()) {
            Ok(id) => *self.session_id.write() = Some(id),
            Err(e) => warn!(error = %e, "failed to open session row"),
        }

        self.spawn_funding_loop(shutdown.clone());
        self.spawn_open_interest_loop(shutdown.clone());
        self.spawn_mtf_loop(shutdown.clone());
        self.spawn_pattern_loop(shutdown.clone());
        self.spawn_entry_timing_loop(shutdown.clone());
        self.spawn_correlation_loop(shutdown.clone());
        self.spawn_whale_loop(shutdown.clone());
        self.spawn_fast_loop(shutdown.clone());
        self.spawn_outcome_loop(shutdown.clone());
        self.spawn_save_pulse_loop(shutdown.clone());
        self.spawn_snapshot_loop(shutdown);

        info!("scheduler loops started");
    }

    /// Final drain: evaluate what is due, flush a last snapshot, close the
    /// session row.
    pub fn drain(&self) {
        let completed = self
            .tracker
            .evaluate_pending(|symbol| self.store.current(symbol).map(|t| t.last_price));
        if !completed.is_empty() {
            info!(count = completed.len(), "outcomes flushed during drain");
        }

        let snapshot = Arc::new(self.assembler.build());
        let _ = self.snapshot_tx.send(snapshot);

        if let Some(session_id) = *self.session_id.read() {
            if let Err(e) = self.persistence.close_session(
                session_id,
                self.store.clock().now_ms(),
                self.total_opportunities.load(Ordering::Relaxed),
                self.total_alerts.load(Ordering::Relaxed),
            ) {
                warn!(error = %e, "failed to close session row");
            }
        }

        info!("scheduler drained");
    }

    // ── REST-driven detector loops ──────────────────────────────────────

    fn spawn_funding_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.funding_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Coalesce: skip the tick while the previous update runs.
                        if in_flight.swap(true, Ordering::SeqCst) {
                            debug!("funding update still in flight — skipping tick");
                            continue;
                        }
                        let detectors = scheduler.detectors.clone();
                        let latch = in_flight.clone();
                        tokio::spawn(async move {
                            if let Err(e) = detectors.funding.update().await {
                                warn!(error = %e, "funding update failed — cache kept");
                            } else {
                                detectors.sentiment.set_funding_inputs(
                                    detectors.funding.mean_rate_pct(),
                                    detectors.funding.all_rates_pct(),
                                );
                            }
                            latch.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_open_interest_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.open_interest_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            debug!("open interest sweep still in flight — skipping tick");
                            continue;
                        }
                        let detectors = scheduler.detectors.clone();
                        let latch = in_flight.clone();
                        tokio::spawn(async move {
                            detectors.open_interest.update().await;
                            detectors.sentiment.set_open_interest_inputs(
                                detectors.open_interest.mean_oi_change_pct(),
                                detectors.open_interest.changes_by_symbol(),
                            );
                            latch.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_mtf_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.multi_timeframe_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            debug!("mtf refresh still in flight — skipping tick");
                            continue;
                        }
                        let detectors = scheduler.detectors.clone();
                        let latch = in_flight.clone();
                        tokio::spawn(async move {
                            detectors.multi_timeframe.update().await;
                            latch.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_pattern_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.pattern_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            debug!("pattern refresh still in flight — skipping tick");
                            continue;
                        }
                        let detectors = scheduler.detectors.clone();
                        let latch = in_flight.clone();
                        tokio::spawn(async move {
                            detectors.pattern.update().await;
                            latch.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_entry_timing_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.entry_timing_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            debug!("entry timing refresh still in flight — skipping tick");
                            continue;
                        }
                        let detectors = scheduler.detectors.clone();
                        let latch = in_flight.clone();
                        tokio::spawn(async move {
                            detectors.entry_timing.update().await;
                            latch.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // ── Local (no-network) detector loops ───────────────────────────────

    fn spawn_correlation_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.correlation_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.detectors.correlation.update(),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_whale_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.whale_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.detectors.whale.update(),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Liquidation scan and top-picks ranking share the fast cadence.
    fn spawn_fast_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.liquidation_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.detectors.liquidation.update();
                        scheduler.detectors.top_picker.update();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // ── Outcome evaluation ──────────────────────────────────────────────

    fn spawn_outcome_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                interval(Duration::from_secs(scheduler.cadences.outcome_evaluation_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let completed = scheduler.tracker.evaluate_pending(|symbol| {
                            scheduler.store.current(symbol).map(|t| t.last_price)
                        });
                        for record in completed {
                            scheduler.notifications.push(
                                "signal_outcome",
                                &record.symbol,
                                format!(
                                    "{} {} resolved {} ({:+.2}%)",
                                    record.symbol,
                                    record.direction,
                                    record.outcome,
                                    record.pnl_percent.unwrap_or(0.0)
                                ),
                                "info",
                            );
                            scheduler.total_alerts.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    // ── Save pulse ──────────────────────────────────────────────────────

    /// Every 30 s, persist the current opportunity set. Uniqueness on
    /// (symbol, type, created_at) makes the pulse idempotent.
    fn spawn_save_pulse_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.save_pulse_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => scheduler.persist_opportunities(),
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn persist_opportunities(&self) {
        let mut rows: Vec<OpportunityRow> = Vec::new();

        for a in self.detectors.volatility.detect() {
            rows.push(OpportunityRow {
                symbol: a.symbol,
                kind: "volatility".to_string(),
                score: a.change_24h.abs(),
                direction: a.direction,
                change_24h: Some(a.change_24h),
                vol_mult: None,
                velocity: None,
                range_pct: None,
                is_new: false,
                last_price: a.current_price,
                created_at: a.timestamp,
            });
        }
        for a in self.detectors.volume.detect() {
            rows.push(OpportunityRow {
                symbol: a.symbol,
                kind: "volume".to_string(),
                score: a.multiplier,
                direction: a.direction,
                change_24h: None,
                vol_mult: Some(a.multiplier),
                velocity: None,
                range_pct: None,
                is_new: false,
                last_price: a.current_price,
                created_at: a.timestamp,
            });
        }
        for a in self.detectors.velocity.detect() {
            rows.push(OpportunityRow {
                symbol: a.symbol,
                kind: "velocity".to_string(),
                score: a.velocity.abs(),
                direction: a.direction,
                change_24h: None,
                vol_mult: None,
                velocity: Some(a.velocity),
                range_pct: None,
                is_new: false,
                last_price: a.current_price,
                created_at: a.timestamp,
            });
        }
        for a in self.detectors.range.detect() {
            rows.push(OpportunityRow {
                symbol: a.symbol,
                kind: "range".to_string(),
                score: a.range_pct,
                direction: a.direction,
                change_24h: None,
                vol_mult: None,
                velocity: None,
                range_pct: Some(a.range_pct),
                is_new: false,
                last_price: a.current_price,
                created_at: a.timestamp,
            });
        }
        for a in self.detectors.new_listing.detect() {
            rows.push(OpportunityRow {
                symbol: a.symbol,
                kind: "new_listing".to_string(),
                score: a.change_from_first_pct.abs(),
                direction: a.direction,
                change_24h: Some(a.change_from_first_pct),
                vol_mult: None,
                velocity: None,
                range_pct: None,
                is_new: true,
                last_price: a.current_price,
                created_at: a.timestamp,
            });
        }

        let mut persisted = 0u64;
        for row in &rows {
            match self.persistence.record_opportunity(row) {
                Ok(()) => persisted += 1,
                Err(e) => {
                    // Recoverable: the same opportunity is re-offered on the
                    // next pulse.
                    warn!(symbol = %row.symbol, error = %e, "opportunity write failed");
                }
            }
        }
        self.total_opportunities.fetch_add(persisted, Ordering::Relaxed);
        debug!(count = persisted, "save pulse complete");
    }

    // ── Snapshot / analysis loop ────────────────────────────────────────

    fn spawn_snapshot_loop(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let scheduler = self.clone();
        let in_flight = Arc::new(AtomicBool::new(false));
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(scheduler.cadences.snapshot_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if in_flight.swap(true, Ordering::SeqCst) {
                            debug!("snapshot cycle still in flight — skipping tick");
                            continue;
                        }
                        let inner = scheduler.clone();
                        let latch = in_flight.clone();
                        tokio::spawn(async move {
                            inner.snapshot_cycle().await;
                            latch.store(false, Ordering::SeqCst);
                        });
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// One snapshot tick: fuse signals, record qualifying ones, fire edge
    /// alerts, publish the document.
    async fn snapshot_cycle(&self) {
        // Fusion (includes best-effort ML enhancement).
        let produced = self.engine.run_cycle().await;
        for signal in &produced {
            if signal.direction == crate::types::Direction::Neutral {
                continue;
            }
            let features = self.engine.build_features(&signal.symbol, signal);
            if self.tracker.record_signal(signal, features).is_some() {
                self.notifications.push(
                    "smart_signal",
                    &signal.symbol,
                    format!(
                        "{} {} confidence {:.0}",
                        signal.symbol,
                        signal.direction,
                        signal.effective_confidence()
                    ),
                    "info",
                );
                self.total_alerts.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Critical-volatility edge alerts: only new entrants fire.
        let current_critical = self.detectors.volatility.critical_set();
        {
            let mut previous = self.previous_critical.write();
            for symbol in current_critical.difference(&previous) {
                let alert = AlertRow {
                    symbol: symbol.clone(),
                    kind: "critical_volatility".to_string(),
                    message: format!("{symbol} entered the critical volatility band"),
                    level: "critical".to_string(),
                    created_at: self.store.clock().now_ms(),
                };
                self.notifications.push(
                    &alert.kind,
                    symbol,
                    alert.message.clone(),
                    &alert.level,
                );
                if let Err(e) = self.persistence.record_alert(&alert) {
                    warn!(symbol = %symbol, error = %e, "alert write failed");
                }
                self.total_alerts.fetch_add(1, Ordering::Relaxed);
            }
            *previous = current_critical;
        }

        // Publish. Send fails only when nobody is subscribed.
        let snapshot = Arc::new(self.assembler.build());
        let _ = self.snapshot_tx.send(snapshot);
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
    use crate::filter::{FilterConfig, SymbolFilter};
    use crate::runtime_config::RuntimeConfig;
    use crate::store::SqliteStore;

    fn ticker(symbol: &str, pct: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: 100.0,
            price_change: 0.0,
            price_change_percent: pct,
            open_price: 100.0,
            high_price: 101.0,
            low_price: 99.0,
            base_volume: 0.0,
            quote_volume: 2e7,
            trade_count: 0,
            event_time,
        }
    }

    fn scheduler() -> (Clock, Arc<Scheduler>) {
        let clock = Clock::manual(0);
        let store = Arc::new(DataStore::new(clock.clone(), 5, 60));
        let config = RuntimeConfig::default();
        let client = Arc::new(FuturesRestClient::new());
        let detectors = Arc::new(DetectorSet::new(store.clone(), client, &config));
        let engine = Arc::new(SignalEngine::new(
            store.clone(),
            detectors.clone(),
            config.ml.clone(),
            None,
        ));
        let persistence: SharedStore = Arc::new(SqliteStore::open_in_memory().unwrap());
        let tracker = Arc::new(OutcomeTracker::new(
            clock.clone(),
            persistence.clone(),
            config.emit_threshold,
            config.evaluation_time_ms,
        ));
        let notifications = Arc::new(NotificationBuffer::new(clock.clone()));
        let assembler = Arc::new(SnapshotAssembler::new(
            store.clone(),
            detectors.clone(),
            engine.clone(),
            tracker.clone(),
            notifications.clone(),
            SymbolFilter::new(FilterConfig::all()),
            Arc::new(AtomicBool::new(true)),
            config.ui.max_displayed,
        ));

        let scheduler = Arc::new(Scheduler::new(
            store,
            detectors,
            engine,
            tracker,
            assembler,
            notifications,
            persistence,
            config.cadences,
        ));
        (clock, scheduler)
    }

    #[test]
    fn ingest_feeds_store_and_pulse() {
        let (_clock, scheduler) = scheduler();
        scheduler.ingest(vec![ticker("AAAUSDT", 1.0, 1)]);
        scheduler.ingest(vec![ticker("AAAUSDT", 1.5, 2)]);

        assert_eq!(scheduler.ingest_pulse(), 2);
        assert_eq!(scheduler.store.symbol_count(), 1);
    }

    #[test]
    fn new_listings_after_first_batch_notify() {
        let (clock, scheduler) = scheduler();
        scheduler.ingest(vec![ticker("AAAUSDT", 1.0, 1)]);
        clock.advance_ms(1_000);
        scheduler.ingest(vec![ticker("AAAUSDT", 1.0, 2), ticker("NEWUSDT", 0.0, 2)]);

        let drained = scheduler.notifications.drain();
        assert!(drained.iter().any(|n| n.kind == "new_listing" && n.symbol == "NEWUSDT"));
    }

    #[tokio::test]
    async fn critical_edge_alerts_fire_once_per_entrant() {
        let (clock, scheduler) = scheduler();
        let mut rx = scheduler.subscribe();
        scheduler.ingest(vec![ticker("HOTUSDT", 30.0, 1)]);

        // The cycle drains notifications into the published document.
        scheduler.snapshot_cycle().await;
        let snapshot = rx.recv().await.unwrap();
        let first: Vec<_> = snapshot
            .notifications
            .iter()
            .filter(|n| n.kind == "critical_volatility")
            .collect();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].symbol, "HOTUSDT");

        // Still critical on the next tick: the set diff suppresses a repeat.
        clock.advance_ms(2_000);
        scheduler.ingest(vec![ticker("HOTUSDT", 31.0, 2)]);
        scheduler.snapshot_cycle().await;
        let snapshot = rx.recv().await.unwrap();
        assert!(snapshot
            .notifications
            .iter()
            .all(|n| n.kind != "critical_volatility"));
    }

    #[tokio::test]
    async fn snapshot_cycle_publishes_to_subscribers() {
        let (_clock, scheduler) = scheduler();
        let mut rx = scheduler.subscribe();

        scheduler.ingest(vec![ticker("AAAUSDT", 12.0, 1)]);
        scheduler.snapshot_cycle().await;

        let snapshot = rx.recv().await.expect("snapshot should arrive");
        assert_eq!(snapshot.symbol_count, 1);
        assert!(snapshot.volatility.iter().any(|a| a.symbol == "AAAUSDT"));
    }

    #[tokio::test]
    async fn drain_closes_session() {
        let (_clock, scheduler) = scheduler();
        let (tx, rx) = watch::channel(false);
        scheduler.start(rx);
        scheduler.ingest(vec![ticker("AAAUSDT", 1.0, 1)]);

        let _ = tx.send(true);
        scheduler.drain();
        // Session row was opened by start() and closed by drain(); a second
        // drain on a closed session is harmless.
        scheduler.drain();
    }
}
