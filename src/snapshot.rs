// =============================================================================
// Snapshot — the single serialisable view of current engine state
// =============================================================================
//
// A pure function of the store, the detector caches, the signal engine and
// the outcome tracker. Everything is copied on read; consumers never share a
// mutable reference with the producer. Every category list is capped at the
// configured top-K and passes the symbol filter first, so a filtered symbol
// can never appear anywhere in the document.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::detectors::{
    CorrelationAlert, DetectorSet, EntryTimingAlert, FundingAlert, LiquidationAlert,
    MarketSentiment, MtfAlert, NewListingAlert, OiAlert, PatternAlert, RangeAlert, SentimentAlert,
    TopPickAlert, VelocityAlert, VolatilityAlert, VolumeAlert, WhaleAlert,
};
use crate::filter::{FilterConfig, SymbolFilter};
use crate::market_data::DataStore;
use crate::outcome::{OutcomeTracker, SignalRecord, WinRateStats};
use crate::signal_engine::{ReversalSignal, SignalEngine, SmartSignal};

/// Notifications retained between snapshot drains.
const NOTIFICATION_BUFFER_CAP: usize = 50;

/// Per-(type, symbol) cooldown between notifications.
const NOTIFICATION_COOLDOWN_MS: i64 = 60_000;

/// Completed signals echoed in each snapshot.
const RECENT_COMPLETED_COUNT: usize = 10;

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub kind: String,
    pub symbol: String,
    pub message: String,
    pub level: String,
    pub timestamp: i64,
}

/// Bounded notification buffer with a per-(type, symbol) cooldown.
pub struct NotificationBuffer {
    clock: Clock,
    /// Type keys carried from config. Note: the per-type enable lookup in
    /// the original dashboard normalises keys differently from the config
    /// file, so the lookup never matches and every type passes. That
    /// observable behaviour is preserved: the set is kept, the gate is open.
    enabled_types: RwLock<Vec<String>>,
    pending: RwLock<VecDeque<Notification>>,
    last_emitted: RwLock<HashMap<(String, String), i64>>,
}

impl NotificationBuffer {
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            enabled_types: RwLock::new(Vec::new()),
            pending: RwLock::new(VecDeque::new()),
            last_emitted: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_enabled_types(&self, types: Vec<String>) {
        *self.enabled_types.write() = types;
    }

    /// Whether notifications of `kind` are enabled. Always true; see the
    /// field note on `enabled_types`.
    pub fn type_enabled(&self, _kind: &str) -> bool {
        true
    }

    /// Queue a notification, subject to the cooldown and the buffer cap.
    /// Returns whether it was accepted.
    pub fn push(&self, kind: &str, symbol: &str, message: String, level: &str) -> bool {
        if !self.type_enabled(kind) {
            return false;
        }

        let now = self.clock.now_ms();
        let key = (kind.to_string(), symbol.to_string());

        {
            let last = self.last_emitted.read();
            if let Some(&at) = last.get(&key) {
                if now - at < NOTIFICATION_COOLDOWN_MS {
                    return false;
                }
            }
        }

        let mut pending = self.pending.write();
        if pending.len() >= NOTIFICATION_BUFFER_CAP {
            pending.pop_front();
        }
        pending.push_back(Notification {
            kind: kind.to_string(),
            symbol: symbol.to_string(),
            message,
            level: level.to_string(),
            timestamp: now,
        });
        self.last_emitted.write().insert(key, now);
        true
    }

    /// Drain everything queued since the last snapshot.
    pub fn drain(&self) -> Vec<Notification> {
        self.pending.write().drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }
}

// =============================================================================
// Snapshot document
// =============================================================================

/// Fused signals grouped the way the dashboard shows them.
#[derive(Debug, Clone, Serialize)]
pub struct SignalBuckets {
    pub long: Vec<SmartSignal>,
    pub short: Vec<SmartSignal>,
    pub early: Vec<SmartSignal>,
    pub reversal: Vec<ReversalSignal>,
    pub breakout: Vec<SmartSignal>,
    pub low_risk: Vec<SmartSignal>,
}

/// The complete dashboard state document.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub connected: bool,
    pub symbol_count: usize,
    pub timestamp: i64,

    pub volatility: Vec<VolatilityAlert>,
    pub volume: Vec<VolumeAlert>,
    pub velocity: Vec<VelocityAlert>,
    pub range: Vec<RangeAlert>,
    pub new_listings: Vec<NewListingAlert>,
    pub funding: Vec<FundingAlert>,
    pub open_interest: Vec<OiAlert>,
    pub multi_timeframe: Vec<MtfAlert>,
    pub liquidation: Vec<LiquidationAlert>,
    pub whale: Vec<WhaleAlert>,
    pub correlation: Vec<CorrelationAlert>,
    pub sentiment_alerts: Vec<SentimentAlert>,
    pub pattern: Vec<PatternAlert>,
    pub entry_timing: Vec<EntryTimingAlert>,
    pub top_picks: Vec<TopPickAlert>,

    pub signals: SignalBuckets,
    pub market_sentiment: MarketSentiment,
    pub win_rate_stats: WinRateStats,
    pub recent_completed: Vec<SignalRecord>,
    pub notifications: Vec<Notification>,

    pub filter: FilterConfig,
}

/// Assembles snapshots from the live subsystems.
pub struct SnapshotAssembler {
    store: Arc<DataStore>,
    detectors: Arc<DetectorSet>,
    engine: Arc<SignalEngine>,
    tracker: Arc<OutcomeTracker>,
    notifications: Arc<NotificationBuffer>,
    filter: RwLock<SymbolFilter>,
    connected: Arc<AtomicBool>,
    max_displayed: usize,
}

impl SnapshotAssembler {
    pub fn new(
        store: Arc<DataStore>,
        detectors: Arc<DetectorSet>,
        engine: Arc<SignalEngine>,
        tracker: Arc<OutcomeTracker>,
        notifications: Arc<NotificationBuffer>,
        filter: SymbolFilter,
        connected: Arc<AtomicBool>,
        max_displayed: usize,
    ) -> Self {
        Self {
            store,
            detectors,
            engine,
            tracker,
            notifications,
            filter: RwLock::new(filter),
            connected,
            max_displayed,
        }
    }

    pub fn set_filter(&self, config: FilterConfig) {
        self.filter.write().set_config(config);
    }

    pub fn filter_config(&self) -> FilterConfig {
        self.filter.read().config().clone()
    }

    /// Whether `symbol` survives the active filter.
    fn passes(&self, symbol: &str) -> bool {
        match self.store.current(symbol) {
            Some(ticker) => self.filter.read().pass(&ticker),
            None => false,
        }
    }

    /// Filter + cap one category list.
    fn cap<T>(&self, alerts: Vec<T>, symbol: fn(&T) -> &str) -> Vec<T> {
        alerts
            .into_iter()
            .filter(|a| self.passes(symbol(a)))
            .take(self.max_displayed)
            .collect()
    }

    /// Build the complete document. Pure over current state.
    pub fn build(&self) -> EngineSnapshot {
        let now = self.store.clock().now_ms();
        let d = &self.detectors;

        let signals = SignalBuckets {
            long: self.cap(
                self.engine
                    .top_signals(self.max_displayed, Some(crate::types::Direction::Long)),
                |s: &SmartSignal| &s.symbol,
            ),
            short: self.cap(
                self.engine
                    .top_signals(self.max_displayed, Some(crate::types::Direction::Short)),
                |s: &SmartSignal| &s.symbol,
            ),
            early: self.cap(self.engine.early_entries(), |s: &SmartSignal| &s.symbol),
            reversal: self.cap(self.engine.reversal_signals(), |s: &ReversalSignal| {
                &s.symbol
            }),
            breakout: self.cap(self.engine.breakout_candidates(), |s: &SmartSignal| {
                &s.symbol
            }),
            low_risk: self.cap(self.engine.low_risk_setups(), |s: &SmartSignal| &s.symbol),
        };

        EngineSnapshot {
            connected: self.connected.load(Ordering::SeqCst),
            symbol_count: self.store.symbol_count(),
            timestamp: now,

            volatility: self.cap(d.volatility.detect(), |a| &a.symbol),
            volume: self.cap(d.volume.detect(), |a| &a.symbol),
            velocity: self.cap(d.velocity.detect(), |a| &a.symbol),
            range: self.cap(d.range.detect(), |a| &a.symbol),
            new_listings: self.cap(d.new_listing.detect(), |a| &a.symbol),
            funding: self.cap(d.funding.detect(), |a| &a.symbol),
            open_interest: self.cap(d.open_interest.detect(), |a| &a.symbol),
            multi_timeframe: self.cap(d.multi_timeframe.detect(), |a| &a.symbol),
            liquidation: self.cap(d.liquidation.detect(), |a| &a.symbol),
            whale: self.cap(d.whale.detect(), |a| &a.symbol),
            correlation: self.cap(d.correlation.detect(), |a| &a.symbol),
            sentiment_alerts: self.cap(d.sentiment.detect(), |a| &a.symbol),
            pattern: self.cap(d.pattern.detect(), |a| &a.symbol),
            entry_timing: self.cap(d.entry_timing.detect(), |a| &a.symbol),
            top_picks: self.cap(d.top_picker.detect(), |a| &a.symbol),

            signals,
            market_sentiment: d.sentiment.market_sentiment(),
            win_rate_stats: self.tracker.win_rate_stats(),
            recent_completed: self.tracker.recent_completed(RECENT_COMPLETED_COUNT),
            notifications: self.notifications.drain(),

            filter: self.filter_config(),
        }
    }
}
