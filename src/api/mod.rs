// =============================================================================
// API Module — REST status surface and WebSocket snapshot fan-out
// =============================================================================

pub mod rest;
pub mod ws;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::market_data::DataStore;
use crate::outcome::OutcomeTracker;
use crate::scheduler::Scheduler;
use crate::snapshot::SnapshotAssembler;
use crate::store::SharedStore;

/// Maximum concurrent WebSocket connections per client network identity.
const MAX_CONNECTIONS_PER_IP: usize = 5;

/// Shared state for all API handlers.
pub struct ApiState {
    pub store: Arc<DataStore>,
    pub scheduler: Arc<Scheduler>,
    pub assembler: Arc<SnapshotAssembler>,
    pub tracker: Arc<OutcomeTracker>,
    pub persistence: SharedStore,
    pub connected: Arc<AtomicBool>,
    pub start_time: std::time::Instant,
    connections: RwLock<HashMap<IpAddr, usize>>,
}

impl ApiState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<DataStore>,
        scheduler: Arc<Scheduler>,
        assembler: Arc<SnapshotAssembler>,
        tracker: Arc<OutcomeTracker>,
        persistence: SharedStore,
        connected: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            scheduler,
            assembler,
            tracker,
            persistence,
            connected,
            start_time: std::time::Instant::now(),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Try to claim a connection slot for `ip`. Returns a guard that frees
    /// the slot on drop, or None when the identity is at its limit.
    pub fn try_connect(self: &Arc<Self>, ip: IpAddr) -> Option<ConnectionGuard> {
        let mut connections = self.connections.write();
        let count = connections.entry(ip).or_insert(0);
        if *count >= MAX_CONNECTIONS_PER_IP {
            return None;
        }
        *count += 1;
        Some(ConnectionGuard {
            state: self.clone(),
            ip,
        })
    }

    pub fn connection_count(&self, ip: IpAddr) -> usize {
        self.connections.read().get(&ip).copied().unwrap_or(0)
    }
}

/// Frees the per-IP connection slot when the connection ends.
pub struct ConnectionGuard {
    state: Arc<ApiState>,
    ip: IpAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let mut connections = self.state.connections.write();
        if let Some(count) = connections.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                connections.remove(&self.ip);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::detectors::DetectorSet;
    use crate::exchange::FuturesRestClient;
    use crate::filter::{FilterConfig, SymbolFilter};
    use crate::runtime_config::RuntimeConfig;
    use crate::signal_engine::SignalEngine;
    use crate::snapshot::NotificationBuffer;
    use crate::store::SqliteStore;

    fn api_state() -> Arc<ApiState> {
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
        let connected = Arc::new(AtomicBool::new(false));
        let assembler = Arc::new(crate::snapshot::SnapshotAssembler::new(
            store.clone(),
            detectors.clone(),
            engine.clone(),
            tracker.clone(),
            notifications.clone(),
            SymbolFilter::new(FilterConfig::all()),
            connected.clone(),
            config.ui.max_displayed,
        ));
        let scheduler = Arc::new(crate::scheduler::Scheduler::new(
            store.clone(),
            detectors,
            engine,
            tracker.clone(),
            assembler.clone(),
            notifications,
            persistence.clone(),
            config.cadences,
        ));

        Arc::new(ApiState::new(
            store, scheduler, assembler, tracker, persistence, connected,
        ))
    }

    #[test]
    fn connection_limit_is_five_per_identity() {
        let state = api_state();
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        let guards: Vec<_> = (0..MAX_CONNECTIONS_PER_IP)
            .map(|_| state.try_connect(ip).expect("slot should be free"))
            .collect();
        assert_eq!(state.connection_count(ip), MAX_CONNECTIONS_PER_IP);
        assert!(state.try_connect(ip).is_none());

        // Another identity is unaffected.
        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(state.try_connect(other).is_some());

        // Dropping a guard frees a slot.
        drop(guards);
        assert_eq!(state.connection_count(ip), 0);
        assert!(state.try_connect(ip).is_some());
    }
}
