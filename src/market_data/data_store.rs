// =============================================================================
// DataStore — per-symbol rolling state, single writer
// =============================================================================
//
// Owns every SymbolState in the engine. The ingest task is the only writer;
// detectors hold read-only handles and copy on read. Histories are bounded,
// time-ordered, and strictly monotone in timestamp.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::Serialize;

use crate::clock::Clock;
use crate::market_data::Ticker;

/// One hour in milliseconds; a symbol stops counting as newly listed after
/// this age.
const NEW_LISTING_AGE_MS: i64 = 60 * 60 * 1000;

/// A timestamped observation in a rolling history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistoryPoint {
    pub value: f64,
    pub ts: i64,
}

/// Rolling state for one symbol. Mutated only by [`DataStore::update`].
#[derive(Debug, Clone, Serialize)]
pub struct SymbolState {
    pub symbol: String,
    pub current: Ticker,
    /// (last price, observed-at) within the velocity window.
    pub price_history: VecDeque<HistoryPoint>,
    /// (cumulative 24h quote volume, observed-at) within the volume window.
    pub volume_history: VecDeque<HistoryPoint>,
    pub first_seen_ts: i64,
    pub is_new: bool,
}

/// Result of absorbing one ticker batch.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Symbols seen for the first time after the initial batch.
    pub new_listings: Vec<String>,
}

/// Per-symbol current ticker plus bounded price/volume history.
pub struct DataStore {
    symbols: RwLock<HashMap<String, SymbolState>>,
    clock: Clock,
    /// Price history window, ms.
    price_window_ms: i64,
    /// Volume history window, ms.
    volume_window_ms: i64,
    /// The first batch absorbs the whole universe without reporting listings.
    absorbed_first_batch: RwLock<bool>,
}

impl DataStore {
    pub fn new(clock: Clock, price_window_minutes: u64, volume_window_minutes: u64) -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
            clock,
            price_window_ms: price_window_minutes as i64 * 60_000,
            volume_window_ms: volume_window_minutes as i64 * 60_000,
            absorbed_first_batch: RwLock::new(false),
        }
    }

    /// Absorb one ticker batch atomically. Per symbol:
    ///   - create state on first sight (reported as a listing after the first
    ///     batch has been absorbed);
    ///   - ignore out-of-order or duplicate event times;
    ///   - append (price, now) and (quote volume, now), then trim both
    ///     histories to their windows;
    ///   - flip `is_new` off once the symbol is over an hour old.
    pub fn update(&self, batch: Vec<Ticker>) -> UpdateOutcome {
        let now = self.clock.now_ms();
        let mut outcome = UpdateOutcome::default();

        let report_listings = *self.absorbed_first_batch.read();
        let mut map = self.symbols.write();

        for ticker in batch {
            match map.get_mut(&ticker.symbol) {
                Some(state) => {
                    // Arrival order per symbol: drop stale and duplicate
                    // event times.
                    if ticker.event_time <= state.current.event_time {
                        continue;
                    }

                    push_point(&mut state.price_history, ticker.last_price, now);
                    push_point(&mut state.volume_history, ticker.quote_volume, now);
                    trim_window(&mut state.price_history, now, self.price_window_ms);
                    trim_window(&mut state.volume_history, now, self.volume_window_ms);

                    if state.is_new && now - state.first_seen_ts > NEW_LISTING_AGE_MS {
                        state.is_new = false;
                    }

                    state.current = ticker;
                }
                None => {
                    let symbol = ticker.symbol.clone();
                    let mut state = SymbolState {
                        symbol: symbol.clone(),
                        price_history: VecDeque::new(),
                        volume_history: VecDeque::new(),
                        first_seen_ts: now,
                        is_new: true,
                        current: ticker,
                    };
                    push_point(&mut state.price_history, state.current.last_price, now);
                    push_point(&mut state.volume_history, state.current.quote_volume, now);
                    map.insert(symbol.clone(), state);

                    if report_listings {
                        outcome.new_listings.push(symbol);
                    }
                }
            }
        }

        drop(map);
        if !report_listings {
            *self.absorbed_first_batch.write() = true;
        }

        outcome
    }

    // ── Read API (copy on read) ─────────────────────────────────────────

    /// Current ticker for `symbol`, if tracked.
    pub fn current(&self, symbol: &str) -> Option<Ticker> {
        self.symbols.read().get(symbol).map(|s| s.current.clone())
    }

    /// Full state copy for `symbol`.
    pub fn state(&self, symbol: &str) -> Option<SymbolState> {
        self.symbols.read().get(symbol).cloned()
    }

    /// Price history copy (oldest first).
    pub fn price_history(&self, symbol: &str) -> Vec<HistoryPoint> {
        self.symbols
            .read()
            .get(symbol)
            .map(|s| s.price_history.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Volume history copy (oldest first).
    pub fn volume_history(&self, symbol: &str) -> Vec<HistoryPoint> {
        self.symbols
            .read()
            .get(symbol)
            .map(|s| s.volume_history.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All current tickers, unordered.
    pub fn all_currents(&self) -> Vec<Ticker> {
        self.symbols
            .read()
            .values()
            .map(|s| s.current.clone())
            .collect()
    }

    /// All tracked symbols, unordered.
    pub fn tracked_symbols(&self) -> Vec<String> {
        self.symbols.read().keys().cloned().collect()
    }

    /// Symbols still inside their new-listing hour.
    pub fn new_listings(&self) -> Vec<SymbolState> {
        self.symbols
            .read()
            .values()
            .filter(|s| s.is_new)
            .cloned()
            .collect()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.read().len()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

/// Append keeping strict ts monotonicity: an observation landing on the same
/// millisecond as the previous one replaces it instead of duplicating the ts.
fn push_point(history: &mut VecDeque<HistoryPoint>, value: f64, now: i64) {
    if let Some(last) = history.back_mut() {
        if last.ts >= now {
            last.value = value;
            return;
        }
    }
    history.push_back(HistoryPoint { value, ts: now });
}

/// Drop points at or beyond the window boundary (`ts > now - window` kept).
fn trim_window(history: &mut VecDeque<HistoryPoint>, now: i64, window_ms: i64) {
    while let Some(front) = history.front() {
        if front.ts > now - window_ms {
            break;
        }
        history.pop_front();
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, price: f64, quote_volume: f64, event_time: i64) -> Ticker {
        Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            price_change: 0.0,
            price_change_percent: 0.0,
            open_price: price,
            high_price: price,
            low_price: price,
            base_volume: 100.0,
            quote_volume,
            trade_count: 10,
            event_time,
        }
    }

    fn store(clock: &Clock) -> DataStore {
        DataStore::new(clock.clone(), 5, 60)
    }

    #[test]
    fn first_batch_absorbs_without_listings() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        let outcome = store.update(vec![ticker("AAAUSDT", 1.0, 10.0, 1)]);
        assert!(outcome.new_listings.is_empty());
        assert_eq!(store.symbol_count(), 1);
    }

    #[test]
    fn later_first_sight_is_reported() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        store.update(vec![ticker("AAAUSDT", 1.0, 10.0, 1)]);
        clock.advance_ms(1_000);
        let outcome = store.update(vec![
            ticker("AAAUSDT", 1.1, 11.0, 2),
            ticker("NEWUSDT", 5.0, 50.0, 2),
        ]);
        assert_eq!(outcome.new_listings, vec!["NEWUSDT".to_string()]);
        assert!(store.state("NEWUSDT").unwrap().is_new);
    }

    #[test]
    fn out_of_order_and_duplicate_events_ignored() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        store.update(vec![ticker("AAAUSDT", 1.0, 10.0, 100)]);
        clock.advance_ms(1_000);
        store.update(vec![ticker("AAAUSDT", 2.0, 20.0, 50)]); // stale
        store.update(vec![ticker("AAAUSDT", 3.0, 30.0, 100)]); // duplicate

        let current = store.current("AAAUSDT").unwrap();
        assert!((current.last_price - 1.0).abs() < 1e-12);
        assert_eq!(current.event_time, 100);
        assert_eq!(store.price_history("AAAUSDT").len(), 1);
    }

    #[test]
    fn histories_are_strictly_increasing_and_windowed() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        // 12 updates, 1 minute apart: price window is 5 minutes.
        for i in 0..12 {
            store.update(vec![ticker("AAAUSDT", 100.0 + i as f64, 10.0 * i as f64, i + 1)]);
            clock.advance_ms(60_000);
        }

        let now = clock.now_ms();
        let prices = store.price_history("AAAUSDT");
        assert!(!prices.is_empty());
        for pair in prices.windows(2) {
            assert!(pair[0].ts < pair[1].ts, "history must be strictly increasing");
        }
        for p in &prices {
            assert!(p.ts > now - 5 * 60_000, "point {p:?} outside price window");
        }

        let volumes = store.volume_history("AAAUSDT");
        for pair in volumes.windows(2) {
            assert!(pair[0].ts < pair[1].ts);
        }
        for v in &volumes {
            assert!(v.ts > now - 60 * 60_000);
        }
        // Volume window (60m) retains more than the price window (5m).
        assert!(volumes.len() > prices.len());
    }

    #[test]
    fn same_millisecond_update_replaces_last_point() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        store.update(vec![ticker("AAAUSDT", 1.0, 10.0, 1)]);
        store.update(vec![ticker("AAAUSDT", 2.0, 20.0, 2)]); // same clock ms

        let prices = store.price_history("AAAUSDT");
        assert_eq!(prices.len(), 1);
        assert!((prices[0].value - 2.0).abs() < 1e-12);
    }

    #[test]
    fn is_new_flips_off_after_an_hour() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        store.update(vec![ticker("AAAUSDT", 1.0, 10.0, 1)]);
        assert!(store.state("AAAUSDT").unwrap().is_new);

        clock.advance_ms(NEW_LISTING_AGE_MS + 1);
        store.update(vec![ticker("AAAUSDT", 1.1, 11.0, 2)]);
        assert!(!store.state("AAAUSDT").unwrap().is_new);
        assert!(store.new_listings().is_empty());
    }

    #[test]
    fn randomised_updates_keep_invariants() {
        let clock = Clock::manual(0);
        let store = store(&clock);

        // Deterministic pseudo-random walk: varied step sizes exercise the
        // trim and replace paths.
        let mut seed: u64 = 0x9E37_79B9;
        for i in 0..500 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step_ms = (seed % 90_000) as i64; // 0..90s
            clock.advance_ms(step_ms);
            let price = 100.0 + (seed % 1_000) as f64 / 10.0;
            store.update(vec![ticker("AAAUSDT", price, price * 1000.0, i + 1)]);

            let now = clock.now_ms();
            let prices = store.price_history("AAAUSDT");
            for pair in prices.windows(2) {
                assert!(pair[0].ts < pair[1].ts);
            }
            for p in &prices {
                assert!(p.ts > now - 5 * 60_000);
            }
            let volumes = store.volume_history("AAAUSDT");
            for pair in volumes.windows(2) {
                assert!(pair[0].ts < pair[1].ts);
            }
            for v in &volumes {
                assert!(v.ts > now - 60 * 60_000);
            }
        }
    }
}
