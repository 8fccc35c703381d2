// =============================================================================
// Clock — injectable monotone time source
// =============================================================================
//
// Detectors and the outcome tracker never read the global wall clock directly;
// they hold a Clock handle. Tests swap in a manually advanced clock so that
// window trims and outcome evaluation are deterministic.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;

/// Shared "now" source, cheap to clone.
#[derive(Clone)]
pub struct Clock {
    inner: Arc<ClockInner>,
}

enum ClockInner {
    System,
    Manual(AtomicI64),
}

impl Clock {
    /// Wall-clock backed source for production.
    pub fn system() -> Self {
        Self {
            inner: Arc::new(ClockInner::System),
        }
    }

    /// Manually advanced source for tests, starting at `start_ms`.
    pub fn manual(start_ms: i64) -> Self {
        Self {
            inner: Arc::new(ClockInner::Manual(AtomicI64::new(start_ms))),
        }
    }

    /// Current time in milliseconds since the UNIX epoch.
    pub fn now_ms(&self) -> i64 {
        match &*self.inner {
            ClockInner::System => Utc::now().timestamp_millis(),
            ClockInner::Manual(ms) => ms.load(Ordering::SeqCst),
        }
    }

    /// Advance a manual clock by `delta_ms`. No-op on the system clock.
    pub fn advance_ms(&self, delta_ms: i64) {
        if let ClockInner::Manual(ms) = &*self.inner {
            ms.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    /// Set a manual clock to an absolute time. No-op on the system clock.
    pub fn set_ms(&self, now_ms: i64) {
        if let ClockInner::Manual(ms) = &*self.inner {
            ms.store(now_ms, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.inner {
            ClockInner::System => write!(f, "Clock::System"),
            ClockInner::Manual(ms) => {
                write!(f, "Clock::Manual({})", ms.load(Ordering::SeqCst))
            }
        }
    }
}
