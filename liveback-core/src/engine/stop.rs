//! Cross-thread stop signal.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Cloneable handle that asks a running engine to stop.
///
/// The engine checks it between events, so a stop never lands in the middle
/// of a portfolio mutation. An explicit stop timestamp bounds which fills the
/// final portfolio may contain; without one, the engine's logical clock at the
/// moment it notices the stop is used.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Stop at `at`: events before it are still processed, and only fills
    /// stamped strictly before it are applied.
    pub fn stop_at(&self, at: DateTime<Utc>) {
        let mut slot = self.at.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(at);
        drop(slot);
        self.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        *self.at.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn clones_share_state() {
        let a = StopHandle::new();
        let b = a.clone();
        assert!(!b.is_stopped());
        a.stop();
        assert!(b.is_stopped());
        assert_eq!(b.requested_at(), None);
    }

    #[test]
    fn stop_at_records_timestamp() {
        let handle = StopHandle::new();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap();
        handle.clone().stop_at(at);
        assert!(handle.is_stopped());
        assert_eq!(handle.requested_at(), Some(at));
    }
}
