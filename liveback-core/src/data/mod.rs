//! Data sources consumed by the engine.
//!
//! A `DataClient` is a lazy, pull-based sequence of events:
//! - backtest sources are finite and restartable (`ReplayData`)
//! - live sources block on a channel fed by push-based producers and cannot be
//!   restarted (`LiveFeed`)
//!
//! The engine consumes both through the same `next_event` call.

pub mod live_feed;
pub mod replay;

pub use live_feed::{FeedClosed, FeedHandle, LiveFeed};
pub use replay::ReplayData;

use crate::domain::Event;
use crate::engine::StopHandle;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors reported by a data source.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("malformed event for {symbol} at {timestamp}: {reason}")]
    Malformed {
        symbol: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    #[error("gap in feed for {symbol}: {reason}")]
    Gap { symbol: String, reason: String },

    #[error("data source cannot be restarted")]
    NotRestartable,

    #[error("unrecoverable data source failure: {0}")]
    Unrecoverable(String),
}

impl DataError {
    /// Fatal errors end the run in the ERROR state; everything else is skipped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DataError::Unrecoverable(_))
    }
}

/// Lazy event sequence.
pub trait DataClient: Send {
    /// Next event, an error for a single bad item, or `None` when exhausted.
    fn next_event(&mut self) -> Option<Result<Event, DataError>>;

    /// Rewind to the first event.
    fn restart(&mut self) -> Result<(), DataError> {
        Err(DataError::NotRestartable)
    }

    fn is_restartable(&self) -> bool {
        false
    }

    /// Let a blocking source observe the engine's stop signal.
    fn attach_stop(&mut self, _stop: StopHandle) {}

    /// Events already queued at shutdown, taken without blocking.
    fn drain_pending(&mut self) -> Vec<Event> {
        Vec::new()
    }
}

impl<D: DataClient + ?Sized> DataClient for Box<D> {
    fn next_event(&mut self) -> Option<Result<Event, DataError>> {
        (**self).next_event()
    }

    fn restart(&mut self) -> Result<(), DataError> {
        (**self).restart()
    }

    fn is_restartable(&self) -> bool {
        (**self).is_restartable()
    }

    fn attach_stop(&mut self, stop: StopHandle) {
        (**self).attach_stop(stop)
    }

    fn drain_pending(&mut self) -> Vec<Event> {
        (**self).drain_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unrecoverable_is_fatal() {
        assert!(DataError::Unrecoverable("socket closed".into()).is_fatal());
        assert!(!DataError::NotRestartable.is_fatal());
        assert!(!DataError::Gap {
            symbol: "SPY".into(),
            reason: "missing 10:31".into()
        }
        .is_fatal());
    }
}
