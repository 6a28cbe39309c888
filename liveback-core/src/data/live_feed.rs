//! Channel-backed live feed.
//!
//! Market data producers and the execution gateway each hold a `FeedHandle`
//! and push from their own threads. The engine pulls from the single
//! `LiveFeed` receiver, which serializes everything into one consumer loop.

use super::{DataClient, DataError};
use crate::domain::{Event, Fill};
use crate::engine::StopHandle;
use chrono::Utc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

type FeedItem = Result<Event, DataError>;

/// The consumer side of the feed has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("live feed closed")]
pub struct FeedClosed;

/// Producer side of a live feed. Cheap to clone; one per producer.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    tx: Sender<FeedItem>,
}

impl FeedHandle {
    pub fn publish(&self, event: Event) -> Result<(), FeedClosed> {
        self.tx.send(Ok(event)).map_err(|_| FeedClosed)
    }

    /// Deliver an execution report as a FILL event.
    pub fn publish_fill(&self, fill: Fill) -> Result<(), FeedClosed> {
        self.publish(Event::from_fill(fill))
    }

    pub fn report(&self, error: DataError) -> Result<(), FeedClosed> {
        self.tx.send(Err(error)).map_err(|_| FeedClosed)
    }
}

/// Infinite, non-restartable, push-to-queue data source.
pub struct LiveFeed {
    rx: Receiver<FeedItem>,
    poll_interval: Duration,
    stop: Option<StopHandle>,
}

impl LiveFeed {
    /// Create a feed and the first producer handle.
    pub fn new(poll_interval: Duration) -> (Self, FeedHandle) {
        let (tx, rx) = mpsc::channel();
        let feed = Self {
            rx,
            poll_interval,
            stop: None,
        };
        (feed, FeedHandle { tx })
    }

    /// Take an item that is already queued, without blocking.
    pub fn try_next(&mut self) -> Option<FeedItem> {
        self.rx.try_recv().ok()
    }
}

impl LiveFeed {
    /// A plain stop ends delivery at once. A stop with a timestamp lets the
    /// engine keep consuming until it sees an event at or past that time.
    fn stopped_now(&self) -> bool {
        self.stop
            .as_ref()
            .is_some_and(|s| s.is_stopped() && s.requested_at().is_none())
    }

    /// The feed has gone quiet and the requested stop time has passed on the
    /// wall clock, so no event before it can still arrive.
    fn stop_time_passed(&self) -> bool {
        self.stop
            .as_ref()
            .and_then(StopHandle::requested_at)
            .is_some_and(|at| Utc::now() >= at)
    }
}

impl DataClient for LiveFeed {
    fn next_event(&mut self) -> Option<FeedItem> {
        loop {
            if self.stopped_now() {
                return None;
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(item) => return Some(item),
                Err(RecvTimeoutError::Timeout) if self.stop_time_passed() => {
                    debug!("live feed idle past the stop timestamp");
                    return None;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("all live feed producers disconnected");
                    return None;
                }
            }
        }
    }

    fn attach_stop(&mut self, stop: StopHandle) {
        self.stop = Some(stop);
    }

    fn drain_pending(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(item) = self.try_next() {
            match item {
                Ok(event) => events.push(event),
                Err(e) => debug!(error = %e, "data error queued at shutdown ignored"),
            }
        }
        events
    }
}
