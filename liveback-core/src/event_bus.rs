//! Event bus: sequences timestamped events for a single consumer.
//!
//! Delivery order is `(timestamp, sequence_no)`. The sequence number is
//! stamped at publish time, so events sharing a timestamp always come out in
//! the order they were published.
//!
//! Two policies:
//! - `Strict` (backtest): an event more than `tolerance` older than the newest
//!   published timestamp is a `SequenceError`.
//! - `Reorder` (live): late events within `lateness` are re-inserted with a
//!   warning; older market events are dropped and counted. FILL events are
//!   never dropped, since losing one would break the ledger.

use crate::domain::{Event, EventKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequenceError {
    /// Non-monotonic timestamp beyond the configured tolerance.
    #[error(
        "event for {symbol} at {timestamp} is {behind_ms} ms behind {watermark} (tolerance {tolerance_ms} ms)"
    )]
    Regression {
        symbol: String,
        timestamp: DateTime<Utc>,
        watermark: DateTime<Utc>,
        behind_ms: i64,
        tolerance_ms: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusPolicy {
    Strict { tolerance: Duration },
    Reorder { lateness: Duration },
}

impl BusPolicy {
    pub fn strict() -> Self {
        BusPolicy::Strict {
            tolerance: Duration::zero(),
        }
    }
}

/// What happened to a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// Queued in order.
    Queued { sequence_no: u64 },
    /// Older than the newest timestamp seen, but within the window.
    Late { sequence_no: u64 },
    /// Older than the lateness window; discarded (live only).
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub late_reinserted: u64,
    pub dropped_late: u64,
}

struct Queued {
    event: Event,
}

impl Queued {
    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.event.timestamp, self.event.sequence_no)
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Reversed so the max-heap pops the earliest key.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

pub struct EventBus {
    heap: BinaryHeap<Queued>,
    policy: BusPolicy,
    next_sequence: u64,
    watermark: Option<DateTime<Utc>>,
    last_delivered: Option<DateTime<Utc>>,
    stats: BusStats,
}

impl EventBus {
    pub fn new(policy: BusPolicy) -> Self {
        Self {
            heap: BinaryHeap::new(),
            policy,
            next_sequence: 1,
            watermark: None,
            last_delivered: None,
            stats: BusStats::default(),
        }
    }

    pub fn policy(&self) -> BusPolicy {
        self.policy
    }

    /// Stamp the event with the next sequence number and queue it.
    pub fn publish(&mut self, mut event: Event) -> Result<Published, SequenceError> {
        let late_by = self
            .watermark
            .filter(|w| event.timestamp < *w)
            .map(|w| (w, w - event.timestamp));

        let mut late = false;
        if let Some((watermark, behind)) = late_by {
            match self.policy {
                BusPolicy::Strict { tolerance } => {
                    if behind > tolerance {
                        return Err(SequenceError::Regression {
                            symbol: event.symbol,
                            timestamp: event.timestamp,
                            watermark,
                            behind_ms: behind.num_milliseconds(),
                            tolerance_ms: tolerance.num_milliseconds(),
                        });
                    }
                }
                BusPolicy::Reorder { lateness } => {
                    if behind > lateness && event.kind != EventKind::Fill {
                        warn!(
                            symbol = %event.symbol,
                            timestamp = %event.timestamp,
                            behind_ms = behind.num_milliseconds(),
                            "dropping event older than lateness window"
                        );
                        self.stats.dropped_late += 1;
                        return Ok(Published::Dropped);
                    }
                    warn!(
                        symbol = %event.symbol,
                        timestamp = %event.timestamp,
                        behind_ms = behind.num_milliseconds(),
                        "late event re-inserted"
                    );
                }
            }
            late = true;
            self.stats.late_reinserted += 1;
        }

        let sequence_no = self.next_sequence;
        self.next_sequence += 1;
        event.sequence_no = sequence_no;
        if self.watermark.map_or(true, |w| event.timestamp > w) {
            self.watermark = Some(event.timestamp);
        }
        self.heap.push(Queued { event });
        self.stats.published += 1;

        Ok(if late {
            Published::Late { sequence_no }
        } else {
            Published::Queued { sequence_no }
        })
    }

    /// Pop the earliest queued event.
    pub fn next(&mut self) -> Option<Event> {
        let Queued { event } = self.heap.pop()?;
        self.stats.delivered += 1;
        if self.last_delivered.map_or(true, |t| event.timestamp > t) {
            self.last_delivered = Some(event.timestamp);
        }
        Some(event)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Newest timestamp handed to the consumer so far.
    pub fn last_delivered(&self) -> Option<DateTime<Utc>> {
        self.last_delivered
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }
}
