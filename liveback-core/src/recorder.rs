//! Recorder sink: append-only stream of what the engine saw and did.
//!
//! Format and storage belong to the sink. The core ships an in-memory sink
//! for tests and a null sink; the CLI adds a JSON-lines file sink.

use crate::domain::{Event, Fill, Order};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Record {
    Event(Event),
    /// Order state after every change.
    Order(Order),
    Fill(Fill),
    Equity {
        timestamp: DateTime<Utc>,
        equity: f64,
    },
}

pub trait Recorder: Send {
    fn record(&mut self, record: Record);

    /// Called once when the run ends.
    fn flush(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder {
    fn record(&mut self, _record: Record) {}
}

/// Keeps every record in memory. Clones share the same buffer, so a test can
/// keep one clone and hand the other to the engine.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecorder {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Recorder for MemoryRecorder {
    fn record(&mut self, record: Record) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.push(record);
    }
}
