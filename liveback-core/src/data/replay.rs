//! In-memory replay source for backtests.

use super::{DataClient, DataError};
use crate::domain::Event;

/// Finite, restartable replay of a pre-built event stream.
///
/// Items may be errors so that feed faults can be replayed as faithfully as
/// good events.
#[derive(Debug, Clone)]
pub struct ReplayData {
    items: Vec<Result<Event, DataError>>,
    cursor: usize,
}

impl ReplayData {
    pub fn new(events: Vec<Event>) -> Self {
        Self::from_results(events.into_iter().map(Ok).collect())
    }

    pub fn from_results(items: Vec<Result<Event, DataError>>) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.items.len() - self.cursor
    }
}

impl DataClient for ReplayData {
    fn next_event(&mut self) -> Option<Result<Event, DataError>> {
        let item = self.items.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(item)
    }

    fn restart(&mut self) -> Result<(), DataError> {
        self.cursor = 0;
        Ok(())
    }

    fn is_restartable(&self) -> bool {
        true
    }
}

impl FromIterator<Event> for ReplayData {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
