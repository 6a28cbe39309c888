//! Market and fill events: the wire contract between the core and its adapters.

use super::fill::Fill;
use crate::data::DataError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Aggregated bar; `trade_price` is the bar close.
    Bar,
    /// Single trade or quote update.
    Tick,
    /// Execution report from a live venue, serialized through the bus.
    Fill,
}

/// A timestamped event. Immutable once published to the `EventBus`, which
/// stamps `sequence_no`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub sequence_no: u64,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<Fill>,
}

impl Event {
    /// Bar event with a close price and optional volume.
    pub fn bar(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        close: f64,
        volume: Option<f64>,
    ) -> Self {
        Self {
            sequence_no: 0,
            timestamp,
            symbol: symbol.into(),
            kind: EventKind::Bar,
            bid: None,
            ask: None,
            trade_price: Some(close),
            volume,
            fill: None,
        }
    }

    /// Quote tick with bid/ask and no trade.
    pub fn quote(timestamp: DateTime<Utc>, symbol: impl Into<String>, bid: f64, ask: f64) -> Self {
        Self {
            sequence_no: 0,
            timestamp,
            symbol: symbol.into(),
            kind: EventKind::Tick,
            bid: Some(bid),
            ask: Some(ask),
            trade_price: None,
            volume: None,
            fill: None,
        }
    }

    /// Trade tick.
    pub fn trade(
        timestamp: DateTime<Utc>,
        symbol: impl Into<String>,
        price: f64,
        volume: Option<f64>,
    ) -> Self {
        Self {
            sequence_no: 0,
            timestamp,
            symbol: symbol.into(),
            kind: EventKind::Tick,
            bid: None,
            ask: None,
            trade_price: Some(price),
            volume,
            fill: None,
        }
    }

    /// FILL event wrapping an execution report.
    pub fn from_fill(fill: Fill) -> Self {
        Self {
            sequence_no: 0,
            timestamp: fill.timestamp,
            symbol: fill.symbol.clone(),
            kind: EventKind::Fill,
            bid: None,
            ask: None,
            trade_price: Some(fill.price),
            volume: Some(fill.quantity),
            fill: Some(fill),
        }
    }

    pub fn is_market_data(&self) -> bool {
        matches!(self.kind, EventKind::Bar | EventKind::Tick)
    }

    /// Mid of the quote, if both sides are present.
    pub fn mid(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Quoted spread, if both sides are present.
    pub fn spread(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Price used for matching and marking: trade price, else quote mid.
    pub fn reference_price(&self) -> Option<f64> {
        self.trade_price.or_else(|| self.mid())
    }

    /// Reject events that cannot be processed.
    pub fn validate(&self) -> Result<(), DataError> {
        let malformed = |reason: &str| DataError::Malformed {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            reason: reason.to_string(),
        };

        if self.symbol.is_empty() {
            return Err(malformed("empty symbol"));
        }
        for (name, value) in [
            ("bid", self.bid),
            ("ask", self.ask),
            ("trade_price", self.trade_price),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v <= 0.0 {
                    return Err(malformed(&format!("{name} must be positive and finite, got {v}")));
                }
            }
        }
        if let Some(v) = self.volume {
            if !v.is_finite() || v < 0.0 {
                return Err(malformed(&format!("volume must be non-negative, got {v}")));
            }
        }
        if let (Some(bid), Some(ask)) = (self.bid, self.ask) {
            if bid > ask {
                return Err(malformed(&format!("crossed quote: bid {bid} > ask {ask}")));
            }
        }
        match self.kind {
            EventKind::Fill if self.fill.is_none() => Err(malformed("FILL event without fill payload")),
            EventKind::Bar | EventKind::Tick if self.reference_price().is_none() => {
                Err(malformed("no trade price and no two-sided quote"))
            }
            _ => Ok(()),
        }
    }
}
