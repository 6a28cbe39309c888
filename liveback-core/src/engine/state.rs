//! Engine status, the run trace, and the run report.

use crate::domain::{
    ClosedTrade, EquityPoint, Fill, Order, OrderId, OrderStatus, PortfolioSnapshot,
};
use crate::event_bus::BusStats;
use crate::execution::VenueStatus;
use crate::fingerprint::RunFingerprint;
use crate::metrics::PerformanceSummary;
use crate::risk::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine lifecycle: `Init -> Running -> Stopped | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineStatus {
    Init,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineStatus::Init => "INIT",
            EngineStatus::Running => "RUNNING",
            EngineStatus::Stopped => "STOPPED",
            EngineStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub reason: RejectReason,
}

/// An execution call that did not answer in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutRecord {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    /// `send_order` or `cancel_order`.
    pub operation: String,
    pub after_ms: u64,
}

/// How an `Unknown` order was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub venue_status: VenueStatus,
    pub venue_filled: f64,
    pub resolved_to: OrderStatus,
}

/// Everything that happened in a run besides the portfolio itself.
#[derive(Debug, Clone, Default)]
pub struct RunTrace {
    pub fills: Vec<Fill>,
    /// Closing legs of fills, in fill order.
    pub trades: Vec<ClosedTrade>,
    pub rejections: Vec<RejectionRecord>,
    pub timeouts: Vec<TimeoutRecord>,
    /// Skipped data errors, rendered.
    pub data_errors: Vec<String>,
    /// Fills and transitions the order book refused.
    pub order_errors: Vec<String>,
    /// Fills stamped at or after the stop timestamp.
    pub discarded_fills: Vec<Fill>,
    pub reconciliations: Vec<Reconciliation>,
}

/// Result of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: EngineStatus,
    pub run_id: String,
    pub strategy: String,
    pub execution: String,
    pub fills: Vec<Fill>,
    pub trades: Vec<ClosedTrade>,
    /// Final state of every order, in id order.
    pub orders: Vec<Order>,
    pub equity_curve: Vec<EquityPoint>,
    pub rejections: Vec<RejectionRecord>,
    pub timeouts: Vec<TimeoutRecord>,
    pub data_errors: Vec<String>,
    pub order_errors: Vec<String>,
    pub discarded_fills: Vec<Fill>,
    pub reconciliations: Vec<Reconciliation>,
    pub bus_stats: BusStats,
    pub final_portfolio: PortfolioSnapshot,
    pub summary: PerformanceSummary,
    pub fingerprint: RunFingerprint,
}

impl RunReport {
    pub fn order(&self, id: OrderId) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == id)
    }

    /// Signed sum of fill quantities for one symbol.
    pub fn filled_position(&self, symbol: &str) -> f64 {
        self.fills
            .iter()
            .filter(|f| f.symbol == symbol)
            .map(Fill::signed_quantity)
            .sum()
    }
}
