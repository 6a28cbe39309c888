//! Execution clients: where accepted orders go.
//!
//! Two variants sit behind one contract:
//! - `BrokerSim` matches orders against the event stream itself, so fills
//!   come back synchronously from `on_market_event`
//! - `LiveBroker` forwards orders to a `BrokerGateway` on a worker thread;
//!   fills come back asynchronously as FILL events through the live feed
//!
//! The engine never branches on which one it holds.

pub mod broker_sim;
pub mod cost_model;
pub mod liquidity;
pub mod live_broker;
pub mod slippage;

pub use broker_sim::{BrokerSim, BrokerSimConfig};
pub use cost_model::CostModel;
pub use liquidity::LiquidityPolicy;
pub use live_broker::{BrokerGateway, GatewayError, LiveBroker};
pub use slippage::{
    FixedBpsSlippage, NoSlippage, RandomWithinSpreadSlippage, SlippageConfig, SlippageInput,
    SlippageModel, VolumeProportionalSlippage,
};

use crate::domain::{Event, Fill, Order, OrderId};
use crate::risk::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("order rejected by venue: {0}")]
    Rejected(RejectReason),

    #[error("order {0} is not cancelable")]
    NotCancelable(OrderId),

    #[error("venue does not know order {0}")]
    UnknownOrder(OrderId),

    #[error("execution call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("gateway failure: {0}")]
    Gateway(String),
}

/// Order state as the venue sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueStatus {
    /// Accepted and not yet complete.
    Working,
    Filled,
    Canceled,
    Rejected,
    /// The venue never received the order.
    NotFound,
}

/// Answer to a reconciliation poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub order_id: OrderId,
    pub status: VenueStatus,
    /// Cumulative quantity the venue has filled.
    pub filled_quantity: f64,
}

/// Capability set shared by the simulated and the live broker.
pub trait ExecutionClient: Send {
    fn name(&self) -> &str;

    /// Hand an accepted order to the venue. Returns the venue's id for it,
    /// which is always the engine-assigned id.
    fn send_order(&mut self, order: &Order) -> Result<OrderId, ExecutionError>;

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExecutionError>;

    /// Offer a market event for matching. Synchronous venues return the
    /// fills it triggers, stamped `now`.
    fn on_market_event(&mut self, event: &Event, now: DateTime<Utc>) -> Vec<Fill>;

    /// Fills that arrived outside the event stream.
    fn poll_fills(&mut self) -> Vec<Fill> {
        Vec::new()
    }

    /// Ask the venue what became of an order in `UNKNOWN` state.
    fn reconcile(&mut self, order_id: OrderId) -> Result<ReconcileReport, ExecutionError>;
}

impl<E: ExecutionClient + ?Sized> ExecutionClient for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send_order(&mut self, order: &Order) -> Result<OrderId, ExecutionError> {
        (**self).send_order(order)
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExecutionError> {
        (**self).cancel_order(order_id)
    }

    fn on_market_event(&mut self, event: &Event, now: DateTime<Utc>) -> Vec<Fill> {
        (**self).on_market_event(event, now)
    }

    fn poll_fills(&mut self) -> Vec<Fill> {
        (**self).poll_fills()
    }

    fn reconcile(&mut self, order_id: OrderId) -> Result<ReconcileReport, ExecutionError> {
        (**self).reconcile(order_id)
    }
}
