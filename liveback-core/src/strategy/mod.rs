//! Strategy contract: the callbacks the engine drives.
//!
//! # Invariants
//! - A strategy never learns whether it runs against history or a live feed
//! - It reads time only from `StrategyContext::now`, the engine's logical
//!   clock, never from the wall clock
//! - It sees the portfolio only through an immutable snapshot
//!
//! Together these make the same strategy code behave identically in
//! backtest and live runs.

pub mod examples;

pub use examples::{MaCrossStrategy, NoOpStrategy};

use crate::domain::{Event, Fill, NewOrder, Order, OrderId, PortfolioSnapshot};
use crate::risk::RejectReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a strategy asks the engine to do. The engine assigns order ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderIntent {
    Submit(NewOrder),
    Cancel(OrderId),
}

/// Read-only view handed to every callback.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    now: DateTime<Utc>,
    portfolio: PortfolioSnapshot,
    working_orders: Vec<Order>,
    next_order_id: OrderId,
}

impl StrategyContext {
    pub fn new(
        now: DateTime<Utc>,
        portfolio: PortfolioSnapshot,
        working_orders: Vec<Order>,
        next_order_id: OrderId,
    ) -> Self {
        Self {
            now,
            portfolio,
            working_orders,
            next_order_id,
        }
    }

    /// Logical clock: timestamp of the event being processed.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn portfolio(&self) -> &PortfolioSnapshot {
        &self.portfolio
    }

    /// Orders that may still fill, in id order.
    pub fn working_orders(&self) -> &[Order] {
        &self.working_orders
    }

    pub fn working_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Order> + 'a {
        self.working_orders.iter().filter(move |o| o.symbol == symbol)
    }

    /// Id the next submitted order will receive. Intents returned from one
    /// callback are numbered consecutively from here, rejected ones included.
    pub fn next_order_id(&self) -> OrderId {
        self.next_order_id
    }
}

pub trait Strategy: Send {
    fn name(&self) -> &str;

    /// Called once before the first event.
    fn initialize(&mut self, _ctx: &StrategyContext) {}

    /// React to a market event. Intents are processed in the returned order.
    fn on_event(&mut self, event: &Event, ctx: &StrategyContext) -> Vec<OrderIntent>;

    fn on_fill(&mut self, _fill: &Fill, _ctx: &StrategyContext) {}

    /// The order was refused by shape checks, risk, or the venue.
    fn on_rejection(&mut self, _order: &Order, _reason: &RejectReason, _ctx: &StrategyContext) {}
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn initialize(&mut self, ctx: &StrategyContext) {
        (**self).initialize(ctx)
    }

    fn on_event(&mut self, event: &Event, ctx: &StrategyContext) -> Vec<OrderIntent> {
        (**self).on_event(event, ctx)
    }

    fn on_fill(&mut self, fill: &Fill, ctx: &StrategyContext) {
        (**self).on_fill(fill, ctx)
    }

    fn on_rejection(&mut self, order: &Order, reason: &RejectReason, ctx: &StrategyContext) {
        (**self).on_rejection(order, reason, ctx)
    }
}
