//! Simulated broker: matches working orders against the event stream.
//!
//! Matching rules, per market event of a symbol, over that symbol's working
//! orders in id order:
//! - an order is matchable only once `latency_events` events of its symbol
//!   have passed since it was accepted (so with zero latency it first meets
//!   the event after the one that triggered it)
//! - MARKET fills at the event's reference price moved against the trader by
//!   the slippage model
//! - LIMIT fills when the reference price crosses the limit, at the reference
//!   price or the limit, whichever is better for the trader; no slippage
//! - when the event carries a volume, all orders together take at most
//!   `max_participation` of it; the remainder stays working
//!
//! Fills are synchronous: they are returned from `on_market_event`.

use super::{
    CostModel, ExecutionClient, ExecutionError, LiquidityPolicy, ReconcileReport, SlippageConfig,
    SlippageInput, SlippageModel, VenueStatus,
};
use crate::domain::{Event, Fill, NewOrder, Order, OrderId, OrderSide, OrderType, QTY_EPSILON};
use crate::risk::RejectReason;
use crate::rng::{RngHierarchy, SymbolRngs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSimConfig {
    pub slippage: SlippageConfig,
    pub commission_bps: f64,
    pub min_fee: f64,
    /// Events of the order's symbol that must pass before it can match.
    pub latency_events: u32,
    /// Fraction of event volume available to fills, in (0, 1].
    pub max_participation: f64,
}

impl Default for BrokerSimConfig {
    fn default() -> Self {
        Self {
            slippage: SlippageConfig::None,
            commission_bps: 0.0,
            min_fee: 0.0,
            latency_events: 0,
            max_participation: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
struct SimOrder {
    order: Order,
    events_seen: u32,
}

pub struct BrokerSim {
    latency_events: u32,
    slippage: Box<dyn SlippageModel>,
    cost: CostModel,
    liquidity: LiquidityPolicy,
    rngs: SymbolRngs,
    working: BTreeMap<OrderId, SimOrder>,
    finished: BTreeMap<OrderId, (VenueStatus, f64)>,
}

impl BrokerSim {
    pub fn new(config: &BrokerSimConfig, rng: RngHierarchy) -> Self {
        Self {
            latency_events: config.latency_events,
            slippage: config.slippage.build(),
            cost: CostModel::new(config.commission_bps, config.min_fee),
            liquidity: LiquidityPolicy::new(config.max_participation),
            rngs: SymbolRngs::new(rng),
            working: BTreeMap::new(),
            finished: BTreeMap::new(),
        }
    }

    /// Zero-cost, zero-latency simulator.
    pub fn frictionless(rng: RngHierarchy) -> Self {
        Self::new(&BrokerSimConfig::default(), rng)
    }

    pub fn working_count(&self) -> usize {
        self.working.len()
    }

    fn crossed(order: &Order, reference: f64) -> Option<f64> {
        match order.order_type {
            OrderType::Market => Some(reference),
            OrderType::Limit { limit_price } => match order.side {
                OrderSide::Buy if reference <= limit_price => Some(reference.min(limit_price)),
                OrderSide::Sell if reference >= limit_price => Some(reference.max(limit_price)),
                _ => None,
            },
        }
    }
}

impl ExecutionClient for BrokerSim {
    fn name(&self) -> &str {
        "BrokerSim"
    }

    fn send_order(&mut self, order: &Order) -> Result<OrderId, ExecutionError> {
        let shape = NewOrder {
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            order_type: order.order_type,
        };
        if let Some(reason) = shape.shape_error() {
            self.finished.insert(order.id, (VenueStatus::Rejected, 0.0));
            return Err(ExecutionError::Rejected(RejectReason::InvalidOrder(reason)));
        }
        if self.working.contains_key(&order.id) || self.finished.contains_key(&order.id) {
            return Err(ExecutionError::Gateway(format!("duplicate order id {}", order.id)));
        }

        debug!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            qty = order.quantity,
            "sim accepted order"
        );
        self.working.insert(
            order.id,
            SimOrder {
                order: order.clone(),
                events_seen: 0,
            },
        );
        Ok(order.id)
    }

    fn cancel_order(&mut self, order_id: OrderId) -> Result<(), ExecutionError> {
        match self.working.remove(&order_id) {
            Some(sim) => {
                self.finished
                    .insert(order_id, (VenueStatus::Canceled, sim.order.filled_quantity));
                Ok(())
            }
            None if self.finished.contains_key(&order_id) => {
                Err(ExecutionError::NotCancelable(order_id))
            }
            None => Err(ExecutionError::UnknownOrder(order_id)),
        }
    }

    fn on_market_event(&mut self, event: &Event, now: DateTime<Utc>) -> Vec<Fill> {
        if !event.is_market_data() {
            return Vec::new();
        }
        let Some(reference) = event.reference_price() else {
            return Vec::new();
        };

        let mut budget = self.liquidity.budget(event.volume);
        let mut fills = Vec::new();
        let mut completed = Vec::new();

        for (id, sim) in self.working.iter_mut() {
            if sim.order.symbol != event.symbol {
                continue;
            }
            sim.events_seen = sim.events_seen.saturating_add(1);
            if sim.events_seen <= self.latency_events {
                continue;
            }
            let Some(base_price) = Self::crossed(&sim.order, reference) else {
                continue;
            };

            let (quantity, _) = self
                .liquidity
                .constrain(sim.order.remaining_quantity(), budget);
            if quantity <= QTY_EPSILON {
                continue;
            }
            budget -= quantity;

            let input = SlippageInput {
                event,
                reference_price: reference,
                quantity,
            };
            let slip = self
                .slippage
                .compute(&sim.order.order_type, &input, self.rngs.get(&event.symbol));
            let (price, slippage) = self
                .cost
                .apply_slippage(base_price, sim.order.side, slip, quantity);
            let fees = self.cost.commission(price, quantity);

            sim.order.filled_quantity += quantity;
            if sim.order.remaining_quantity() <= QTY_EPSILON {
                sim.order.filled_quantity = sim.order.quantity;
                completed.push(*id);
            }

            fills.push(Fill {
                order_id: *id,
                timestamp: now,
                symbol: sim.order.symbol.clone(),
                side: sim.order.side,
                price,
                quantity,
                fees,
                slippage,
            });
        }

        for id in completed {
            if let Some(sim) = self.working.remove(&id) {
                self.finished
                    .insert(id, (VenueStatus::Filled, sim.order.filled_quantity));
            }
        }
        fills
    }

    fn reconcile(&mut self, order_id: OrderId) -> Result<ReconcileReport, ExecutionError> {
        let (status, filled_quantity) = match self.working.get(&order_id) {
            Some(sim) => (VenueStatus::Working, sim.order.filled_quantity),
            None => self
                .finished
                .get(&order_id)
                .copied()
                .unwrap_or((VenueStatus::NotFound, 0.0)),
        };
        Ok(ReconcileReport {
            order_id,
            status,
            filled_quantity,
        })
    }
}
