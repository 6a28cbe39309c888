//! Order book state machine: the engine's registry of every order in a run.
//!
//! The book owns order status. It:
//! - stores every order, working and terminal, keyed by id
//! - enforces the transition table in `OrderStatus::can_transition_to`
//! - rejects fills that would exceed the order quantity
//! - accepts venue fills on a canceled order that are stamped at or before
//!   the cancel, since the venue matched them first
//! - keeps an audit trail of every state transition
//!
//! The book does NOT price fills or talk to a venue. Execution clients do
//! that; the engine feeds their answers back here.

use crate::domain::{Fill, Order, OrderAuditEntry, OrderId, OrderStatus, QTY_EPSILON};
use crate::execution::{ReconcileReport, VenueStatus};
use crate::risk::RejectReason;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors from order book operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("order {0} not found")]
    NotFound(OrderId),

    #[error("order {0} rejected: {1}")]
    Rejected(OrderId, RejectReason),

    #[error("order {0} is not cancelable (status: {1})")]
    NotCancelable(OrderId, OrderStatus),

    #[error("invalid transition for order {0}: {1} -> {2}")]
    InvalidTransition(OrderId, OrderStatus, OrderStatus),

    #[error("fill of {fill_quantity} on order {order_id} exceeds remaining {remaining}")]
    Overfill {
        order_id: OrderId,
        fill_quantity: f64,
        remaining: f64,
    },

    #[error("fill does not match order {order_id}: {reason}")]
    FillMismatch { order_id: OrderId, reason: String },
}

/// Every order of a run, in id order.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    /// Ids of `New`, `Partial` and `Unknown` orders.
    working: BTreeSet<OrderId>,
    unknown: BTreeSet<OrderId>,
    /// When each canceled order was canceled.
    canceled_at: BTreeMap<OrderId, DateTime<Utc>>,
    audit_trail: Vec<OrderAuditEntry>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Public API ─────────────────────────────────────────────────────

    /// Register a freshly created order. It must be `New` with nothing filled.
    pub fn submit(&mut self, order: Order) {
        debug_assert!(order.status == OrderStatus::New, "submitted order must be New");
        debug_assert!(!self.orders.contains_key(&order.id), "duplicate order id");
        self.audit_trail.push(OrderAuditEntry {
            order_id: order.id,
            timestamp: order.created_at,
            from_status: OrderStatus::New,
            to_status: OrderStatus::New,
            reason: "submitted".into(),
        });
        self.working.insert(order.id);
        self.orders.insert(order.id, order);
    }

    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Apply a fill's quantity to its order.
    ///
    /// The order moves to `Partial` or `Filled`. A fill for an unknown order,
    /// a terminal order, the wrong symbol or side, or one larger than the
    /// remaining quantity is refused and the order is left untouched.
    ///
    /// A canceled order still takes fills stamped at or before its cancel.
    /// It stays `Canceled` with the filled quantity raised.
    pub fn record_fill(&mut self, fill: &Fill, timestamp: DateTime<Utc>) -> Result<&Order, OrderError> {
        let order = self
            .orders
            .get_mut(&fill.order_id)
            .ok_or(OrderError::NotFound(fill.order_id))?;

        if order.symbol != fill.symbol || order.side != fill.side {
            return Err(OrderError::FillMismatch {
                order_id: order.id,
                reason: format!(
                    "order is {} {}, fill is {} {}",
                    order.side, order.symbol, fill.side, fill.symbol
                ),
            });
        }
        if fill.quantity.is_nan() || fill.quantity <= 0.0 {
            return Err(OrderError::FillMismatch {
                order_id: order.id,
                reason: format!("non-positive fill quantity {}", fill.quantity),
            });
        }

        let remaining = order.remaining_quantity();
        if fill.quantity > remaining + QTY_EPSILON {
            return Err(OrderError::Overfill {
                order_id: order.id,
                fill_quantity: fill.quantity,
                remaining,
            });
        }

        let from = order.status;
        let matched_before_cancel = from == OrderStatus::Canceled
            && self
                .canceled_at
                .get(&order.id)
                .is_some_and(|at| fill.timestamp <= *at);
        if matched_before_cancel {
            order.filled_quantity += fill.quantity;
            self.audit_trail.push(OrderAuditEntry {
                order_id: order.id,
                timestamp,
                from_status: from,
                to_status: from,
                reason: format!("fill {} @ {} matched before cancel", fill.quantity, fill.price),
            });
            return Ok(&*order);
        }

        let to = if remaining - fill.quantity <= QTY_EPSILON {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        if !from.can_transition_to(to) {
            return Err(OrderError::InvalidTransition(order.id, from, to));
        }

        order.filled_quantity += fill.quantity;
        if to == OrderStatus::Filled {
            order.filled_quantity = order.quantity;
        }
        order.status = to;
        Self::index(&mut self.working, &mut self.unknown, order.id, to);
        self.audit_trail.push(OrderAuditEntry {
            order_id: order.id,
            timestamp,
            from_status: from,
            to_status: to,
            reason: format!("fill {} @ {}", fill.quantity, fill.price),
        });
        Ok(&*order)
    }

    /// Move an order to `Rejected`.
    pub fn reject(
        &mut self,
        order_id: OrderId,
        reason: &RejectReason,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.transition(order_id, OrderStatus::Rejected, timestamp, &reason.to_string())
    }

    /// Cancel a `New` or `Partial` order. The unfilled remainder is dropped.
    pub fn cancel(
        &mut self,
        order_id: OrderId,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), OrderError> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(OrderError::NotFound(order_id))?;
        if !order.status.is_cancelable() {
            return Err(OrderError::NotCancelable(order_id, order.status));
        }
        self.transition(order_id, OrderStatus::Canceled, timestamp, reason)
    }

    /// The venue did not answer in time; the order's fate is unknown.
    pub fn mark_unknown(
        &mut self,
        order_id: OrderId,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), OrderError> {
        self.transition(order_id, OrderStatus::Unknown, timestamp, reason)
    }

    /// Resolve an `Unknown` order from a venue reconciliation report.
    ///
    /// A working or filled venue status returns the order to `New` or
    /// `Partial` depending on what has been filled locally; outstanding fills
    /// still arrive as fill events. Returns the status the order moved to.
    pub fn resolve(
        &mut self,
        report: &ReconcileReport,
        timestamp: DateTime<Utc>,
    ) -> Result<OrderStatus, OrderError> {
        let order = self
            .orders
            .get(&report.order_id)
            .ok_or(OrderError::NotFound(report.order_id))?;
        if order.status != OrderStatus::Unknown {
            return Err(OrderError::InvalidTransition(
                order.id,
                order.status,
                OrderStatus::New,
            ));
        }

        let to = match report.status {
            VenueStatus::Working | VenueStatus::Filled => {
                if order.filled_quantity > QTY_EPSILON {
                    OrderStatus::Partial
                } else {
                    OrderStatus::New
                }
            }
            VenueStatus::Canceled => OrderStatus::Canceled,
            VenueStatus::Rejected | VenueStatus::NotFound => OrderStatus::Rejected,
        };
        let reason = format!(
            "reconciled: venue {:?}, venue filled {}",
            report.status, report.filled_quantity
        );
        self.transition(report.order_id, to, timestamp, &reason)?;
        Ok(to)
    }

    /// Orders that may still fill (`New`, `Partial`, `Unknown`), in id order.
    pub fn working_orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.working.iter().filter_map(|id| self.orders.get(id))
    }

    /// Ids of orders a cancel request may be sent for.
    pub fn cancelable_ids(&self) -> Vec<OrderId> {
        self.working_orders()
            .filter(|o| o.status.is_cancelable())
            .map(|o| o.id)
            .collect()
    }

    pub fn unknown_ids(&self) -> Vec<OrderId> {
        self.unknown.iter().copied().collect()
    }

    /// Every order, in id order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.orders.values()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    // ── Internal helpers ───────────────────────────────────────────────

    fn transition(
        &mut self,
        order_id: OrderId,
        to: OrderStatus,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), OrderError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::NotFound(order_id))?;
        let from = order.status;
        let refilled_new = to == OrderStatus::New && order.filled_quantity > QTY_EPSILON;
        if !from.can_transition_to(to) || refilled_new {
            return Err(OrderError::InvalidTransition(order_id, from, to));
        }
        order.status = to;
        Self::index(&mut self.working, &mut self.unknown, order_id, to);
        if to == OrderStatus::Canceled {
            self.canceled_at.insert(order_id, timestamp);
        }
        self.audit_trail.push(OrderAuditEntry {
            order_id,
            timestamp,
            from_status: from,
            to_status: to,
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn index(
        working: &mut BTreeSet<OrderId>,
        unknown: &mut BTreeSet<OrderId>,
        order_id: OrderId,
        status: OrderStatus,
    ) {
        if status.is_working() {
            working.insert(order_id);
        } else {
            working.remove(&order_id);
        }
        if status == OrderStatus::Unknown {
            unknown.insert(order_id);
        } else {
            unknown.remove(&order_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, OrderSide};
    use chrono::{Duration, TimeZone};

    // ── Test helpers ───────────────────────────────────────────────────

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap()
    }

    fn book_with(id: u64, new: NewOrder) -> OrderBook {
        let mut book = OrderBook::new();
        book.submit(new.into_order(OrderId(id), ts()));
        book
    }

    fn fill(id: u64, side: OrderSide, qty: f64) -> Fill {
        Fill {
            order_id: OrderId(id),
            timestamp: ts(),
            symbol: "SPY".into(),
            side,
            price: 100.0,
            quantity: qty,
            fees: 0.0,
            slippage: 0.0,
        }
    }

    fn report(id: u64, status: VenueStatus, filled: f64) -> ReconcileReport {
        ReconcileReport {
            order_id: OrderId(id),
            status,
            filled_quantity: filled,
        }
    }

    // ── Fills ──────────────────────────────────────────────────────────

    #[test]
    fn partial_then_full_fill() {
        let mut book = book_with(1, NewOrder::buy("SPY", 100.0));
        let order = book.record_fill(&fill(1, OrderSide::Buy, 40.0), ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.filled_quantity, 40.0);

        let order = book.record_fill(&fill(1, OrderSide::Buy, 60.0), ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining_quantity(), 0.0);
        assert_eq!(book.working_orders().count(), 0);
    }

    #[test]
    fn overfill_is_refused_and_leaves_order_untouched() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        let err = book.record_fill(&fill(1, OrderSide::Buy, 11.0), ts()).unwrap_err();
        assert!(matches!(err, OrderError::Overfill { .. }));
        assert_eq!(book.get(OrderId(1)).unwrap().status, OrderStatus::New);
        assert_eq!(book.get(OrderId(1)).unwrap().filled_quantity, 0.0);
    }

    #[test]
    fn fill_after_cancel_is_refused() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.cancel(OrderId(1), ts() - Duration::seconds(1), "test").unwrap();
        let err = book.record_fill(&fill(1, OrderSide::Buy, 5.0), ts()).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidTransition(OrderId(1), OrderStatus::Canceled, OrderStatus::Partial)
        );
        assert_eq!(book.get(OrderId(1)).unwrap().filled_quantity, 0.0);
    }

    #[test]
    fn fill_on_rejected_order_is_refused() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.reject(OrderId(1), &RejectReason::MaxPositionExceeded, ts()).unwrap();
        assert!(matches!(
            book.record_fill(&fill(1, OrderSide::Buy, 5.0), ts()),
            Err(OrderError::InvalidTransition(..))
        ));
    }

    #[test]
    fn fill_matched_before_cancel_is_kept() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.cancel(OrderId(1), ts() + Duration::seconds(1), "user").unwrap();
        let order = book.record_fill(&fill(1, OrderSide::Buy, 4.0), ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.filled_quantity, 4.0);
        assert_eq!(book.working_orders().count(), 0);

        // Still bounded by the order quantity.
        assert!(matches!(
            book.record_fill(&fill(1, OrderSide::Buy, 7.0), ts()),
            Err(OrderError::Overfill { .. })
        ));
        let last = book.audit_trail().last().unwrap();
        assert_eq!(
            (last.from_status, last.to_status),
            (OrderStatus::Canceled, OrderStatus::Canceled)
        );
    }

    #[test]
    fn fill_behind_a_venue_cancel_report_is_kept() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.mark_unknown(OrderId(1), ts(), "timeout").unwrap();
        let later = ts() + Duration::seconds(2);
        let to = book.resolve(&report(1, VenueStatus::Canceled, 4.0), later).unwrap();
        assert_eq!(to, OrderStatus::Canceled);

        let order = book.record_fill(&fill(1, OrderSide::Buy, 4.0), later).unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.filled_quantity, 4.0);
    }

    #[test]
    fn fill_with_wrong_side_is_refused() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        let err = book.record_fill(&fill(1, OrderSide::Sell, 5.0), ts()).unwrap_err();
        assert!(matches!(err, OrderError::FillMismatch { .. }));
    }

    #[test]
    fn fill_for_unknown_order_id() {
        let mut book = OrderBook::new();
        assert_eq!(
            book.record_fill(&fill(9, OrderSide::Buy, 1.0), ts()).unwrap_err(),
            OrderError::NotFound(OrderId(9))
        );
    }

    // ── Cancel / reject ────────────────────────────────────────────────

    #[test]
    fn filled_order_cannot_be_canceled() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.record_fill(&fill(1, OrderSide::Buy, 10.0), ts()).unwrap();
        assert_eq!(
            book.cancel(OrderId(1), ts(), "late cancel"),
            Err(OrderError::NotCancelable(OrderId(1), OrderStatus::Filled))
        );
    }

    #[test]
    fn partial_order_can_be_canceled() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.record_fill(&fill(1, OrderSide::Buy, 4.0), ts()).unwrap();
        book.cancel(OrderId(1), ts(), "user").unwrap();
        let order = book.get(OrderId(1)).unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
        assert_eq!(order.filled_quantity, 4.0);
    }

    #[test]
    fn partial_order_cannot_be_rejected() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.record_fill(&fill(1, OrderSide::Buy, 4.0), ts()).unwrap();
        assert!(matches!(
            book.reject(OrderId(1), &RejectReason::MaxPositionExceeded, ts()),
            Err(OrderError::InvalidTransition(..))
        ));
    }

    #[test]
    fn unknown_order_is_not_cancelable_but_still_working() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.mark_unknown(OrderId(1), ts(), "timeout").unwrap();
        assert!(matches!(
            book.cancel(OrderId(1), ts(), "stop"),
            Err(OrderError::NotCancelable(_, OrderStatus::Unknown))
        ));
        assert_eq!(book.working_orders().count(), 1);
        assert!(book.cancelable_ids().is_empty());
        assert_eq!(book.unknown_ids(), vec![OrderId(1)]);
    }

    // ── Reconciliation ─────────────────────────────────────────────────

    #[test]
    fn resolve_working_without_fills_returns_to_new() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.mark_unknown(OrderId(1), ts(), "timeout").unwrap();
        let to = book.resolve(&report(1, VenueStatus::Working, 0.0), ts()).unwrap();
        assert_eq!(to, OrderStatus::New);
    }

    #[test]
    fn resolve_after_partial_fill_returns_to_partial() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.record_fill(&fill(1, OrderSide::Buy, 3.0), ts()).unwrap();
        book.mark_unknown(OrderId(1), ts(), "timeout").unwrap();
        let to = book.resolve(&report(1, VenueStatus::Filled, 10.0), ts()).unwrap();
        assert_eq!(to, OrderStatus::Partial);
    }

    #[test]
    fn resolve_not_found_rejects() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.mark_unknown(OrderId(1), ts(), "timeout").unwrap();
        let to = book.resolve(&report(1, VenueStatus::NotFound, 0.0), ts()).unwrap();
        assert_eq!(to, OrderStatus::Rejected);
        assert!(book.get(OrderId(1)).unwrap().status.is_terminal());
    }

    #[test]
    fn resolve_requires_unknown_status() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        assert!(book.resolve(&report(1, VenueStatus::Working, 0.0), ts()).is_err());
    }

    #[test]
    fn fill_resolves_unknown_directly() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.mark_unknown(OrderId(1), ts(), "timeout").unwrap();
        let order = book.record_fill(&fill(1, OrderSide::Buy, 10.0), ts()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    // ── Audit trail ────────────────────────────────────────────────────

    #[test]
    fn audit_trail_records_every_transition() {
        let mut book = book_with(1, NewOrder::buy("SPY", 10.0));
        book.record_fill(&fill(1, OrderSide::Buy, 5.0), ts()).unwrap();
        book.record_fill(&fill(1, OrderSide::Buy, 5.0), ts()).unwrap();
        let path: Vec<OrderStatus> = book.audit_trail().iter().map(|e| e.to_status).collect();
        assert_eq!(
            path,
            vec![OrderStatus::New, OrderStatus::Partial, OrderStatus::Filled]
        );
    }
}
