//! Order types, lifecycle states, and the audit trail entry.

use super::ids::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance for quantity comparisons.
pub const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Fill at the next event's reference price, adjusted by slippage.
    Market,
    /// Fill at the limit price or better once the market crosses it.
    Limit { limit_price: f64 },
}

impl OrderType {
    pub fn limit_price(&self) -> Option<f64> {
        match self {
            OrderType::Market => None,
            OrderType::Limit { limit_price } => Some(*limit_price),
        }
    }
}

/// Order lifecycle states.
///
/// `Filled`, `Canceled` and `Rejected` are terminal. `Unknown` is entered only
/// when an execution call times out and is left through a fill or a
/// reconciliation poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Partial,
    Filled,
    Canceled,
    Rejected,
    Unknown,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }

    /// Whether the order may still receive fills.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            OrderStatus::New | OrderStatus::Partial | OrderStatus::Unknown
        )
    }

    /// Whether a cancel request is accepted in this state.
    pub fn is_cancelable(self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::Partial)
    }

    /// The monotonic transition table.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            New => matches!(to, Partial | Filled | Canceled | Rejected | Unknown),
            Partial => matches!(to, Partial | Filled | Canceled | Unknown),
            Unknown => matches!(to, New | Partial | Filled | Canceled | Rejected),
            Filled | Canceled | Rejected => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::Partial => "PARTIAL",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// An order intent as emitted by a strategy, before the engine assigns an ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
}

impl NewOrder {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, quantity: f64, limit_price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Limit { limit_price },
        }
    }

    pub fn buy(symbol: impl Into<String>, quantity: f64) -> Self {
        Self::market(symbol, OrderSide::Buy, quantity)
    }

    pub fn sell(symbol: impl Into<String>, quantity: f64) -> Self {
        Self::market(symbol, OrderSide::Sell, quantity)
    }

    /// Shape check: positive finite quantity, positive finite limit price.
    pub fn shape_error(&self) -> Option<String> {
        if self.symbol.is_empty() {
            return Some("empty symbol".into());
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Some(format!("quantity must be positive, got {}", self.quantity));
        }
        if let OrderType::Limit { limit_price } = self.order_type {
            if !limit_price.is_finite() || limit_price <= 0.0 {
                return Some(format!("limit price must be positive, got {limit_price}"));
            }
        }
        None
    }

    pub fn into_order(self, id: OrderId, created_at: DateTime<Utc>) -> Order {
        Order {
            id,
            symbol: self.symbol,
            side: self.side,
            quantity: self.quantity,
            order_type: self.order_type,
            filled_quantity: 0.0,
            status: OrderStatus::New,
            created_at,
        }
    }
}

/// A single order tracked by the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    pub filled_quantity: f64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    pub fn is_working(&self) -> bool {
        self.status.is_working()
    }

    pub fn limit_price(&self) -> Option<f64> {
        self.order_type.limit_price()
    }

    /// Signed remaining quantity: positive for buys, negative for sells.
    pub fn signed_remaining(&self) -> f64 {
        self.side.sign() * self.remaining_quantity()
    }
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub timestamp: DateTime<Utc>,
    pub from_status: OrderStatus,
    pub to_status: OrderStatus,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus, filled: f64) -> Order {
        Order {
            id: OrderId(1),
            symbol: "SPY".into(),
            side: OrderSide::Buy,
            quantity: 100.0,
            order_type: OrderType::Market,
            filled_quantity: filled,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn order_remaining_quantity() {
        assert_eq!(order(OrderStatus::Partial, 30.0).remaining_quantity(), 70.0);
        assert_eq!(order(OrderStatus::New, 0.0).signed_remaining(), 100.0);
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [OrderStatus::Filled, OrderStatus::Canceled, OrderStatus::Rejected] {
            assert!(from.is_terminal());
            for to in [
                OrderStatus::New,
                OrderStatus::Partial,
                OrderStatus::Filled,
                OrderStatus::Canceled,
                OrderStatus::Rejected,
                OrderStatus::Unknown,
            ] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn partial_never_returns_to_new() {
        assert!(!OrderStatus::Partial.can_transition_to(OrderStatus::New));
        assert!(!OrderStatus::Partial.can_transition_to(OrderStatus::Rejected));
        assert!(OrderStatus::Partial.can_transition_to(OrderStatus::Partial));
    }

    #[test]
    fn unknown_resolves_anywhere_but_itself() {
        assert!(OrderStatus::Unknown.can_transition_to(OrderStatus::New));
        assert!(OrderStatus::Unknown.can_transition_to(OrderStatus::Rejected));
        assert!(!OrderStatus::Unknown.can_transition_to(OrderStatus::Unknown));
        assert!(OrderStatus::Unknown.is_working());
        assert!(!OrderStatus::Unknown.is_cancelable());
    }

    #[test]
    fn shape_errors() {
        assert!(NewOrder::buy("SPY", 10.0).shape_error().is_none());
        assert!(NewOrder::buy("SPY", 0.0).shape_error().is_some());
        assert!(NewOrder::buy("SPY", f64::INFINITY).shape_error().is_some());
        assert!(NewOrder::limit("SPY", OrderSide::Sell, 5.0, -1.0).shape_error().is_some());
        assert!(NewOrder::buy("", 1.0).shape_error().is_some());
    }

    #[test]
    fn order_type_serializes_tagged() {
        let json = serde_json::to_string(&OrderType::Limit { limit_price: 99.5 }).unwrap();
        assert_eq!(json, r#"{"type":"LIMIT","limit_price":99.5}"#);
    }
}
