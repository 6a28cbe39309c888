//! Domain types for liveback

pub mod event;
pub mod fill;
pub mod ids;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod trade;

pub use event::{Event, EventKind};
pub use fill::Fill;
pub use ids::{IdGen, OrderId, RunId};
pub use order::{
    NewOrder, Order, OrderAuditEntry, OrderSide, OrderStatus, OrderType, QTY_EPSILON,
};
pub use portfolio::{EquityPoint, Portfolio, PortfolioSnapshot, WorkingQuantity};
pub use position::{Position, PositionChange};
pub use trade::ClosedTrade;

/// Symbol type alias
pub type Symbol = String;
