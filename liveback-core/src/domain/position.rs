//! Per-symbol position with average-cost accounting.

use super::order::QTY_EPSILON;
use serde::{Deserialize, Serialize};

/// Position tracking
///
/// `quantity` is signed (negative = short) and always equals the running sum of
/// applied signed fill quantities. `realized_pnl` excludes fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: f64,
    pub average_cost: f64,
    pub realized_pnl: f64,
}

/// Outcome of applying one signed quantity to a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionChange {
    pub closed_quantity: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0.0,
            average_cost: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.abs() <= QTY_EPSILON
    }

    pub fn is_long(&self) -> bool {
        self.quantity > QTY_EPSILON
    }

    pub fn is_short(&self) -> bool {
        self.quantity < -QTY_EPSILON
    }

    pub fn market_value(&self, mark: f64) -> f64 {
        self.quantity * mark
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        self.quantity * (mark - self.average_cost)
    }

    /// Apply a signed fill quantity at `price`.
    ///
    /// Increasing fills blend into the average cost. Reducing fills realize
    /// `(price - average_cost) * closed * sign(position)`. A reversing fill
    /// closes the old side and opens the remainder at `price`.
    pub fn apply(&mut self, signed_qty: f64, price: f64) -> PositionChange {
        let old_qty = self.quantity;
        let same_direction = old_qty == 0.0 || old_qty.signum() == signed_qty.signum();

        if same_direction {
            let new_qty = old_qty + signed_qty;
            let total_cost = old_qty.abs() * self.average_cost + signed_qty.abs() * price;
            self.average_cost = if new_qty.abs() > QTY_EPSILON {
                total_cost / new_qty.abs()
            } else {
                0.0
            };
            self.quantity = new_qty;
            return PositionChange {
                closed_quantity: 0.0,
                realized_pnl: 0.0,
            };
        }

        let closed = old_qty.abs().min(signed_qty.abs());
        let pnl = (price - self.average_cost) * closed * old_qty.signum();
        self.realized_pnl += pnl;

        let new_qty = old_qty + signed_qty;
        if new_qty.abs() <= QTY_EPSILON {
            self.quantity = 0.0;
            self.average_cost = 0.0;
        } else if new_qty.signum() != old_qty.signum() {
            // Reversal: the remainder opens a fresh position at the fill price.
            self.quantity = new_qty;
            self.average_cost = price;
        } else {
            self.quantity = new_qty;
        }

        PositionChange {
            closed_quantity: closed,
            realized_pnl: pnl,
        }
    }
}
