//! Cost model: directional slippage and commission.
//!
//! Slippage is directional: buyers pay more, sellers receive less.
//! Commission is `commission_bps` of notional per fill, floored at `min_fee`.

use crate::domain::OrderSide;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostModel {
    /// Commission in basis points of fill notional.
    pub commission_bps: f64,
    /// Minimum commission per fill.
    pub min_fee: f64,
}

impl CostModel {
    pub fn new(commission_bps: f64, min_fee: f64) -> Self {
        Self {
            commission_bps,
            min_fee,
        }
    }

    pub fn frictionless() -> Self {
        Self::default()
    }

    /// Move `raw_price` against the trader by `slippage` per unit.
    ///
    /// Returns `(slipped_price, slippage_amount)` where the amount is the
    /// total currency cost over `quantity`.
    pub fn apply_slippage(
        &self,
        raw_price: f64,
        side: OrderSide,
        slippage: f64,
        quantity: f64,
    ) -> (f64, f64) {
        if slippage == 0.0 {
            return (raw_price, 0.0);
        }
        let slipped = raw_price + side.sign() * slippage;
        (slipped, slippage * quantity)
    }

    /// `max(price * quantity * commission_bps / 10_000, min_fee)`.
    pub fn commission(&self, fill_price: f64, quantity: f64) -> f64 {
        let proportional = fill_price * quantity * (self.commission_bps / 10_000.0);
        proportional.max(self.min_fee)
    }
}
