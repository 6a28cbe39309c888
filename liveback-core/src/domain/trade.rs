//! ClosedTrade: the part of a fill that reduced or closed a position.

use super::ids::OrderId;
use super::order::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of the per-trade log.
///
/// Recorded for every fill that closes some quantity. A fill that flips a
/// position records only the closed leg; the opened remainder becomes the
/// entry of a later trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub order_id: OrderId,
    pub symbol: String,
    /// Side of the closing fill.
    pub side: OrderSide,
    pub timestamp: DateTime<Utc>,
    pub quantity: f64,
    /// Average cost of the position before the closing fill.
    pub entry_price: f64,
    pub exit_price: f64,
    /// Realised PnL of the closed quantity, before fees.
    pub gross_pnl: f64,
    /// Fees of the whole closing fill.
    pub fees: f64,
}

impl ClosedTrade {
    pub fn net_pnl(&self) -> f64 {
        self.gross_pnl - self.fees
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl() > 0.0
    }

    /// Net return as a fraction of the entry cost.
    pub fn return_pct(&self) -> f64 {
        let cost = self.entry_price * self.quantity;
        if cost == 0.0 {
            return 0.0;
        }
        self.net_pnl() / cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(gross: f64, fees: f64) -> ClosedTrade {
        ClosedTrade {
            order_id: OrderId(7),
            symbol: "SPY".into(),
            side: OrderSide::Sell,
            timestamp: Utc::now(),
            quantity: 10.0,
            entry_price: 100.0,
            exit_price: 100.0 + gross / 10.0,
            gross_pnl: gross,
            fees,
        }
    }

    #[test]
    fn fees_can_turn_a_winner_into_a_loser() {
        assert!(trade(5.0, 1.0).is_winner());
        assert!(!trade(5.0, 6.0).is_winner());
        assert!((trade(5.0, 6.0).net_pnl() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn return_is_relative_to_entry_cost() {
        assert!((trade(50.0, 0.0).return_pct() - 0.05).abs() < 1e-12);
    }
}
