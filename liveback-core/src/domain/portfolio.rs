//! Portfolio: cash, positions, marks, and the equity curve.

use super::fill::Fill;
use super::order::{Order, OrderSide};
use super::position::{Position, PositionChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One point on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
}

/// Aggregate portfolio state.
///
/// Owned exclusively by one engine. Per-symbol maps are `BTreeMap` so that
/// equity sums iterate in a fixed order and replay bit-for-bit.
/// The accounting identity holds after every fill:
/// `equity == cash + sum(quantity * mark)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub initial_cash: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    marks: BTreeMap<String, f64>,
    equity_curve: Vec<EquityPoint>,
    total_fees: f64,
    peak_equity: f64,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            positions: BTreeMap::new(),
            marks: BTreeMap::new(),
            equity_curve: Vec::new(),
            total_fees: 0.0,
            peak_equity: initial_cash,
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn total_fees(&self) -> f64 {
        self.total_fees
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Signed quantity held in `symbol` (zero if never traded).
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    pub fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    pub fn equity_curve(&self) -> &[EquityPoint] {
        &self.equity_curve
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    /// Record the latest known price for a symbol.
    pub fn update_mark(&mut self, symbol: &str, price: f64) {
        match self.marks.get_mut(symbol) {
            Some(mark) => *mark = price,
            None => {
                self.marks.insert(symbol.to_string(), price);
            }
        }
    }

    /// Apply a fill to position and cash in one step.
    ///
    /// `cash -= signed_quantity * price + fees`. Nothing else in the crate
    /// touches cash.
    pub fn apply_fill(&mut self, fill: &Fill) -> PositionChange {
        let position = self
            .positions
            .entry(fill.symbol.clone())
            .or_insert_with(|| Position::flat(fill.symbol.clone()));
        let change = position.apply(fill.signed_quantity(), fill.price);
        self.cash -= fill.signed_quantity() * fill.price + fill.fees;
        self.total_fees += fill.fees;
        change
    }

    /// Price used to value a position: latest mark, else its average cost.
    fn valuation_price(&self, symbol: &str, position: &Position) -> f64 {
        self.marks.get(symbol).copied().unwrap_or(position.average_cost)
    }

    /// Total equity = cash + sum of position market values.
    pub fn equity(&self) -> f64 {
        let position_value: f64 = self
            .positions
            .iter()
            .map(|(sym, pos)| pos.market_value(self.valuation_price(sym, pos)))
            .sum();
        self.cash + position_value
    }

    /// Unrealized PnL for one symbol, recomputed from the latest mark.
    pub fn unrealized_pnl(&self, symbol: &str) -> f64 {
        self.positions
            .get(symbol)
            .map_or(0.0, |pos| pos.unrealized_pnl(self.valuation_price(symbol, pos)))
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions
            .iter()
            .map(|(sym, pos)| pos.unrealized_pnl(self.valuation_price(sym, pos)))
            .sum()
    }

    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    /// Sum of absolute position values at the latest marks.
    pub fn gross_exposure(&self) -> f64 {
        self.positions
            .iter()
            .map(|(sym, pos)| pos.market_value(self.valuation_price(sym, pos)).abs())
            .sum()
    }

    /// Append the current equity to the curve and return it.
    pub fn record_equity(&mut self, timestamp: DateTime<Utc>) -> f64 {
        let equity = self.equity();
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.equity_curve.push(EquityPoint { timestamp, equity });
        equity
    }

    /// Read-only copy handed to strategies and the risk manager.
    pub fn snapshot<'a>(
        &self,
        timestamp: DateTime<Utc>,
        working_orders: impl IntoIterator<Item = &'a Order>,
    ) -> PortfolioSnapshot {
        let mut working: BTreeMap<String, WorkingQuantity> = BTreeMap::new();
        for order in working_orders {
            let entry = working.entry(order.symbol.clone()).or_default();
            match order.side {
                OrderSide::Buy => entry.buy += order.remaining_quantity(),
                OrderSide::Sell => entry.sell += order.remaining_quantity(),
            }
        }

        PortfolioSnapshot {
            timestamp,
            cash: self.cash,
            equity: self.equity(),
            peak_equity: self.peak_equity.max(self.equity()),
            unrealized_pnl: self.total_unrealized_pnl(),
            realized_pnl: self.total_realized_pnl(),
            positions: self
                .positions
                .iter()
                .filter(|(_, p)| !p.is_flat())
                .map(|(s, p)| (s.clone(), p.clone()))
                .collect(),
            marks: self.marks.clone(),
            working,
        }
    }
}

/// Remaining quantity of working orders for one symbol, split by side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingQuantity {
    pub buy: f64,
    pub sell: f64,
}

/// Immutable view of the portfolio at one point of logical time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cash: f64,
    pub equity: f64,
    pub peak_equity: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    /// Open (non-flat) positions.
    pub positions: BTreeMap<String, Position>,
    pub marks: BTreeMap<String, f64>,
    pub working: BTreeMap<String, WorkingQuantity>,
}

impl PortfolioSnapshot {
    pub fn quantity(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    pub fn mark(&self, symbol: &str) -> Option<f64> {
        self.marks.get(symbol).copied()
    }

    pub fn working(&self, symbol: &str) -> WorkingQuantity {
        self.working.get(symbol).copied().unwrap_or_default()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }
}
