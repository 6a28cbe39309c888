//! Moving average crossover strategy
//!
//! Classic trend-following rule, evaluated per symbol on every market event:
//! - Target long `quantity` when the fast MA crosses above the slow MA
//! - Target flat (or short, if enabled) when it crosses below
//! - Hold the current target otherwise

use crate::domain::{Event, NewOrder, OrderSide, QTY_EPSILON};
use crate::strategy::{OrderIntent, Strategy, StrategyContext};
use std::collections::{BTreeMap, VecDeque};

/// Moving average crossover
///
/// # Parameters
/// - `fast_period`: short MA window, in events (e.g. 5)
/// - `slow_period`: long MA window, in events (e.g. 20)
/// - `quantity`: absolute position size taken on a cross
///
/// Orders are sized against position plus working orders, so a cross seen
/// while an earlier order is still in flight does not double the position.
#[derive(Debug, Clone)]
pub struct MaCrossStrategy {
    fast_period: usize,
    slow_period: usize,
    quantity: f64,
    allow_short: bool,
    prices: BTreeMap<String, VecDeque<f64>>,
}

impl MaCrossStrategy {
    pub fn new(fast_period: usize, slow_period: usize, quantity: f64) -> Self {
        assert!(fast_period > 0, "fast_period must be > 0");
        assert!(slow_period > fast_period, "slow_period must be > fast_period");
        assert!(quantity > 0.0, "quantity must be > 0");
        Self {
            fast_period,
            slow_period,
            quantity,
            allow_short: false,
            prices: BTreeMap::new(),
        }
    }

    /// Go short on a bearish cross instead of flat.
    pub fn with_shorts(mut self) -> Self {
        self.allow_short = true;
        self
    }

    fn sma(prices: &VecDeque<f64>, period: usize, skip_last: usize) -> Option<f64> {
        let end = prices.len().checked_sub(skip_last)?;
        let start = end.checked_sub(period)?;
        let sum: f64 = prices.range(start..end).sum();
        Some(sum / period as f64)
    }

    /// Some(true) on a bullish cross, Some(false) on a bearish one.
    fn detect_cross(&self, prices: &VecDeque<f64>) -> Option<bool> {
        let fast_now = Self::sma(prices, self.fast_period, 0)?;
        let slow_now = Self::sma(prices, self.slow_period, 0)?;
        let fast_prev = Self::sma(prices, self.fast_period, 1)?;
        let slow_prev = Self::sma(prices, self.slow_period, 1)?;

        if fast_prev <= slow_prev && fast_now > slow_now {
            Some(true)
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Some(false)
        } else {
            None
        }
    }
}

impl Strategy for MaCrossStrategy {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn on_event(&mut self, event: &Event, ctx: &StrategyContext) -> Vec<OrderIntent> {
        let Some(price) = event.reference_price() else {
            return Vec::new();
        };

        let window = self.slow_period + 1;
        let prices = self.prices.entry(event.symbol.clone()).or_default();
        prices.push_back(price);
        while prices.len() > window {
            prices.pop_front();
        }

        let Some(bullish) = self.detect_cross(&self.prices[&event.symbol]) else {
            return Vec::new();
        };

        let target = match (bullish, self.allow_short) {
            (true, _) => self.quantity,
            (false, true) => -self.quantity,
            (false, false) => 0.0,
        };

        let portfolio = ctx.portfolio();
        let working = portfolio.working(&event.symbol);
        let projected = portfolio.quantity(&event.symbol) + working.buy - working.sell;
        let delta = target - projected;
        if delta.abs() <= QTY_EPSILON {
            return Vec::new();
        }

        let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
        vec![OrderIntent::Submit(NewOrder::market(
            event.symbol.clone(),
            side,
            delta.abs(),
        ))]
    }
}
