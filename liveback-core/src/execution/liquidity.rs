//! Liquidity constraints: participation limits for simulated fills.
//!
//! When an event carries a volume, orders on that symbol may together take at
//! most `max_participation` of it. Unfilled remainder stays working and is
//! offered to later events. Events without a volume do not constrain.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiquidityPolicy {
    /// Fraction of event volume available to this account, in (0, 1].
    pub max_participation: f64,
}

impl Default for LiquidityPolicy {
    fn default() -> Self {
        Self {
            max_participation: 1.0,
        }
    }
}

impl LiquidityPolicy {
    pub fn new(max_participation: f64) -> Self {
        debug_assert!(
            max_participation > 0.0 && max_participation <= 1.0,
            "participation rate must be in (0, 1]"
        );
        Self { max_participation }
    }

    /// Quantity available on one event, shared by all working orders.
    pub fn budget(&self, volume: Option<f64>) -> f64 {
        volume.map_or(f64::INFINITY, |v| v * self.max_participation)
    }

    /// Split a desired quantity against the remaining budget.
    ///
    /// Returns `(fill_qty, remainder_qty)`.
    pub fn constrain(&self, desired_qty: f64, budget: f64) -> (f64, f64) {
        if desired_qty <= budget {
            (desired_qty, 0.0)
        } else {
            let fill = budget.max(0.0);
            (fill, desired_qty - fill)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_volume_means_no_cap() {
        let policy = LiquidityPolicy::new(0.1);
        let budget = policy.budget(None);
        assert_eq!(policy.constrain(1e9, budget), (1e9, 0.0));
    }

    #[test]
    fn constraint_limits_fill() {
        let policy = LiquidityPolicy::new(0.10);
        let budget = policy.budget(Some(10_000.0));
        assert_eq!(policy.constrain(2_000.0, budget), (1_000.0, 1_000.0));
        assert_eq!(policy.constrain(1_000.0, budget), (1_000.0, 0.0));
    }

    #[test]
    fn zero_volume_fills_nothing() {
        let policy = LiquidityPolicy::default();
        assert_eq!(policy.constrain(100.0, policy.budget(Some(0.0))), (0.0, 100.0));
    }
}
