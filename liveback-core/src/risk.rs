//! Pre-trade risk checks.
//!
//! `RiskManager::validate` is a pure function of the order and a portfolio
//! snapshot. Rules run in a fixed order and the first failure wins:
//!
//! 1. `MAX_POSITION_EXCEEDED`: worst-case position per symbol, counting every
//!    working order on the same side as if it fills
//! 2. `MAX_EXPOSURE_EXCEEDED`: worst-case gross exposure across symbols
//! 3. `INSUFFICIENT_MARGIN`: `cash + unrealized_pnl` must cover the margin
//!    already committed by working orders plus `required_margin(order)`
//! 4. `MAX_DRAWDOWN_EXCEEDED`: position-increasing orders are blocked while
//!    equity sits too far below its peak
//!
//! A disabled manager is the `NoOp` variant, never an absent value.

use crate::domain::{Order, OrderSide, PortfolioSnapshot, QTY_EPSILON};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Why an order was refused, by risk, by shape validation or by the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    MaxPositionExceeded,
    MaxExposureExceeded,
    InsufficientMargin,
    MaxDrawdownExceeded,
    NoReferencePrice,
    InvalidOrder(String),
    BrokerRejected(String),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MaxPositionExceeded => "MAX_POSITION_EXCEEDED",
            RejectReason::MaxExposureExceeded => "MAX_EXPOSURE_EXCEEDED",
            RejectReason::InsufficientMargin => "INSUFFICIENT_MARGIN",
            RejectReason::MaxDrawdownExceeded => "MAX_DRAWDOWN_EXCEEDED",
            RejectReason::NoReferencePrice => "NO_REFERENCE_PRICE",
            RejectReason::InvalidOrder(_) => "INVALID_ORDER",
            RejectReason::BrokerRejected(_) => "BROKER_REJECTED",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InvalidOrder(detail) | RejectReason::BrokerRejected(detail) => {
                write!(f, "{}: {detail}", self.code())
            }
            _ => f.write_str(self.code()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    Accept,
    Reject(RejectReason),
}

impl RiskDecision {
    pub fn is_accept(&self) -> bool {
        matches!(self, RiskDecision::Accept)
    }
}

/// Configured limits. An absent limit is not checked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum absolute position per symbol, in units.
    pub max_position: Option<f64>,
    /// Maximum sum of absolute position values across symbols.
    pub max_gross_exposure: Option<f64>,
    /// Fraction of notional that must be covered by `cash + unrealized_pnl`.
    /// `None` disables the margin rule.
    pub margin_rate: Option<f64>,
    /// Maximum fractional drawdown from peak equity (0.2 = 20%).
    pub max_drawdown: Option<f64>,
}

impl RiskLimits {
    fn needs_price(&self) -> bool {
        self.max_gross_exposure.is_some() || self.margin_rate.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RiskManager {
    /// Accepts everything.
    #[default]
    NoOp,
    Limits(RiskLimits),
}

/// Extreme positions a symbol can reach if working orders (and optionally
/// the candidate order) fill: `(long_extreme, short_extreme)`.
fn extremes(snapshot: &PortfolioSnapshot, symbol: &str, extra: Option<&Order>) -> (f64, f64) {
    let pos = snapshot.quantity(symbol);
    let working = snapshot.working(symbol);
    let (mut long, mut short) = (pos + working.buy, pos - working.sell);
    if let Some(order) = extra.filter(|o| o.symbol == symbol) {
        match order.side {
            OrderSide::Buy => long += order.remaining_quantity(),
            OrderSide::Sell => short -= order.remaining_quantity(),
        }
    }
    (long, short)
}

fn worst_abs(extremes: (f64, f64)) -> f64 {
    extremes.0.abs().max(extremes.1.abs())
}

impl RiskManager {
    pub fn limits(limits: RiskLimits) -> Self {
        RiskManager::Limits(limits)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, RiskManager::Limits(_))
    }

    pub fn checks_exposure(&self) -> bool {
        matches!(
            self,
            RiskManager::Limits(RiskLimits {
                max_gross_exposure: Some(_),
                ..
            })
        )
    }

    /// Price used to value the order: its limit price, else the latest mark.
    pub fn reference_price(order: &Order, snapshot: &PortfolioSnapshot) -> Option<f64> {
        order.limit_price().or_else(|| snapshot.mark(&order.symbol))
    }

    /// Quantity by which the order can grow the absolute position, assuming
    /// same-side working orders fill first.
    pub fn increasing_quantity(order: &Order, snapshot: &PortfolioSnapshot) -> f64 {
        let (long, short) = extremes(snapshot, &order.symbol, None);
        let before = match order.side {
            OrderSide::Buy => long,
            OrderSide::Sell => short,
        };
        let after = before + order.side.sign() * order.remaining_quantity();
        (after.abs() - before.abs()).max(0.0)
    }

    /// Margin needed to carry the position-increasing part of the order.
    pub fn required_margin(&self, order: &Order, snapshot: &PortfolioSnapshot) -> Option<f64> {
        let RiskManager::Limits(RiskLimits {
            margin_rate: Some(rate),
            ..
        }) = self
        else {
            return Some(0.0);
        };
        let price = Self::reference_price(order, snapshot)?;
        Some(Self::increasing_quantity(order, snapshot) * price * rate)
    }

    /// Margin held by working orders: the part of each symbol's working buys
    /// and sells that would grow the position, valued at the mark.
    pub fn committed_margin(snapshot: &PortfolioSnapshot, rate: f64) -> f64 {
        snapshot
            .working
            .iter()
            .map(|(symbol, working)| {
                let pos = snapshot.quantity(symbol);
                let long_inc = ((pos + working.buy).abs() - pos.abs()).max(0.0);
                let short_inc = ((pos - working.sell).abs() - pos.abs()).max(0.0);
                let price = snapshot
                    .mark(symbol)
                    .or_else(|| snapshot.positions.get(symbol).map(|p| p.average_cost))
                    .unwrap_or(0.0);
                (long_inc + short_inc) * price * rate
            })
            .sum()
    }

    /// Whether the order, filling at the current mark of its symbol, would
    /// take worst-case gross exposure past the configured limit. Used to
    /// re-check working orders when prices move after acceptance.
    pub fn exposure_breached_at_mark(&self, order: &Order, snapshot: &PortfolioSnapshot) -> bool {
        let RiskManager::Limits(RiskLimits {
            max_gross_exposure: Some(max),
            ..
        }) = self
        else {
            return false;
        };
        let Some(mark) = snapshot.mark(&order.symbol) else {
            return false;
        };
        Self::increasing_quantity(order, snapshot) > QTY_EPSILON
            && Self::post_trade_exposure(order, snapshot, mark) > *max
    }

    /// Worst-case gross exposure if the order and all working orders fill.
    fn post_trade_exposure(order: &Order, snapshot: &PortfolioSnapshot, order_price: f64) -> f64 {
        let mut symbols: Vec<&str> = snapshot
            .positions
            .keys()
            .chain(snapshot.working.keys())
            .map(String::as_str)
            .collect();
        symbols.push(&order.symbol);
        symbols.sort_unstable();
        symbols.dedup();

        symbols
            .into_iter()
            .map(|symbol| {
                let price = if symbol == order.symbol {
                    order_price
                } else {
                    snapshot
                        .mark(symbol)
                        .or_else(|| snapshot.positions.get(symbol).map(|p| p.average_cost))
                        .unwrap_or(0.0)
                };
                worst_abs(extremes(snapshot, symbol, Some(order))) * price
            })
            .sum()
    }

    pub fn validate(&self, order: &Order, snapshot: &PortfolioSnapshot) -> RiskDecision {
        let limits = match self {
            RiskManager::NoOp => return RiskDecision::Accept,
            RiskManager::Limits(limits) => limits,
        };

        let decision = Self::check(limits, order, snapshot);
        if let RiskDecision::Reject(reason) = &decision {
            debug!(order_id = %order.id, symbol = %order.symbol, %reason, "risk check failed");
        }
        decision
    }

    fn check(limits: &RiskLimits, order: &Order, snapshot: &PortfolioSnapshot) -> RiskDecision {
        use RiskDecision::{Accept, Reject};

        if let Some(max) = limits.max_position {
            let worst = worst_abs(extremes(snapshot, &order.symbol, Some(order)));
            if worst > max + QTY_EPSILON {
                return Reject(RejectReason::MaxPositionExceeded);
            }
        }

        let price = Self::reference_price(order, snapshot);
        if limits.needs_price() && price.is_none() {
            return Reject(RejectReason::NoReferencePrice);
        }

        if let (Some(max), Some(price)) = (limits.max_gross_exposure, price) {
            if Self::post_trade_exposure(order, snapshot, price) > max {
                return Reject(RejectReason::MaxExposureExceeded);
            }
        }

        if let (Some(rate), Some(price)) = (limits.margin_rate, price) {
            let required = Self::increasing_quantity(order, snapshot) * price * rate;
            let available = snapshot.cash + snapshot.unrealized_pnl
                - Self::committed_margin(snapshot, rate);
            if required > 0.0 && available < required {
                return Reject(RejectReason::InsufficientMargin);
            }
        }

        if let Some(max_dd) = limits.max_drawdown {
            if snapshot.peak_equity > 0.0 && Self::increasing_quantity(order, snapshot) > 0.0 {
                let drawdown = (snapshot.peak_equity - snapshot.equity) / snapshot.peak_equity;
                if drawdown > max_dd {
                    return Reject(RejectReason::MaxDrawdownExceeded);
                }
            }
        }

        Accept
    }
}
