//! Slippage models: reference price to execution cost.
//!
//! - Market orders pay slippage, in the adverse direction
//! - Limit orders pay none (passive fill at the limit or better)
//!
//! Models return a per-unit cost in price units; `CostModel` applies it.

use crate::domain::{Event, OrderType};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Market conditions seen by a slippage model for one fill.
#[derive(Debug, Clone, Copy)]
pub struct SlippageInput<'a> {
    pub event: &'a Event,
    pub reference_price: f64,
    pub quantity: f64,
}

pub trait SlippageModel: Send + Sync {
    /// Slippage in price units (positive = cost). `rng` is the symbol's
    /// seeded stream; deterministic models ignore it.
    fn compute(&self, order_type: &OrderType, input: &SlippageInput<'_>, rng: &mut StdRng) -> f64;

    fn name(&self) -> &str;
}

fn passive(order_type: &OrderType) -> bool {
    matches!(order_type, OrderType::Limit { .. })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoSlippage;

impl SlippageModel for NoSlippage {
    fn compute(&self, _: &OrderType, _: &SlippageInput<'_>, _: &mut StdRng) -> f64 {
        0.0
    }

    fn name(&self) -> &str {
        "NoSlippage"
    }
}

/// Constant cost in basis points of the reference price.
#[derive(Debug, Clone, Copy)]
pub struct FixedBpsSlippage {
    pub bps: f64,
}

impl SlippageModel for FixedBpsSlippage {
    fn compute(&self, order_type: &OrderType, input: &SlippageInput<'_>, _: &mut StdRng) -> f64 {
        if passive(order_type) {
            return 0.0;
        }
        input.reference_price * self.bps / 10_000.0
    }

    fn name(&self) -> &str {
        "FixedBpsSlippage"
    }
}

/// Cost grows with the share of the event's volume the fill consumes.
/// Without a volume field the fill is treated as taking the full volume.
#[derive(Debug, Clone, Copy)]
pub struct VolumeProportionalSlippage {
    pub bps_at_full_volume: f64,
}

impl SlippageModel for VolumeProportionalSlippage {
    fn compute(&self, order_type: &OrderType, input: &SlippageInput<'_>, _: &mut StdRng) -> f64 {
        if passive(order_type) {
            return 0.0;
        }
        let participation = match input.event.volume {
            Some(v) if v > 0.0 => (input.quantity / v).min(1.0),
            _ => 1.0,
        };
        input.reference_price * self.bps_at_full_volume / 10_000.0 * participation
    }

    fn name(&self) -> &str {
        "VolumeProportionalSlippage"
    }
}

/// Uniform draw over the half-spread. Events without a quote fall back to a
/// half-spread of `fallback_bps` of the reference price.
#[derive(Debug, Clone, Copy)]
pub struct RandomWithinSpreadSlippage {
    pub fallback_bps: f64,
}

impl SlippageModel for RandomWithinSpreadSlippage {
    fn compute(&self, order_type: &OrderType, input: &SlippageInput<'_>, rng: &mut StdRng) -> f64 {
        if passive(order_type) {
            return 0.0;
        }
        let half_spread = input
            .event
            .spread()
            .map(|s| s / 2.0)
            .unwrap_or(input.reference_price * self.fallback_bps / 10_000.0);
        if half_spread <= 0.0 {
            return 0.0;
        }
        rng.gen_range(0.0..1.0) * half_spread
    }

    fn name(&self) -> &str {
        "RandomWithinSpreadSlippage"
    }
}

/// Serializable choice of slippage model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlippageConfig {
    #[default]
    None,
    FixedBps { bps: f64 },
    VolumeProportional { bps_at_full_volume: f64 },
    RandomWithinSpread { fallback_bps: f64 },
}

impl SlippageConfig {
    pub fn build(&self) -> Box<dyn SlippageModel> {
        match *self {
            SlippageConfig::None => Box::new(NoSlippage),
            SlippageConfig::FixedBps { bps } => Box::new(FixedBpsSlippage { bps }),
            SlippageConfig::VolumeProportional { bps_at_full_volume } => {
                Box::new(VolumeProportionalSlippage { bps_at_full_volume })
            }
            SlippageConfig::RandomWithinSpread { fallback_bps } => {
                Box::new(RandomWithinSpreadSlippage { fallback_bps })
            }
        }
    }

    /// Largest basis-point parameter, for validation.
    pub fn bps(&self) -> f64 {
        match *self {
            SlippageConfig::None => 0.0,
            SlippageConfig::FixedBps { bps } => bps,
            SlippageConfig::VolumeProportional { bps_at_full_volume } => bps_at_full_volume,
            SlippageConfig::RandomWithinSpread { fallback_bps } => fallback_bps,
        }
    }
}
