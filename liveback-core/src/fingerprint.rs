//! Run fingerprinting: bit-exact identity of a run's observable output.
//!
//! Two runs with the same inputs, seed and config must produce the same
//! fill sequence and equity curve. The fingerprint hashes both from raw
//! float bits, so any divergence (even in the last ulp) changes the digest.

use crate::domain::{EquityPoint, Fill, OrderSide, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub run_id: String,
    pub seed: u64,
    pub fill_count: usize,
    pub equity_points: usize,
    pub fills_hash: String,
    pub equity_hash: String,
    pub digest: String,
}

fn hash_timestamp(hasher: &mut blake3::Hasher, ts: &DateTime<Utc>) {
    hasher.update(&ts.timestamp().to_le_bytes());
    hasher.update(&ts.timestamp_subsec_nanos().to_le_bytes());
}

fn hash_f64(hasher: &mut blake3::Hasher, v: f64) {
    hasher.update(&v.to_bits().to_le_bytes());
}

/// Digest of the fill sequence in emission order.
pub fn fills_hash(fills: &[Fill]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for fill in fills {
        hasher.update(&fill.order_id.0.to_le_bytes());
        hash_timestamp(&mut hasher, &fill.timestamp);
        hasher.update(fill.symbol.as_bytes());
        hasher.update(&[0]);
        hasher.update(&[match fill.side {
            OrderSide::Buy => b'B',
            OrderSide::Sell => b'S',
        }]);
        hash_f64(&mut hasher, fill.price);
        hash_f64(&mut hasher, fill.quantity);
        hash_f64(&mut hasher, fill.fees);
        hash_f64(&mut hasher, fill.slippage);
    }
    hasher.finalize()
}

pub fn equity_hash(curve: &[EquityPoint]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for point in curve {
        hash_timestamp(&mut hasher, &point.timestamp);
        hash_f64(&mut hasher, point.equity);
    }
    hasher.finalize()
}

impl RunFingerprint {
    pub fn compute(run_id: &RunId, seed: u64, fills: &[Fill], curve: &[EquityPoint]) -> Self {
        let fills_hash = fills_hash(fills);
        let equity_hash = equity_hash(curve);

        let mut hasher = blake3::Hasher::new();
        hasher.update(&run_id.0);
        hasher.update(&seed.to_le_bytes());
        hasher.update(fills_hash.as_bytes());
        hasher.update(equity_hash.as_bytes());

        Self {
            run_id: run_id.to_hex(),
            seed,
            fill_count: fills.len(),
            equity_points: curve.len(),
            fills_hash: fills_hash.to_hex().to_string(),
            equity_hash: equity_hash.to_hex().to_string(),
            digest: hasher.finalize().to_hex().to_string(),
        }
    }

    /// Whether two runs produced the same fills and equity curve, ignoring
    /// run identity.
    pub fn same_output(&self, other: &RunFingerprint) -> bool {
        self.fills_hash == other.fills_hash && self.equity_hash == other.equity_hash
    }
}

impl fmt::Display for RunFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} fills, {} equity points)",
            &self.digest[..16.min(self.digest.len())],
            self.fill_count,
            self.equity_points
        )
    }
}
