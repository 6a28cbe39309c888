//! Deterministic RNG hierarchy.
//!
//! A master seed is expanded into per-`(run, symbol)` sub-seeds via BLAKE3.
//! Derivation is hash-based, so the stream a symbol sees does not depend on
//! which other symbols traded or in what order they were first touched.

use crate::domain::RunId;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct RngHierarchy {
    master_seed: u64,
    run_id: RunId,
}

impl RngHierarchy {
    pub fn new(master_seed: u64, run_id: RunId) -> Self {
        Self {
            master_seed,
            run_id,
        }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Sub-seed for one symbol's stream.
    pub fn sub_seed(&self, symbol: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(&self.run_id.0);
        hasher.update(symbol.as_bytes());
        let hash = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }

    pub fn rng_for(&self, symbol: &str) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(symbol))
    }
}

/// Lazily created per-symbol generators drawn from one hierarchy.
#[derive(Debug, Clone)]
pub struct SymbolRngs {
    hierarchy: RngHierarchy,
    streams: BTreeMap<String, StdRng>,
}

impl SymbolRngs {
    pub fn new(hierarchy: RngHierarchy) -> Self {
        Self {
            hierarchy,
            streams: BTreeMap::new(),
        }
    }

    pub fn get(&mut self, symbol: &str) -> &mut StdRng {
        let hierarchy = &self.hierarchy;
        self.streams
            .entry(symbol.to_string())
            .or_insert_with(|| hierarchy.rng_for(symbol))
    }
}
