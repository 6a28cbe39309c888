use serde::{Deserialize, Serialize};
use std::fmt;

/// Order ID. Assigned by the engine, strictly increasing within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Monotonic ID generator owned by a single engine instance.
///
/// There is no process-wide counter: two engines running side by side hand out
/// the same sequence of IDs, which is what makes their fill logs comparable.
#[derive(Debug, Clone)]
pub struct IdGen {
    next_order: u64,
}

impl IdGen {
    pub fn new() -> Self {
        Self { next_order: 1 }
    }

    pub fn next_order_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order);
        self.next_order += 1;
        id
    }

    /// The ID the next call to `next_order_id` will return.
    pub fn peek(&self) -> OrderId {
        OrderId(self.next_order)
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic run ID (label + seed), used to derive RNG sub-seeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub [u8; 32]);

impl RunId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    pub fn from_label(label: &str, seed: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(label.as_bytes());
        hasher.update(&seed.to_le_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_strictly_increase() {
        let mut ids = IdGen::new();
        let a = ids.next_order_id();
        let b = ids.next_order_id();
        let c = ids.next_order_id();
        assert_eq!(a, OrderId(1));
        assert!(a < b && b < c);
        assert_eq!(ids.peek(), OrderId(4));
    }

    #[test]
    fn independent_generators_do_not_share_state() {
        let mut first = IdGen::new();
        let mut second = IdGen::new();
        first.next_order_id();
        first.next_order_id();
        assert_eq!(second.next_order_id(), OrderId(1));
    }

    #[test]
    fn run_id_deterministic() {
        assert_eq!(RunId::from_label("bt", 42), RunId::from_label("bt", 42));
        assert_ne!(RunId::from_label("bt", 42), RunId::from_label("bt", 43));
        assert_ne!(RunId::from_label("bt", 42), RunId::from_label("live", 42));
    }

    #[test]
    fn run_id_display_is_short_hex() {
        let id = RunId::from_bytes(b"test-run-1");
        assert_eq!(id.to_string().len(), 12);
        assert_eq!(id.to_hex().len(), 64);
    }
}
