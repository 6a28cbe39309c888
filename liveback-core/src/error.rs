//! Engine error taxonomy.
//!
//! Each concern owns its error enum; `EngineError` aggregates them. Only
//! `Sequence` (backtest) and `Data(Unrecoverable)` end a run in ERROR. The
//! rest are recorded in the run trace and the run continues.

use crate::config::ConfigError;
use crate::data::DataError;
use crate::domain::OrderId;
use crate::engine::{EngineStatus, OrderError};
use crate::event_bus::SequenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("data error: {0}")]
    Data(#[from] DataError),

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("execution call for order {order_id} timed out after {after_ms} ms; status UNKNOWN")]
    ExecutionTimeout { order_id: OrderId, after_ms: u64 },

    #[error("sequence error: {0}")]
    Sequence(#[from] SequenceError),

    #[error("engine cannot run from state {0}")]
    InvalidState(EngineStatus),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    /// Whether this error ends the run in the ERROR state.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Data(e) => e.is_fatal(),
            EngineError::Sequence(_) | EngineError::InvalidState(_) | EngineError::Config(_) => {
                true
            }
            EngineError::Order(_) | EngineError::ExecutionTimeout { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_are_not_fatal() {
        let e = EngineError::ExecutionTimeout {
            order_id: OrderId(3),
            after_ms: 250,
        };
        assert!(!e.is_fatal());
        assert!(e.to_string().contains("#3"));
    }

    #[test]
    fn unrecoverable_data_is_fatal() {
        assert!(EngineError::from(DataError::Unrecoverable("eof".into())).is_fatal());
        assert!(!EngineError::from(DataError::NotRestartable).is_fatal());
    }
}
