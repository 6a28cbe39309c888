//! Trading engines: one event loop, two ways to feed it.
//!
//! `BacktestEngine` replays a finite stream through the simulated broker;
//! `LiveEngine` consumes a push-fed feed and routes orders to any execution
//! client. Both wrap `EngineCore`, so a strategy cannot tell them apart.

pub mod backtest;
pub mod event_loop;
pub mod live;
pub mod order_book;
pub mod state;
pub mod stop;

pub use backtest::BacktestEngine;
pub use event_loop::EngineCore;
pub use live::LiveEngine;
pub use order_book::{OrderBook, OrderError};
pub use state::{
    EngineStatus, Reconciliation, RejectionRecord, RunReport, RunTrace, TimeoutRecord,
};
pub use stop::StopHandle;

use crate::error::EngineError;

/// Common contract of the backtest and live engines.
pub trait TradingEngine {
    /// Run to completion. Returns `Err` only for fatal conditions, in which
    /// case `status()` is `Error`.
    fn run(&mut self) -> Result<RunReport, EngineError>;

    /// Handle that stops the run from any thread.
    fn stop_handle(&self) -> StopHandle;

    fn status(&self) -> EngineStatus;
}
