//! liveback core: one event-driven runtime for backtests and live trading.
//!
//! This crate contains:
//! - Domain types (events, orders, fills, positions, portfolio)
//! - Event bus with deterministic `(timestamp, sequence_no)` delivery
//! - Data source contract with replay and channel-fed live sources
//! - Pre-trade risk checks
//! - Execution clients: a seeded broker simulator and a timeout-bounded live broker
//! - Order book state machine
//! - Backtest and live engines sharing one event loop
//! - Strategy contract, recorder sink, performance summary and run fingerprint

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event_bus;
pub mod execution;
pub mod fingerprint;
pub mod metrics;
pub mod recorder;
pub mod risk;
pub mod rng;
pub mod strategy;

pub use config::{ConfigError, LivebackConfig};
pub use engine::{BacktestEngine, EngineStatus, LiveEngine, RunReport, StopHandle, TradingEngine};
pub use error::EngineError;
pub use strategy::{OrderIntent, Strategy, StrategyContext};
