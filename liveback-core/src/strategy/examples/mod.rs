//! Example strategies

pub mod ma_cross;
pub mod noop;

pub use ma_cross::MaCrossStrategy;
pub use noop::NoOpStrategy;
