use crate::domain::Event;
use crate::strategy::{OrderIntent, Strategy, StrategyContext};

/// Never trades. Useful for measuring loop overhead and for smoke runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpStrategy;

impl Strategy for NoOpStrategy {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_event(&mut self, _event: &Event, _ctx: &StrategyContext) -> Vec<OrderIntent> {
        Vec::new()
    }
}
