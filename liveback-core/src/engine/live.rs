//! Live engine: the same loop over a push-fed, non-restartable source.
//!
//! Market data producers and the venue gateway run on their own threads and
//! push into the `LiveFeed`; this engine is the single consumer. Late events
//! within `live.lateness_window_ms` are re-inserted with a warning, older ones
//! are dropped. Nothing about lateness is fatal here.

use super::event_loop::EngineCore;
use super::state::{EngineStatus, RunReport};
use super::stop::StopHandle;
use super::TradingEngine;
use crate::config::LivebackConfig;
use crate::data::{DataClient, LiveFeed};
use crate::domain::Portfolio;
use crate::error::EngineError;
use crate::event_bus::BusPolicy;
use crate::execution::{BrokerSim, ExecutionClient};
use crate::recorder::Recorder;
use crate::rng::RngHierarchy;
use crate::strategy::Strategy;

pub struct LiveEngine<D: DataClient = LiveFeed> {
    core: EngineCore,
    data: D,
}

impl<D: DataClient> LiveEngine<D> {
    pub fn new(
        config: &LivebackConfig,
        data: D,
        execution: Box<dyn ExecutionClient>,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, EngineError> {
        let policy = BusPolicy::Reorder {
            lateness: config.live.lateness_window(),
        };
        Ok(Self {
            core: EngineCore::new(config, policy, execution, strategy)?,
            data,
        })
    }

    /// Paper trading: live data, simulated fills.
    pub fn paper(
        config: &LivebackConfig,
        data: D,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, EngineError> {
        let rng = RngHierarchy::new(config.engine.seed, config.engine.run_id());
        let broker = BrokerSim::new(&config.broker, rng);
        Self::new(config, data, Box::new(broker), strategy)
    }

    pub fn with_recorder(mut self, recorder: Box<dyn Recorder>) -> Self {
        self.core.set_recorder(recorder);
        self
    }

    pub fn portfolio(&self) -> &Portfolio {
        self.core.portfolio()
    }

    pub fn core(&self) -> &EngineCore {
        &self.core
    }
}

impl<D: DataClient> TradingEngine for LiveEngine<D> {
    fn run(&mut self) -> Result<RunReport, EngineError> {
        self.core.drive(&mut self.data)
    }

    fn stop_handle(&self) -> StopHandle {
        self.core.stop_handle()
    }

    fn status(&self) -> EngineStatus {
        self.core.status()
    }
}
