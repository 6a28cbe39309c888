//! Backtest engine: replays a finite event stream through the simulated broker.

use super::event_loop::EngineCore;
use super::state::{EngineStatus, RunReport};
use super::stop::StopHandle;
use super::TradingEngine;
use crate::config::LivebackConfig;
use crate::data::DataClient;
use crate::domain::Portfolio;
use crate::error::EngineError;
use crate::event_bus::BusPolicy;
use crate::execution::{BrokerSim, ExecutionClient};
use crate::recorder::Recorder;
use crate::rng::RngHierarchy;
use crate::strategy::Strategy;

/// Single-threaded backtest.
///
/// The bus runs in strict mode: an event that regresses further than
/// `engine.sequence_tolerance_ms` behind the newest timestamp aborts the run,
/// because replaying it out of order would break determinism.
pub struct BacktestEngine<D: DataClient> {
    core: EngineCore,
    data: D,
}

impl<D: DataClient> BacktestEngine<D> {
    /// Backtest against a `BrokerSim` built from `config.broker`, seeded from
    /// `config.engine`.
    pub fn new(
        config: &LivebackConfig,
        data: D,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, EngineError> {
        let rng = RngHierarchy::new(config.engine.seed, config.engine.run_id());
        let broker = BrokerSim::new(&config.broker, rng);
        Self::with_execution(config, data, Box::new(broker), strategy)
    }

    /// Backtest against a caller-supplied execution client.
    pub fn with_execution(
        config: &LivebackConfig,
        data: D,
        execution: Box<dyn ExecutionClient>,
        strategy: Box<dyn Strategy>,
    ) -> Result<Self, EngineError> {
        let policy = BusPolicy::Strict {
            tolerance: config.sequence_tolerance(),
        };
        Ok(Self {
            core: EngineCore::new(config, policy, execution, strategy)?,
            data,
        })
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

    pub fn into_data(self) -> D {
        self.data
    }
}

impl<D: DataClient> TradingEngine for BacktestEngine<D> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataError, ReplayData};
    use crate::domain::{Event, NewOrder};
    use crate::strategy::{NoOpStrategy, OrderIntent, StrategyContext};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap() + Duration::minutes(i)
    }

    /// Buys once on the first event.
    struct BuyOnce(bool);

    impl Strategy for BuyOnce {
        fn name(&self) -> &str {
            "buy_once"
        }

        fn on_event(&mut self, event: &Event, _ctx: &StrategyContext) -> Vec<OrderIntent> {
            if self.0 {
                return Vec::new();
            }
            self.0 = true;
            vec![OrderIntent::Submit(NewOrder::buy(event.symbol.clone(), 10.0))]
        }
    }

    fn bars(prices: &[f64]) -> ReplayData {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Event::bar(t(i as i64), "AAPL", *p, None))
            .collect()
    }

    #[test]
    fn empty_stream_stops_cleanly() {
        let config = LivebackConfig::default();
        let mut engine =
            BacktestEngine::new(&config, ReplayData::new(vec![]), Box::new(NoOpStrategy)).unwrap();
        assert_eq!(engine.status(), EngineStatus::Init);
        let report = engine.run().unwrap();
        assert_eq!(report.status, EngineStatus::Stopped);
        assert!(report.fills.is_empty());
        assert!(report.equity_curve.is_empty());
        assert_eq!(report.summary.final_equity, config.engine.initial_cash);
    }

    #[test]
    fn second_run_is_invalid_state() {
        let config = LivebackConfig::default();
        let mut engine =
            BacktestEngine::new(&config, bars(&[100.0]), Box::new(NoOpStrategy)).unwrap();
        engine.run().unwrap();
        assert!(matches!(
            engine.run(),
            Err(EngineError::InvalidState(EngineStatus::Stopped))
        ));
    }

    #[test]
    fn market_order_fills_on_next_bar() {
        let config = LivebackConfig::default();
        let mut engine =
            BacktestEngine::new(&config, bars(&[100.0, 101.0]), Box::new(BuyOnce(false))).unwrap();
        let report = engine.run().unwrap();
        assert_eq!(report.fills.len(), 1);
        assert_eq!(report.fills[0].price, 101.0);
        assert_eq!(report.fills[0].timestamp, t(1));
        assert_eq!(engine.portfolio().quantity("AAPL"), 10.0);
        assert_eq!(report.equity_curve.len(), 2);
    }

    #[test]
    fn order_still_working_at_end_is_canceled() {
        let config = LivebackConfig::default();
        let mut engine =
            BacktestEngine::new(&config, bars(&[100.0]), Box::new(BuyOnce(false))).unwrap();
        let report = engine.run().unwrap();
        assert!(report.fills.is_empty());
        assert_eq!(
            report.orders[0].status,
            crate::domain::OrderStatus::Canceled
        );
    }

    #[test]
    fn unrecoverable_data_error_ends_in_error() {
        let config = LivebackConfig::default();
        let data = ReplayData::from_results(vec![
            Ok(Event::bar(t(0), "AAPL", 100.0, None)),
            Err(DataError::Unrecoverable("socket reset".into())),
        ]);
        let mut engine = BacktestEngine::new(&config, data, Box::new(NoOpStrategy)).unwrap();
        assert!(matches!(engine.run(), Err(EngineError::Data(_))));
        assert_eq!(engine.status(), EngineStatus::Error);
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = LivebackConfig::default();
        config.broker.max_participation = 0.0;
        assert!(matches!(
            BacktestEngine::new(&config, bars(&[1.0]), Box::new(NoOpStrategy)),
            Err(EngineError::Config(_))
        ));
    }
}
