//! Run configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file is a valid frictionless
//! backtest with no risk limits.

use crate::domain::RunId;
use crate::execution::BrokerSimConfig;
use crate::risk::{RiskLimits, RiskManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LivebackConfig {
    pub engine: EngineConfig,
    pub broker: BrokerSimConfig,
    pub risk: RiskConfig,
    pub live: LiveConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_cash: f64,
    /// Master seed for stochastic slippage.
    pub seed: u64,
    /// Mixed with the seed into the run id.
    pub run_label: String,
    /// Backtest events may regress this far behind the newest timestamp.
    pub sequence_tolerance_ms: u64,
    /// Events at or after this instant are not processed, and fills stamped
    /// at or after it are discarded at shutdown.
    pub stop_at: Option<DateTime<Utc>>,
}

impl EngineConfig {
    pub fn run_id(&self) -> RunId {
        RunId::from_label(&self.run_label, self.seed)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            seed: 42,
            run_label: "liveback".into(),
            sequence_tolerance_ms: 0,
            stop_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// `false` selects the no-op manager regardless of the limits below.
    pub enabled: bool,
    pub max_position: Option<f64>,
    pub max_gross_exposure: Option<f64>,
    pub margin_rate: Option<f64>,
    pub max_drawdown: Option<f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_position: None,
            max_gross_exposure: None,
            margin_rate: Some(1.0),
            max_drawdown: None,
        }
    }
}

impl RiskConfig {
    pub fn build(&self) -> RiskManager {
        if !self.enabled {
            return RiskManager::NoOp;
        }
        RiskManager::Limits(RiskLimits {
            max_position: self.max_position,
            max_gross_exposure: self.max_gross_exposure,
            margin_rate: self.margin_rate,
            max_drawdown: self.max_drawdown,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Upper bound on every call into the execution gateway.
    pub execution_timeout_ms: u64,
    /// Late live events within this window are re-inserted; older ones drop.
    pub lateness_window_ms: u64,
    /// How long the feed blocks before re-checking the stop handle.
    pub poll_interval_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            execution_timeout_ms: 2_000,
            lateness_window_ms: 500,
            poll_interval_ms: 50,
        }
    }
}

impl LiveConfig {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lateness_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.lateness_window_ms as i64)
    }
}

impl LivebackConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn sequence_tolerance(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.engine.sequence_tolerance_ms as i64)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if !self.engine.initial_cash.is_finite() || self.engine.initial_cash < 0.0 {
            return invalid(format!(
                "engine.initial_cash must be non-negative, got {}",
                self.engine.initial_cash
            ));
        }
        let p = self.broker.max_participation;
        if p.is_nan() || p <= 0.0 || p > 1.0 {
            return invalid(format!("broker.max_participation must be in (0, 1], got {p}"));
        }
        for (name, value) in [
            ("broker.commission_bps", self.broker.commission_bps),
            ("broker.min_fee", self.broker.min_fee),
            ("broker.slippage", self.broker.slippage.bps()),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        if let Some(rate) = self.risk.margin_rate {
            if rate.is_nan() || rate <= 0.0 {
                return invalid(format!("risk.margin_rate must be positive, got {rate}"));
            }
        }
        for (name, value) in [
            ("risk.max_position", self.risk.max_position),
            ("risk.max_gross_exposure", self.risk.max_gross_exposure),
            ("risk.max_drawdown", self.risk.max_drawdown),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return invalid(format!("{name} must be non-negative, got {v}"));
                }
            }
        }
        if self.live.execution_timeout_ms == 0 {
            return invalid("live.execution_timeout_ms must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::SlippageConfig;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = LivebackConfig::from_toml("").unwrap();
        assert_eq!(config, LivebackConfig::default());
        assert_eq!(config.engine.initial_cash, 100_000.0);
        assert_eq!(config.broker.max_participation, 1.0);
        assert_eq!(config.risk.build(), RiskManager::NoOp);
    }

    #[test]
    fn full_config_parses() {
        let config = LivebackConfig::from_toml(
            r#"
            [engine]
            initial_cash = 50000.0
            seed = 7
            stop_at = "2024-03-01T16:00:00Z"

            [broker]
            commission_bps = 1.0
            min_fee = 0.5
            latency_events = 2
            max_participation = 0.25
            slippage = { model = "RANDOM_WITHIN_SPREAD", fallback_bps = 3.0 }

            [risk]
            enabled = true
            max_position = 500.0

            [live]
            execution_timeout_ms = 750
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.seed, 7);
        assert!(config.engine.stop_at.is_some());
        assert_eq!(
            config.broker.slippage,
            SlippageConfig::RandomWithinSpread { fallback_bps: 3.0 }
        );
        assert_eq!(config.live.execution_timeout(), Duration::from_millis(750));
        match config.risk.build() {
            RiskManager::Limits(limits) => {
                assert_eq!(limits.max_position, Some(500.0));
                assert_eq!(limits.margin_rate, Some(1.0));
            }
            RiskManager::NoOp => panic!("risk should be enabled"),
        }
    }

    #[test]
    fn participation_out_of_range_is_invalid() {
        let err = LivebackConfig::from_toml("[broker]\nmax_participation = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn negative_cash_is_invalid() {
        let err = LivebackConfig::from_toml("[engine]\ninitial_cash = -1.0\n").unwrap_err();
        assert!(err.to_string().contains("initial_cash"));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nrun_label = \"nightly\"").unwrap();
        let config = LivebackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.engine.run_label, "nightly");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = LivebackConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
