//! Application configuration: one serde section per component, loaded from
//! a JSON file and validated as a whole.

use crate::discovery::DiscoveryConfig;
use crate::execution::ExecutionConfig;
use crate::math::KalmanConfig;
use crate::monitor::MonitorConfig;
use crate::pipeline::PipelineConfig;
use crate::risk::RiskConfig;
use crate::strategy::SignalConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid {section} config: {reason}")]
    Invalid {
        section: &'static str,
        reason: String,
    },
}

/// Every section is optional in the file; missing fields take defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub kalman: KalmanConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |section: &'static str| move |reason: String| ConfigError::Invalid { section, reason };

        self.kalman.validate().map_err(invalid("kalman"))?;
        self.discovery.validate().map_err(invalid("discovery"))?;
        self.signal.validate().map_err(invalid("signal"))?;
        self.execution.validate().map_err(invalid("execution"))?;
        self.risk.validate().map_err(invalid("risk"))?;
        self.monitor.validate().map_err(invalid("monitor"))?;
        self.pipeline.validate().map_err(invalid("pipeline"))?;

        let capacity = self.pipeline.history_capacity;
        if capacity != 0 && capacity < self.discovery.min_history {
            return Err(ConfigError::Invalid {
                section: "pipeline",
                reason: format!(
                    "history_capacity {capacity} is below discovery.min_history {}",
                    self.discovery.min_history
                ),
            });
        }
        Ok(())
    }
}
