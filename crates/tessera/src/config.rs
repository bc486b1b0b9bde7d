//! Scheduler configuration (tessera.toml)

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Which backend family the selector should bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Probe the host and pick the per-region family when it is present
    #[default]
    Auto,
    /// Always bind to the single-global-thread family
    Tick,
    /// Always bind to the per-region family
    Regionized,
}

/// Scheduler configuration, typically parsed from TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Backend selection override
    #[serde(default)]
    pub backend: BackendPreference,

    /// Length of one host tick in milliseconds, used to convert async
    /// durations into ticks on single-thread hosts
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

fn default_tick_millis() -> u64 {
    50
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            backend: BackendPreference::default(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl SchedulerConfig {
    /// Parse a configuration from a TOML string
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_millis == 0 {
            return Err(ConfigError::Invalid(
                "tick_millis must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Duration of a single tick
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    /// Convert a wall-clock duration into whole ticks, rounding up
    pub fn ticks_for(&self, duration: Duration) -> u64 {
        let tick = self.tick_duration().as_nanos().max(1);
        let ticks = duration.as_nanos().div_ceil(tick);
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }
}
