//! Reference host configuration

use crate::error::HostError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessera::ConfigError;

/// Largest accepted region shift; a region spans `2^shift` chunks per side
pub const MAX_REGION_SHIFT: u32 = 10;

/// Configuration shared by both reference servers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostConfig {
    /// Length of one tick in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Async worker threads (0 = one per CPU)
    #[serde(default)]
    pub async_workers: usize,

    /// Chunk coordinate bits shifted off to obtain a region coordinate
    #[serde(default = "default_region_shift")]
    pub region_shift: u32,

    /// Whether the host offers a native asynchronous teleport
    #[serde(default = "default_native_teleport")]
    pub native_teleport: bool,
}

fn default_tick_interval_ms() -> u64 {
    50
}

fn default_region_shift() -> u32 {
    3
}

fn default_native_teleport() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            async_workers: 0,
            region_shift: default_region_shift(),
            native_teleport: default_native_teleport(),
        }
    }
}

impl HostConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(source: &str) -> Result<Self, HostError> {
        let config: HostConfig = toml::from_str(source).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HostError> {
        let source = std::fs::read_to_string(path).map_err(ConfigError::from)?;
        Self::from_toml_str(&source)
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<(), HostError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than zero".to_string(),
            )
            .into());
        }
        if self.region_shift > MAX_REGION_SHIFT {
            return Err(ConfigError::Invalid(format!(
                "region_shift must be at most {}, got {}",
                MAX_REGION_SHIFT, self.region_shift
            ))
            .into());
        }
        Ok(())
    }

    /// Duration of one tick
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Async worker count with the CPU default applied
    pub fn worker_count(&self) -> usize {
        if self.async_workers == 0 {
            num_cpus::get()
        } else {
            self.async_workers
        }
    }
}
