//! Host startup errors

use thiserror::Error;

/// Errors raised while starting a reference host
#[derive(Debug, Error)]
pub enum HostError {
    /// The host configuration is unreadable or out of range
    #[error("Host configuration error: {0}")]
    Config(#[from] tessera::ConfigError),

    /// An executor thread could not be spawned
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        /// Name of the thread
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },
}
