//! Error types for scheduler initialization, configuration, and teleports

use thiserror::Error;

/// Errors raised while wiring a [`Server`](crate::Server) to its host.
///
/// These are fatal: no scheduler can operate without a resolved backend.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The host's feature probe and its accessors disagree, or neither family exists
    #[error("No scheduling backend could be resolved: {0}")]
    Misconfigured(String),

    /// Configuration forces a backend family the host does not provide
    #[error("Backend '{requested}' is not provided by this host")]
    BackendUnavailable {
        /// The family that was requested
        requested: &'static str,
    },

    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur while loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field holds a value outside its allowed range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by a synchronous [`Entity::teleport`](crate::Entity::teleport)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TeleportError {
    /// The entity was removed from its world
    #[error("Entity has been removed")]
    EntityRemoved,

    /// The host refused the teleport
    #[error("Teleport rejected: {0}")]
    Rejected(String),
}

/// Failure state carried by a task's completion future
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskFailure {
    /// The body of a one-shot task panicked
    #[error("Task body panicked: {0}")]
    Panicked(String),
}
