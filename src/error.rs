//! Crate-wide error hierarchy.
//!
//! Each subsystem gets its own `thiserror`-derived enum; [`ServiceError`] is
//! the union the binary entry point matches on to choose an exit code.

use thiserror::Error;

/// Errors raised while loading or validating configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required configuration key: {0}")]
    MissingKey(String),

    #[error("track_dimension {0} not supported (must be 1..=3)")]
    UnsupportedDimension(usize),

    #[error("unsupported algorithm type: {0}")]
    UnsupportedAlgorithm(String),

    #[error("unsupported protocol type: {0} (only 'amq' is supported)")]
    UnsupportedProtocol(String),

    #[error("invalid filter parameter: {0}")]
    InvalidParameter(String),
}

/// Errors raised while stepping a single scalar filter.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FilterError {
    /// A measurement, velocity, acceleration, or timestamp was non-finite.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The WLS normal-equations solve failed (singular/ill-conditioned), or a
    /// downstream division produced a non-finite result.
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
}

/// Errors raised by a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to publish to exchange '{exchange}': {source}")]
    Publish {
        exchange: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to subscribe to '{binding}': {source}")]
    Subscribe {
        binding: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Errors raised by a [`crate::persistence::StateStore`] implementation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store operation failed: {0}")]
    Backend(String),

    #[error("stored state could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    /// `get` returned absent for the tag id; the caller must skip the step.
    #[error("no persisted state for key '{0}'")]
    Missing(String),
}

/// Top-level error for the service binary.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("fatal runtime error: {0}")]
    Runtime(String),
}
