//! Error types for the core crate.
//!
//! Domain refusals never surface here: the engine turns them into
//! [`Reply::Rejected`](balloteer_types::Reply::Rejected) records. What is
//! left is infrastructure failure.

use crate::config::ConfigError;
use crate::gateway::GatewayError;

/// Errors returned by [`Engine`](crate::engine::Engine) operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A write-through failed after the in-memory mutation was applied.
    #[error("persistence failure during {operation}: {source}")]
    Persistence {
        /// What was being written.
        operation: &'static str,
        /// The gateway error.
        source: GatewayError,
    },

    /// Loading the initial state failed.
    #[error("failed to load state: {source}")]
    Load {
        /// The gateway error.
        source: GatewayError,
    },

    /// The identity lookup failed.
    #[error("identity lookup failed: {source}")]
    Identity {
        /// The gateway error.
        source: GatewayError,
    },

    /// Configuration could not be loaded.
    #[error("configuration error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },
}
