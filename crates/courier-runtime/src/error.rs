//! Runtime error types.

use courier_core::{BoxError, ConfigurationError, RoutingError, TransportError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the engine orchestrator.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Wiring, route resolution or endpoint verification failed.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// An outbound message could not be routed.
    #[error(transparent)]
    Routing(#[from] RoutingError),

    /// The messaging engine refused an operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Loading or validating the configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A process returned an error from `start`.
    #[error("process of context '{context}' failed to start: {source}")]
    ProcessStart {
        /// Bounded context owning the process.
        context: String,
        /// Error returned by the process.
        #[source]
        source: BoxError,
    },

    /// The engine was already shut down.
    #[error("engine is shut down")]
    ShutDown,
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
