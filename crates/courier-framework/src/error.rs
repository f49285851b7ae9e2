//! Error types for message handlers.

use courier_core::{BoxError, CommandHandlingResult};
use thiserror::Error;

/// Errors raised while invoking a handler.
///
/// Every variant is treated the same way by the dispatchers: the message is
/// redelivered after the configured failure delay.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler returned an error.
    #[error("{0}")]
    Failed(#[source] BoxError),

    /// The handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// A declared parameter could not be supplied.
    #[error("parameter '{0}' is not available")]
    MissingParameter(&'static str),

    /// The dispatched message was not of the type the handler expects.
    #[error("handler expects '{expected}', got '{actual}'")]
    TypeMismatch {
        /// Expected message type name.
        expected: &'static str,
        /// Actual message type name.
        actual: &'static str,
    },
}

impl HandlerError {
    /// Wraps any error as a handler failure.
    pub fn failed(err: impl Into<BoxError>) -> Self {
        Self::Failed(err.into())
    }
}

/// Result type of a single handler invocation.
pub type HandlerResult = Result<CommandHandlingResult, HandlerError>;

/// Result type flowing back through an interceptor chain.
pub type ChainResult = HandlerResult;
