//! Unified error types for the Courier core.
//!
//! Handler-level failures live in `courier-framework`; everything here is
//! raised either while wiring and resolving routes, or by the transport.

use thiserror::Error;

use crate::routing::RouteType;

/// Boxed error type accepted from handler bodies and transports.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// =============================================================================
// Configuration Errors
// =============================================================================

/// Fatal errors raised synchronously while wiring handlers or starting up.
///
/// These are never retried; they are expected to halt startup.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// A second handler was wired for a command type that already has one.
    #[error("context '{context}' already has a handler for command '{message_type}'")]
    DuplicateCommandHandler {
        /// Bounded context owning the dispatcher.
        context: String,
        /// Command type name.
        message_type: String,
    },

    /// No endpoint could be produced for a routing key.
    #[error("no endpoint registered for route '{route}' ({message_type}) and no convention applies")]
    UnresolvedEndpoint {
        /// Route name.
        route: String,
        /// Message type name of the routing key.
        message_type: String,
    },

    /// A route already carries messages of the other kind.
    #[error("route '{route}' carries {existing} and can not accept {requested}")]
    MixedRouteKinds {
        /// Route name.
        route: String,
        /// Kind fixed by the first registered key.
        existing: RouteType,
        /// Kind of the rejected key.
        requested: RouteType,
    },

    /// The same message type, direction and priority was registered twice on
    /// one route with different contexts.
    #[error("route '{route}' already maps {message_type} with priority {priority}")]
    ConflictingRoutingKey {
        /// Route name.
        route: String,
        /// Message type name.
        message_type: String,
        /// Priority of the conflicting key.
        priority: u32,
    },

    /// A context listens for a message type nothing handles.
    #[error("context '{context}' listens for {kind} '{message_type}' but has no handler for it")]
    UnhandledListenedType {
        /// Bounded context name.
        context: String,
        /// Message kind.
        kind: RouteType,
        /// Message type name.
        message_type: String,
    },

    /// A bounded context name was not registered.
    #[error("bounded context '{0}' not found")]
    UnknownContext(String),

    /// A bounded context name was registered twice.
    #[error("bounded context '{0}' is registered more than once")]
    DuplicateContext(String),

    /// Endpoint verification at startup reported errors.
    #[error("some endpoints are not valid:\n{0}")]
    InvalidEndpoints(String),

    /// Any other invalid registration.
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),
}

impl ConfigurationError {
    /// Creates an invalid registration error with the given message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRegistration(message.into())
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors reported by a messaging engine.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No transport is registered under this id.
    #[error("transport '{0}' is not available")]
    UnknownTransport(String),

    /// Sending a message failed.
    #[error("failed to send to '{destination}': {reason}")]
    SendFailed {
        /// Destination the message was sent to.
        destination: String,
        /// Reason for failure.
        reason: String,
    },

    /// Subscribing to a destination failed.
    #[error("failed to subscribe to '{destination}': {reason}")]
    SubscribeFailed {
        /// Destination of the subscription.
        destination: String,
        /// Reason for failure.
        reason: String,
    },

    /// The engine was shut down.
    #[error("messaging engine is closed")]
    Closed,
}

// =============================================================================
// Routing Errors
// =============================================================================

/// Errors raised when an outbound message can not be routed.
#[derive(Debug, Clone, Error)]
pub enum RoutingError {
    /// The bounded context has no route for the message.
    #[error("bounded context '{context}' does not support {kind} '{message_type}' with priority {priority}")]
    Unsupported {
        /// Bounded context name.
        context: String,
        /// Message kind.
        kind: RouteType,
        /// Message type name.
        message_type: String,
        /// Requested priority.
        priority: u32,
    },

    /// The default route map has no route for the message.
    #[error("default route map does not contain a route for {kind} '{message_type}' with priority {priority}")]
    NoDefaultRoute {
        /// Message kind.
        kind: RouteType,
        /// Message type name.
        message_type: String,
        /// Requested priority.
        priority: u32,
    },

    /// Configuration problem discovered while routing.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The transport refused the message.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for configuration operations.
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;
