//! # Courier Core
//!
//! Message, routing and transport-boundary primitives for the Courier CQRS
//! runtime.
//!
//! ## Layers
//!
//! - **Messages**: type-erased commands and events ([`Message`], [`BoxedMessage`], [`MessageType`])
//! - **Routing**: [`RoutingKey`], [`Endpoint`], [`Route`] and [`RouteMap`]
//! - **Resolution**: [`EndpointResolver`] implementations and the [`EndpointProvider`]
//! - **Transport boundary**: [`MessagingEngine`], [`Acknowledge`], [`Subscription`]
//! - **Telemetry**: injected [`TelemetryReporter`]s
//!
//! ## Message Flow
//!
//! ```text
//! ┌──────────┐ send  ┌────────────────┐ callback ┌────────────┐
//! │ RouteMap │──────▶│ MessagingEngine│─────────▶│ Dispatcher │──▶ handlers
//! └──────────┘       └────────────────┘  + ack   └────────────┘
//!      ▲ endpoints
//! ┌──────────────────┐
//! │ EndpointResolver │
//! └──────────────────┘
//! ```

pub mod error;
pub mod message;
pub mod resolver;
pub mod result;
pub mod routing;
pub mod telemetry;
pub mod transport;

pub use error::{
    BoxError, ConfigurationError, ConfigurationResult, RoutingError, RoutingResult,
    TransportError, TransportResult,
};
pub use message::{BoxedMessage, Message, MessageType, short_type_name};
pub use resolver::{
    ConfiguredEndpointResolver, ConventionEndpointResolver, ConventionOptions,
    DefaultEndpointProvider, EndpointProvider, EndpointResolver, ExplicitEndpointSelector,
    IN_MEMORY_TRANSPORT, InMemoryEndpointResolver,
};
pub use result::CommandHandlingResult;
pub use routing::{
    CommunicationType, Destination, Endpoint, ProcessingOptions, Route, RouteMap, RouteType,
    RoutingKey, SerializationFormat,
};
pub use telemetry::{NoopTelemetry, TelemetryOperation, TelemetryReporter, TracingTelemetry};
pub use transport::{
    Acknowledge, EndpointUsage, Headers, MessageCallback, MessagingEngine, SubscribeRequest,
    Subscription, UnknownTypeCallback,
};

/// A type alias for a boxed, pinned future that is `Send`.
pub use futures::future::BoxFuture;
