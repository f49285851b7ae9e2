//! # Courier Framework
//!
//! Handler registration and dispatch for the Courier CQRS runtime.
//!
//! This layer provides:
//! - Handler tables binding message types to plain async or sync functions
//! - Extra handler parameters with per-invocation scoping
//! - Interceptor chains wrapping every handler invocation
//! - The command dispatcher (one handler per type) and the event dispatcher
//!   (any number of handlers per type, optional batching)
//!
//! ```rust,ignore
//! use courier_framework::prelude::*;
//!
//! let mut commands = CommandDispatcher::standalone("orders", publisher);
//! commands.wire(CommandHandlers::new(OrderHandler::default()).on(OrderHandler::create))?;
//!
//! let mut events = EventDispatcher::standalone("projections", sender);
//! events.wire(
//!     "orders",
//!     EventHandlers::new(OrderProjection::default())
//!         .batched(BatchSettings::size(100), OrderProjection::begin, OrderProjection::commit)
//!         .on_batch(OrderProjection::apply),
//! )?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod publisher;

pub use dispatcher::{CommandDispatcher, DEFAULT_FAILED_RETRY_DELAY_MS, EventDispatcher};
pub use error::{ChainResult, HandlerError, HandlerResult};
pub use handler::{
    Batch, BatchSettings, BatchedEventHandlers, CommandHandlers, EventBindings, EventHandlers,
    FromScope, HandlerFn, HandlerRef, IntoEventBindings, IntoHandlingResult, Param,
    ParameterProvider, ParameterScope, ParameterSet, SyncHandlerFn,
};
pub use middleware::{
    ChainTerminal, CommandInterceptionContext, CommandInterceptorChain, CustomLoggingInterceptor,
    DefaultLoggingInterceptor, DefaultMessageLogger, EventInterceptionContext,
    EventInterceptorChain, InterceptionContext, Interceptor, InterceptorChain, LoggingDelegate,
    MessageLogger,
};
pub use publisher::{
    CommandSender, CommandSenderExt, DiscardingPublisher, EventPublisher, EventPublisherExt,
};

/// Commonly used types for writing handlers and interceptors.
pub mod prelude {
    pub use crate::{
        Batch, BatchSettings, CommandDispatcher, CommandHandlers, CommandSender,
        CommandSenderExt, EventDispatcher, EventHandlers, EventPublisher, EventPublisherExt,
        HandlerError, InterceptionContext, Interceptor, Param, ParameterProvider,
    };
    pub use courier_core::{BoxedMessage, CommandHandlingResult, Message, MessageType};
}
