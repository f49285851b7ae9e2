//! Handler registration and invocation.
//!
//! Handlers are plain Rust functions or methods taking the handler object,
//! the message and any number of [`FromScope`] parameters:
//!
//! ```rust,ignore
//! impl OrderHandler {
//!     async fn create(self: Arc<Self>, cmd: CreateOrder, clock: Param<Clock>) -> CommandHandlingResult {
//!         CommandHandlingResult::ok()
//!     }
//!
//!     fn cancel(&self, cmd: CancelOrder) -> Result<(), OrderError> {
//!         Ok(())
//!     }
//! }
//!
//! let table = CommandHandlers::new(OrderHandler::default())
//!     .with_parameter(ParameterProvider::value(Clock::system()))
//!     .on(OrderHandler::create)
//!     .on_sync(OrderHandler::cancel);
//! ```
//!
//! Tables are wired into a dispatcher, which looks handlers up by message
//! type and invokes them through the interceptor chain.

mod function;
mod params;
mod table;

use std::any::{Any, type_name};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use courier_core::{BoxError, BoxFuture, CommandHandlingResult, short_type_name};
use futures::FutureExt;

use crate::error::{HandlerError, HandlerResult};

pub use function::{HandlerFn, SyncHandlerFn};
pub use params::{FromScope, Param, ParameterProvider, ParameterScope, ParameterSet};
pub use table::{
    Batch, BatchSettings, BatchedEventHandlers, CommandHandlers, EventBindings, EventHandlers,
    IntoEventBindings,
};

pub(crate) use table::{BatchFinish, BatchFlush, CommandBinding, ErasedCall, ErasedManyCall, EventBindingKind};

// ============================================================================
// Handler Results
// ============================================================================

/// Return types a handler may produce.
///
/// - `()` means the message was handled.
/// - [`CommandHandlingResult`] can ask for redelivery.
/// - `Result<T, E>` reports `Err` as a handler failure.
pub trait IntoHandlingResult {
    /// Converts into the dispatcher's result type.
    fn into_handling_result(self) -> HandlerResult;
}

impl IntoHandlingResult for () {
    fn into_handling_result(self) -> HandlerResult {
        Ok(CommandHandlingResult::ok())
    }
}

impl IntoHandlingResult for CommandHandlingResult {
    fn into_handling_result(self) -> HandlerResult {
        Ok(self)
    }
}

impl<T, E> IntoHandlingResult for Result<T, E>
where
    T: IntoHandlingResult,
    E: Into<BoxError>,
{
    fn into_handling_result(self) -> HandlerResult {
        match self {
            Ok(value) => value.into_handling_result(),
            Err(err) => Err(HandlerError::Failed(err.into())),
        }
    }
}

// ============================================================================
// Handler Reference
// ============================================================================

/// Type-erased reference to the object a handler belongs to.
///
/// Interceptors receive it to identify, or downcast to, the handler object.
#[derive(Clone)]
pub struct HandlerRef {
    object: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl HandlerRef {
    /// Wraps a handler object.
    pub fn new<H: Send + Sync + 'static>(handler: Arc<H>) -> Self {
        Self {
            object: handler,
            type_name: type_name::<H>(),
        }
    }

    /// Fully qualified type name of the handler object.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Short type name of the handler object.
    pub fn name(&self) -> &'static str {
        short_type_name(self.type_name)
    }

    /// Borrows the handler object as `H`.
    pub fn downcast_ref<H: 'static>(&self) -> Option<&H> {
        self.object.downcast_ref()
    }

    /// Returns `true` if both refer to the same handler object.
    pub fn same_object(&self, other: &HandlerRef) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.object), Arc::as_ptr(&other.object))
    }
}

impl fmt::Debug for HandlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandlerRef").field(&self.type_name).finish()
    }
}

// ============================================================================
// Panic Guard
// ============================================================================

/// Boxes a handler future, converting a panic into [`HandlerError::Panicked`].
pub(crate) fn guarded<F>(future: F) -> BoxFuture<'static, HandlerResult>
where
    F: Future<Output = HandlerResult> + Send + 'static,
{
    Box::pin(async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        }
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
