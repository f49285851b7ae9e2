//! Interceptor chains wrapping every handler invocation.
//!
//! A chain is an ordered list of [`Interceptor`]s followed by a terminal
//! step that calls the handler. Each interceptor receives an
//! [`InterceptionContext`] and decides whether to continue:
//!
//! ```rust,ignore
//! struct Audit;
//!
//! #[async_trait]
//! impl<P: ?Sized + Send + Sync + 'static> Interceptor<P> for Audit {
//!     async fn intercept(&self, context: InterceptionContext<P>) -> ChainResult {
//!         if context.message().is::<Forbidden>() {
//!             return Ok(CommandHandlingResult::ok()); // short-circuit
//!         }
//!         context.invoke_next().await
//!     }
//! }
//! ```
//!
//! Command chains hand interceptors the [`EventPublisher`]; event chains
//! hand them the [`CommandSender`].

mod logging;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{BoxFuture, BoxedMessage, Message};

use crate::error::ChainResult;
use crate::handler::HandlerRef;
use crate::publisher::{CommandSender, EventPublisher};

pub use logging::{
    CustomLoggingInterceptor, DefaultLoggingInterceptor, DefaultMessageLogger, LoggingDelegate,
    MessageLogger,
};

/// The last step of a chain: invokes the handler with the (possibly
/// replaced) message.
pub type ChainTerminal = Box<dyn FnOnce(BoxedMessage) -> BoxFuture<'static, ChainResult> + Send>;

// ============================================================================
// Interceptor
// ============================================================================

/// One link of an interceptor chain.
///
/// `P` is the publisher handed to interceptors: `dyn EventPublisher` for
/// command chains and `dyn CommandSender` for event chains.
#[async_trait]
pub trait Interceptor<P: ?Sized + Send + Sync + 'static>: Send + Sync + 'static {
    /// Handles one message, usually by awaiting
    /// [`InterceptionContext::invoke_next`].
    async fn intercept(&self, context: InterceptionContext<P>) -> ChainResult;
}

// ============================================================================
// Interception Context
// ============================================================================

/// Per-dispatch state passed down the chain.
pub struct InterceptionContext<P: ?Sized + Send + Sync + 'static> {
    message: BoxedMessage,
    handler: HandlerRef,
    publisher: Arc<P>,
    chain: Arc<InterceptorChain<P>>,
    index: usize,
    terminal: ChainTerminal,
}

/// Context seen by command interceptors.
pub type CommandInterceptionContext = InterceptionContext<dyn EventPublisher>;

/// Context seen by event interceptors.
pub type EventInterceptionContext = InterceptionContext<dyn CommandSender>;

impl<P: ?Sized + Send + Sync + 'static> InterceptionContext<P> {
    /// The message being dispatched.
    pub fn message(&self) -> &BoxedMessage {
        &self.message
    }

    /// Borrows the message as `M`.
    pub fn message_as<M: Message>(&self) -> Option<&M> {
        self.message.downcast_ref()
    }

    /// Replaces the message handed to the rest of the chain.
    pub fn set_message(&mut self, message: BoxedMessage) {
        self.message = message;
    }

    /// The handler object the message is dispatched to.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    /// Publisher of the dispatching context.
    pub fn publisher(&self) -> &Arc<P> {
        &self.publisher
    }

    /// Position of the next step in the chain.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs the rest of the chain and resolves to the handler outcome.
    pub fn invoke_next(mut self) -> BoxFuture<'static, ChainResult> {
        match self.chain.interceptors.get(self.index).cloned() {
            Some(interceptor) => {
                self.index += 1;
                Box::pin(async move { interceptor.intercept(self).await })
            }
            None => (self.terminal)(self.message),
        }
    }
}

impl<P: ?Sized + Send + Sync + 'static> fmt::Debug for InterceptionContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionContext")
            .field("message", &self.message)
            .field("handler", &self.handler)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Interceptor Chain
// ============================================================================

/// Interceptors in registration order.
pub struct InterceptorChain<P: ?Sized + Send + Sync + 'static> {
    interceptors: Vec<Arc<dyn Interceptor<P>>>,
}

/// Chain wrapping command handlers.
pub type CommandInterceptorChain = InterceptorChain<dyn EventPublisher>;

/// Chain wrapping event handlers.
pub type EventInterceptorChain = InterceptorChain<dyn CommandSender>;

impl<P: ?Sized + Send + Sync + 'static> InterceptorChain<P> {
    /// An empty chain; only the terminal step runs.
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Appends an interceptor.
    pub fn with(mut self, interceptor: impl Interceptor<P>) -> Self {
        self.push(Arc::new(interceptor));
        self
    }

    /// Appends a shared interceptor.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor<P>>) {
        self.interceptors.push(interceptor);
    }

    /// Number of interceptors.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns `true` if the chain has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Runs `message` through the chain, ending in `terminal`.
    pub fn run(
        self: &Arc<Self>,
        message: BoxedMessage,
        handler: HandlerRef,
        publisher: Arc<P>,
        terminal: ChainTerminal,
    ) -> BoxFuture<'static, ChainResult> {
        InterceptionContext {
            message,
            handler,
            publisher,
            chain: Arc::clone(self),
            index: 0,
            terminal,
        }
        .invoke_next()
    }
}

impl<P: ?Sized + Send + Sync + 'static> Default for InterceptorChain<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ?Sized + Send + Sync + 'static> fmt::Debug for InterceptorChain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::publisher::DiscardingPublisher;
    use courier_core::CommandHandlingResult;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor<dyn EventPublisher> for Recording {
        async fn intercept(&self, context: CommandInterceptionContext) -> ChainResult {
            self.log.lock().push(format!("{} before", self.name));
            let result = context.invoke_next().await;
            self.log.lock().push(format!("{} after", self.name));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Interceptor<dyn EventPublisher> for ShortCircuit {
        async fn intercept(&self, _context: CommandInterceptionContext) -> ChainResult {
            Ok(CommandHandlingResult::retry_after(42))
        }
    }

    struct Rewrite;

    #[async_trait]
    impl Interceptor<dyn EventPublisher> for Rewrite {
        async fn intercept(&self, mut context: CommandInterceptionContext) -> ChainResult {
            let upper = context.message_as::<String>().map(|s| s.to_uppercase());
            if let Some(upper) = upper {
                context.set_message(BoxedMessage::new(upper));
            }
            context.invoke_next().await
        }
    }

    fn recording_terminal(log: Arc<Mutex<Vec<String>>>) -> ChainTerminal {
        Box::new(move |message: BoxedMessage| -> BoxFuture<'static, ChainResult> {
            Box::pin(async move {
                let text = message
                    .downcast::<String>()
                    .ok_or_else(|| HandlerError::failed("not a string"))?;
                log.lock().push(format!("handler {text}"));
                Ok(CommandHandlingResult::ok())
            })
        })
    }

    fn handler() -> HandlerRef {
        HandlerRef::new(Arc::new(()))
    }

    fn publisher() -> Arc<dyn EventPublisher> {
        Arc::new(DiscardingPublisher)
    }

    #[tokio::test]
    async fn interceptors_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Arc::new(
            CommandInterceptorChain::new()
                .with(Recording {
                    name: "first",
                    log: Arc::clone(&log),
                })
                .with(Recording {
                    name: "second",
                    log: Arc::clone(&log),
                }),
        );

        let result = chain
            .run(
                BoxedMessage::new("x".to_string()),
                handler(),
                publisher(),
                recording_terminal(Arc::clone(&log)),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(
            *log.lock(),
            vec![
                "first before",
                "second before",
                "handler x",
                "second after",
                "first after"
            ]
        );
    }

    #[tokio::test]
    async fn empty_chain_calls_the_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Arc::new(CommandInterceptorChain::new());

        let result = chain
            .run(
                BoxedMessage::new("x".to_string()),
                handler(),
                publisher(),
                recording_terminal(Arc::clone(&log)),
            )
            .await;

        assert_eq!(result.ok(), Some(CommandHandlingResult::ok()));
        assert_eq!(*log.lock(), vec!["handler x"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_the_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Arc::new(
            CommandInterceptorChain::new()
                .with(ShortCircuit)
                .with(Recording {
                    name: "unreached",
                    log: Arc::clone(&log),
                }),
        );

        let result = chain
            .run(
                BoxedMessage::new("x".to_string()),
                handler(),
                publisher(),
                recording_terminal(Arc::clone(&log)),
            )
            .await;

        assert_eq!(result.ok(), Some(CommandHandlingResult::retry_after(42)));
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn interceptors_may_replace_the_message() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = Arc::new(CommandInterceptorChain::new().with(Rewrite));

        chain
            .run(
                BoxedMessage::new("quiet".to_string()),
                handler(),
                publisher(),
                recording_terminal(Arc::clone(&log)),
            )
            .await
            .unwrap();

        assert_eq!(*log.lock(), vec!["handler QUIET"]);
    }
}
