//! Interceptors that log every dispatched message.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{BoxedMessage, MessageType};
use tracing::{info, warn};

use super::{InterceptionContext, Interceptor};
use crate::error::ChainResult;
use crate::handler::HandlerRef;

/// Writes one log record per dispatched message.
pub trait MessageLogger: Send + Sync {
    /// Logs `message` as it is handed to `handler`.
    fn log(&self, handler: &HandlerRef, message: &BoxedMessage);
}

/// Logs handler name, message type and the JSON payload at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMessageLogger;

impl MessageLogger for DefaultMessageLogger {
    fn log(&self, handler: &HandlerRef, message: &BoxedMessage) {
        match message.to_json() {
            Ok(payload) => info!(
                handler = handler.name(),
                message_type = %message.message_type(),
                %payload,
                "Handling message"
            ),
            Err(err) => warn!(
                handler = handler.name(),
                message_type = %message.message_type(),
                error = %err,
                "Handling message with unserializable payload"
            ),
        }
    }
}

/// Logs every message with a [`MessageLogger`], then continues.
pub struct DefaultLoggingInterceptor {
    logger: Arc<dyn MessageLogger>,
}

impl DefaultLoggingInterceptor {
    /// Uses [`DefaultMessageLogger`].
    pub fn new() -> Self {
        Self::with_logger(Arc::new(DefaultMessageLogger))
    }

    /// Uses a custom logger.
    pub fn with_logger(logger: Arc<dyn MessageLogger>) -> Self {
        Self { logger }
    }
}

impl Default for DefaultLoggingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DefaultLoggingInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLoggingInterceptor").finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: ?Sized + Send + Sync + 'static> Interceptor<P> for DefaultLoggingInterceptor {
    async fn intercept(&self, context: InterceptionContext<P>) -> ChainResult {
        self.logger.log(context.handler(), context.message());
        context.invoke_next().await
    }
}

/// Per-type logging action: receives the default logger, the handler and
/// the message.
pub type LoggingDelegate =
    Arc<dyn Fn(&dyn MessageLogger, &HandlerRef, &BoxedMessage) + Send + Sync>;

/// Logs with a per-type action, falling back to the default logger for
/// unlisted types.
///
/// A type mapped to `None` is not logged at all.
pub struct CustomLoggingInterceptor {
    default_logger: Arc<dyn MessageLogger>,
    actions: HashMap<MessageType, Option<LoggingDelegate>>,
}

impl CustomLoggingInterceptor {
    /// Uses [`DefaultMessageLogger`] for unlisted types.
    pub fn new(actions: HashMap<MessageType, Option<LoggingDelegate>>) -> Self {
        Self::with_logger(Arc::new(DefaultMessageLogger), actions)
    }

    /// Uses `default_logger` for unlisted types.
    pub fn with_logger(
        default_logger: Arc<dyn MessageLogger>,
        actions: HashMap<MessageType, Option<LoggingDelegate>>,
    ) -> Self {
        Self {
            default_logger,
            actions,
        }
    }
}

impl fmt::Debug for CustomLoggingInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomLoggingInterceptor")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<P: ?Sized + Send + Sync + 'static> Interceptor<P> for CustomLoggingInterceptor {
    async fn intercept(&self, context: InterceptionContext<P>) -> ChainResult {
        match self.actions.get(&context.message().message_type()) {
            Some(Some(action)) => action(
                self.default_logger.as_ref(),
                context.handler(),
                context.message(),
            ),
            Some(None) => {}
            None => self
                .default_logger
                .log(context.handler(), context.message()),
        }
        context.invoke_next().await
    }
}
