//! Boundary with the messaging engine.
//!
//! The runtime never moves bytes itself. It talks to a [`MessagingEngine`]
//! that sends messages to endpoints, subscribes callbacks to them and
//! declares topology at startup. Every inbound message carries a once-only
//! [`Acknowledge`] telling the engine to finalize or redeliver it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::TransportResult;
use crate::message::{BoxedMessage, MessageType};
use crate::routing::{Endpoint, ProcessingOptions};

/// Message headers travelling alongside the payload.
pub type Headers = HashMap<String, String>;

// ============================================================================
// Acknowledge
// ============================================================================

/// Once-only completion signal for one inbound message.
///
/// Calling it consumes it, so a message can not be acknowledged twice.
pub struct Acknowledge {
    callback: Box<dyn FnOnce(u64, bool) + Send>,
}

impl Acknowledge {
    /// Wraps a `(retry_delay_ms, success)` callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(u64, bool) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// An acknowledge that does nothing.
    pub fn noop() -> Self {
        Self::new(|_, _| {})
    }

    /// Signals completion: `success = false` asks for redelivery after
    /// `retry_delay_ms`.
    pub fn call(self, retry_delay_ms: u64, success: bool) {
        (self.callback)(retry_delay_ms, success)
    }

    /// Finalizes the message.
    pub fn ack(self) {
        self.call(0, true)
    }

    /// Asks for redelivery after `retry_delay_ms`.
    pub fn nack(self, retry_delay_ms: u64) {
        self.call(retry_delay_ms, false)
    }
}

impl fmt::Debug for Acknowledge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Acknowledge")
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Handle to an active subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when dropped.
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to cancel.
    pub fn empty() -> Self {
        Self { cancel: None }
    }

    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ============================================================================
// Messaging Engine
// ============================================================================

/// How endpoints are about to be used, for startup verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointUsage {
    /// Messages will be sent to the endpoints.
    Publish,
    /// Messages will be consumed from the endpoints.
    Subscribe,
}

/// Inbound delivery callback: `(message, acknowledge, headers)`.
pub type MessageCallback =
    Arc<dyn Fn(BoxedMessage, Acknowledge, Headers) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked for deliveries whose type the subscription does not accept.
pub type UnknownTypeCallback = Arc<dyn Fn(MessageType, Acknowledge) + Send + Sync>;

/// Parameters of one subscription.
#[derive(Clone)]
pub struct SubscribeRequest {
    /// Subscribe-side endpoint.
    pub endpoint: Endpoint,
    /// Delivery callback.
    pub callback: MessageCallback,
    /// Callback for unaccepted types.
    pub unknown_type_callback: UnknownTypeCallback,
    /// Processing group whose workers run the callback.
    pub processing_group: String,
    /// Priority lane, lower values are served first.
    pub priority: u32,
    /// Accepted message types.
    pub accepted_types: Vec<MessageType>,
}

impl fmt::Debug for SubscribeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("endpoint", &self.endpoint)
            .field("processing_group", &self.processing_group)
            .field("priority", &self.priority)
            .field("accepted_types", &self.accepted_types)
            .finish()
    }
}

/// The underlying transport.
#[async_trait]
pub trait MessagingEngine: Send + Sync {
    /// Sends `message` to the publish side of `endpoint`.
    async fn send(
        &self,
        message: BoxedMessage,
        endpoint: &Endpoint,
        headers: Headers,
    ) -> TransportResult<()>;

    /// Subscribes a callback to the subscribe side of an endpoint.
    ///
    /// Must be called from within a tokio runtime.
    fn subscribe(&self, request: SubscribeRequest) -> TransportResult<Subscription>;

    /// Validates (and optionally declares) endpoints.
    ///
    /// Returns one entry per endpoint: `None` when valid, or an error text.
    fn verify_endpoints(
        &self,
        usage: EndpointUsage,
        endpoints: &[Endpoint],
        create_missing: bool,
    ) -> HashMap<Endpoint, Option<String>>;

    /// Declares a processing group with its worker settings.
    fn add_processing_group(&self, name: &str, options: ProcessingOptions);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn acknowledge_reports_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorder = calls.clone();
        let ack = Acknowledge::new(move |delay, success| recorder.lock().push((delay, success)));

        ack.nack(250);
        assert_eq!(*calls.lock(), vec![(250, false)]);
    }

    #[test]
    fn dropping_subscription_cancels() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let subscription = Subscription::new(move || flag.store(true, Ordering::SeqCst));

        assert!(!cancelled.load(Ordering::SeqCst));
        drop(subscription);
        assert!(cancelled.load(Ordering::SeqCst));
    }
}
