//! Outbound seams handed to handlers, interceptors and processes.
//!
//! Command handlers publish events and event handlers send commands. The
//! engine implements both traits; dispatchers only see the trait objects.

use async_trait::async_trait;
use courier_core::{BoxFuture, BoxedMessage, Message, RoutingResult};
use tracing::debug;

/// Publishes events of a bounded context.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Routes `event` to its publish endpoint.
    async fn publish(&self, event: BoxedMessage) -> RoutingResult<()>;
}

/// Sends commands to a remote bounded context.
#[async_trait]
pub trait CommandSender: Send + Sync {
    /// Routes `command` to `remote_context` at `priority`.
    async fn send(
        &self,
        command: BoxedMessage,
        remote_context: &str,
        priority: u32,
    ) -> RoutingResult<()>;
}

/// Typed helpers over [`EventPublisher`].
pub trait EventPublisherExt: EventPublisher {
    /// Boxes and publishes `event`.
    fn publish_event<E: Message>(&self, event: E) -> BoxFuture<'_, RoutingResult<()>> {
        self.publish(BoxedMessage::new(event))
    }
}

impl<T: EventPublisher + ?Sized> EventPublisherExt for T {}

/// Typed helpers over [`CommandSender`].
pub trait CommandSenderExt: CommandSender {
    /// Boxes and sends `command` with the default priority.
    fn send_command<'a, C: Message>(
        &'a self,
        command: C,
        remote_context: &'a str,
    ) -> BoxFuture<'a, RoutingResult<()>> {
        self.send(BoxedMessage::new(command), remote_context, 0)
    }
}

impl<T: CommandSender + ?Sized> CommandSenderExt for T {}

/// Discards everything it is given.
///
/// Stands in for the engine when a dispatcher runs on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardingPublisher;

#[async_trait]
impl EventPublisher for DiscardingPublisher {
    async fn publish(&self, event: BoxedMessage) -> RoutingResult<()> {
        debug!(message_type = %event.message_type(), "Discarding published event");
        Ok(())
    }
}

#[async_trait]
impl CommandSender for DiscardingPublisher {
    async fn send(
        &self,
        command: BoxedMessage,
        remote_context: &str,
        _priority: u32,
    ) -> RoutingResult<()> {
        debug!(
            message_type = %command.message_type(),
            remote_context,
            "Discarding sent command"
        );
        Ok(())
    }
}
