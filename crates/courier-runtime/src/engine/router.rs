//! Outbound routing shared by the engine and its contexts.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use courier_core::{
    BoxedMessage, ConfigurationError, MessagingEngine, RouteMap, RouteType, RoutingError,
    RoutingResult, TelemetryReporter,
};
use courier_framework::{CommandSender, EventPublisher};

use super::headers::HeaderHooks;

/// Resolved route maps plus the transport they send through.
///
/// Read-only once built, apart from the header hooks.
pub(crate) struct Router {
    pub(crate) messaging: Arc<dyn MessagingEngine>,
    pub(crate) default_map: RouteMap,
    pub(crate) maps: Vec<RouteMap>,
    pub(crate) headers: Arc<HeaderHooks>,
    pub(crate) telemetry: Arc<dyn TelemetryReporter>,
}

impl Router {
    /// The default map followed by every context map.
    pub(crate) fn route_maps(&self) -> impl Iterator<Item = &RouteMap> {
        std::iter::once(&self.default_map).chain(self.maps.iter())
    }

    pub(crate) fn context_map(&self, context: &str) -> Option<&RouteMap> {
        self.maps.iter().find(|map| map.name() == context)
    }

    /// Sends through the context's map, falling back to the default map for
    /// commands.
    pub(crate) async fn send_message(
        &self,
        message: BoxedMessage,
        route_type: RouteType,
        context: Option<&str>,
        priority: u32,
        remote_context: Option<&str>,
    ) -> RoutingResult<()> {
        let message_type = message.message_type();
        let map = match context {
            Some(name) => self
                .context_map(name)
                .ok_or_else(|| ConfigurationError::UnknownContext(name.to_string()))?,
            None => &self.default_map,
        };

        let kind = match route_type {
            RouteType::Commands => "Cqrs send command",
            RouteType::Events => "Cqrs publish event",
        };
        let mut operation =
            self.telemetry
                .start_operation(kind, message_type.name(), context, remote_context);

        let result = self
            .publish_through(map, message, route_type, context, priority, remote_context)
            .await;

        if let Err(err) = &result {
            self.telemetry.record_failure(&mut operation, err);
        }
        self.telemetry.finish_operation(operation);
        result
    }

    async fn publish_through(
        &self,
        map: &RouteMap,
        message: BoxedMessage,
        route_type: RouteType,
        context: Option<&str>,
        priority: u32,
        remote_context: Option<&str>,
    ) -> RoutingResult<()> {
        let message_type = message.message_type();
        let headers = self.headers.collect();
        let mut published = map
            .publish_message(
                self.messaging.as_ref(),
                message.clone(),
                route_type,
                priority,
                remote_context,
                headers.clone(),
            )
            .await?;
        if !published && route_type == RouteType::Commands && context.is_some() {
            published = self
                .default_map
                .publish_message(
                    self.messaging.as_ref(),
                    message,
                    route_type,
                    priority,
                    remote_context,
                    headers,
                )
                .await?;
        }

        if published {
            return Ok(());
        }
        Err(match context {
            Some(context) => RoutingError::Unsupported {
                context: context.to_string(),
                kind: route_type,
                message_type: message_type.full_name().to_string(),
                priority,
            },
            None => RoutingError::NoDefaultRoute {
                kind: route_type,
                message_type: message_type.full_name().to_string(),
                priority,
            },
        })
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("default_map", &self.default_map)
            .field("maps", &self.maps)
            .finish()
    }
}

// =============================================================================
// Context Publisher
// =============================================================================

/// Outbound seams of one bounded context.
///
/// Handed to interceptors and processes; commands fall back to the default
/// route map when the context has no route for them.
pub(crate) struct ContextPublisher {
    router: Arc<Router>,
    context: String,
}

impl ContextPublisher {
    pub(crate) fn new(router: Arc<Router>, context: impl Into<String>) -> Self {
        Self {
            router,
            context: context.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for ContextPublisher {
    async fn publish(&self, event: BoxedMessage) -> RoutingResult<()> {
        self.router
            .send_message(event, RouteType::Events, Some(&self.context), 0, None)
            .await
    }
}

#[async_trait]
impl CommandSender for ContextPublisher {
    async fn send(
        &self,
        command: BoxedMessage,
        remote_context: &str,
        priority: u32,
    ) -> RoutingResult<()> {
        self.router
            .send_message(
                command,
                RouteType::Commands,
                Some(&self.context),
                priority,
                Some(remote_context),
            )
            .await
    }
}
