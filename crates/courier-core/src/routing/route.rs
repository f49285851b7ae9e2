use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{CommunicationType, Endpoint, RouteType, RoutingKey};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::message::MessageType;
use crate::resolver::{EndpointProvider, EndpointResolver};

/// Worker settings for the processing group consuming a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingOptions {
    /// Number of concurrent workers.
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
    /// Maximum number of queued deliveries before senders wait.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ProcessingOptions {
    /// Options with `thread_count` workers and room for `queue_capacity`
    /// queued deliveries.
    pub const fn new(thread_count: usize, queue_capacity: usize) -> Self {
        Self {
            thread_count,
            queue_capacity,
        }
    }
}

fn default_thread_count() -> usize {
    1
}

fn default_queue_capacity() -> usize {
    1024
}

/// A named group of routing keys sharing one processing group.
///
/// The route kind is fixed by the first key added. Endpoints are filled in
/// by [`Route::resolve`] at startup; the route is read-only afterwards.
pub struct Route {
    name: String,
    local_context: Option<String>,
    route_type: Option<RouteType>,
    processing_group_name: String,
    options: ProcessingOptions,
    keys: Vec<(RoutingKey, Option<Arc<dyn EndpointResolver>>)>,
    message_routes: HashMap<RoutingKey, Endpoint>,
}

impl Route {
    pub(crate) fn new(name: impl Into<String>, local_context: Option<String>) -> Self {
        let name = name.into();
        let processing_group_name = format!(
            "cqrs.{}.{}",
            local_context.as_deref().unwrap_or("default"),
            name
        );
        Self {
            name,
            local_context,
            route_type: None,
            processing_group_name,
            options: ProcessingOptions::default(),
            keys: Vec::new(),
            message_routes: HashMap::new(),
        }
    }

    /// Route name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Context owning this route, `None` in the default route map.
    pub fn local_context(&self) -> Option<&str> {
        self.local_context.as_deref()
    }

    /// Kind of messages carried, once a key has been added.
    pub fn route_type(&self) -> Option<RouteType> {
        self.route_type
    }

    /// Name of the processing group consuming this route.
    pub fn processing_group_name(&self) -> &str {
        &self.processing_group_name
    }

    /// Processing options for the route's group.
    pub fn options(&self) -> &ProcessingOptions {
        &self.options
    }

    /// Replaces the processing options.
    pub fn set_options(&mut self, options: ProcessingOptions) {
        self.options = options;
    }

    /// Registered routing keys, in registration order.
    pub fn routing_keys(&self) -> impl Iterator<Item = &RoutingKey> {
        self.keys.iter().map(|(key, _)| key)
    }

    /// Resolved endpoints. Empty until [`Route::resolve`] runs.
    pub fn message_routes(&self) -> &HashMap<RoutingKey, Endpoint> {
        &self.message_routes
    }

    /// Endpoint resolved for `key`, if any.
    pub fn endpoint(&self, key: &RoutingKey) -> Option<&Endpoint> {
        self.message_routes.get(key)
    }

    /// Adds a command sent from this context to `remote_context`.
    pub fn add_published_command(
        &mut self,
        message_type: MessageType,
        priority: u32,
        remote_context: &str,
        resolver: Option<Arc<dyn EndpointResolver>>,
    ) -> ConfigurationResult<()> {
        let key = self
            .key(message_type, RouteType::Commands, CommunicationType::Publish)
            .with_priority(priority)
            .with_remote_context(remote_context);
        self.add_key(key, resolver)
    }

    /// Adds a command this context listens for.
    pub fn add_subscribed_command(
        &mut self,
        message_type: MessageType,
        priority: u32,
        resolver: Option<Arc<dyn EndpointResolver>>,
    ) -> ConfigurationResult<()> {
        let key = self
            .key(message_type, RouteType::Commands, CommunicationType::Subscribe)
            .with_priority(priority);
        self.add_key(key, resolver)
    }

    /// Adds an event published by this context.
    pub fn add_published_event(
        &mut self,
        message_type: MessageType,
        priority: u32,
        resolver: Option<Arc<dyn EndpointResolver>>,
    ) -> ConfigurationResult<()> {
        let key = self
            .key(message_type, RouteType::Events, CommunicationType::Publish)
            .with_priority(priority);
        self.add_key(key, resolver)
    }

    /// Adds an event this context listens for from `remote_context`.
    pub fn add_subscribed_event(
        &mut self,
        message_type: MessageType,
        priority: u32,
        remote_context: &str,
        exclusive: bool,
        resolver: Option<Arc<dyn EndpointResolver>>,
    ) -> ConfigurationResult<()> {
        let key = self
            .key(message_type, RouteType::Events, CommunicationType::Subscribe)
            .with_priority(priority)
            .with_remote_context(remote_context)
            .exclusive(exclusive);
        self.add_key(key, resolver)
    }

    /// Adds a fully specified key, optionally with its own resolver.
    ///
    /// Re-adding an identical key replaces its resolver.
    pub fn add_key(
        &mut self,
        key: RoutingKey,
        resolver: Option<Arc<dyn EndpointResolver>>,
    ) -> ConfigurationResult<()> {
        match self.route_type {
            Some(existing) if existing != key.route_type => {
                return Err(ConfigurationError::MixedRouteKinds {
                    route: self.name.clone(),
                    existing,
                    requested: key.route_type,
                });
            }
            _ => self.route_type = Some(key.route_type),
        }

        if let Some(slot) = self.keys.iter_mut().find(|(k, _)| k.same_lane(&key)) {
            if slot.0 != key {
                return Err(ConfigurationError::ConflictingRoutingKey {
                    route: self.name.clone(),
                    message_type: key.message_type.name().to_string(),
                    priority: key.priority,
                });
            }
            slot.1 = resolver;
            return Ok(());
        }

        self.keys.push((key, resolver));
        Ok(())
    }

    /// Resolves every key to an endpoint.
    ///
    /// A key's own resolver takes precedence over `default_resolver`.
    pub fn resolve(
        &mut self,
        provider: &dyn EndpointProvider,
        default_resolver: &dyn EndpointResolver,
    ) -> ConfigurationResult<()> {
        for (key, resolver) in &self.keys {
            let resolver = resolver.as_deref().unwrap_or(default_resolver);
            let endpoint = resolver.resolve(&self.name, key, provider)?;
            trace!(route = %self.name, key = %key, endpoint = %endpoint, "Resolved routing key");
            self.message_routes.insert(key.clone(), endpoint);
        }
        Ok(())
    }

    fn key(
        &self,
        message_type: MessageType,
        route_type: RouteType,
        communication_type: CommunicationType,
    ) -> RoutingKey {
        let key = RoutingKey::new(message_type, route_type, communication_type);
        match &self.local_context {
            Some(context) => key.with_local_context(context.clone()),
            None => key,
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("route_type", &self.route_type)
            .field("processing_group", &self.processing_group_name)
            .field("keys", &self.keys.len())
            .field("resolved", &self.message_routes.len())
            .finish()
    }
}
