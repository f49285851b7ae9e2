use std::fmt;

use tracing::{debug, info};

use super::{CommunicationType, Endpoint, Route, RouteType};
use crate::error::{ConfigurationResult, TransportResult};
use crate::message::{BoxedMessage, MessageType};
use crate::resolver::{EndpointProvider, EndpointResolver};
use crate::transport::{Headers, MessagingEngine};

/// Name of the route map that is not bound to any context.
pub const DEFAULT_ROUTE_MAP: &str = "default";

/// Ordered, named collection of routes.
///
/// There is one map per bounded context plus one default map, used as a
/// fallback when a context has no route for a command it sends.
pub struct RouteMap {
    name: String,
    local_context: Option<String>,
    routes: Vec<Route>,
}

impl RouteMap {
    /// Creates the route map of a bounded context.
    pub fn new(context: impl Into<String>) -> Self {
        let name = context.into();
        Self {
            local_context: Some(name.clone()),
            name,
            routes: Vec::new(),
        }
    }

    /// Creates the default route map.
    pub fn default_map() -> Self {
        Self {
            name: DEFAULT_ROUTE_MAP.to_string(),
            local_context: None,
            routes: Vec::new(),
        }
    }

    /// Map name: the context name, or `"default"`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the route called `name`, creating it on first use.
    pub fn route(&mut self, name: &str) -> &mut Route {
        let index = match self.routes.iter().position(|r| r.name() == name) {
            Some(index) => index,
            None => {
                self.routes
                    .push(Route::new(name, self.local_context.clone()));
                self.routes.len() - 1
            }
        };
        &mut self.routes[index]
    }

    /// Returns the route called `name` without creating it.
    pub fn get(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name() == name)
    }

    /// Iterates routes in creation order.
    pub fn iter(&self) -> std::slice::Iter<'_, Route> {
        self.routes.iter()
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if the map has no routes.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolves every routing key of every route.
    pub fn resolve_routes(
        &mut self,
        provider: &dyn EndpointProvider,
        default_resolver: &dyn EndpointResolver,
    ) -> ConfigurationResult<()> {
        for route in &mut self.routes {
            route.resolve(provider, default_resolver)?;
        }
        debug!(route_map = %self.name, routes = self.routes.len(), "Routes resolved");
        Ok(())
    }

    /// Finds the publish-side endpoint for a message.
    pub fn find_publish_endpoint(
        &self,
        message_type: MessageType,
        route_type: RouteType,
        priority: u32,
        remote_context: Option<&str>,
    ) -> Option<(&Route, &Endpoint)> {
        self.routes.iter().find_map(|route| {
            route
                .message_routes()
                .iter()
                .find(|(key, _)| {
                    key.message_type == message_type
                        && key.route_type == route_type
                        && key.communication_type == CommunicationType::Publish
                        && key.priority == priority
                        && key.remote_context.as_deref() == remote_context
                })
                .map(|(_, endpoint)| (route, endpoint))
        })
    }

    /// Sends `message` through the matching publish route.
    ///
    /// Returns `Ok(false)` when this map has no such route.
    pub async fn publish_message(
        &self,
        engine: &dyn MessagingEngine,
        message: BoxedMessage,
        route_type: RouteType,
        priority: u32,
        remote_context: Option<&str>,
        headers: Headers,
    ) -> TransportResult<bool> {
        let Some((route, endpoint)) =
            self.find_publish_endpoint(message.message_type(), route_type, priority, remote_context)
        else {
            return Ok(false);
        };

        info!(
            route_map = %self.name,
            route = %route.name(),
            message_type = %message.message_type(),
            endpoint = %endpoint,
            "Publishing {}",
            if route_type == RouteType::Commands { "command" } else { "event" }
        );
        engine.send(message, endpoint, headers).await?;
        Ok(true)
    }
}

impl<'a> IntoIterator for &'a RouteMap {
    type Item = &'a Route;
    type IntoIter = std::slice::Iter<'a, Route>;

    fn into_iter(self) -> Self::IntoIter {
        self.routes.iter()
    }
}

impl fmt::Debug for RouteMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteMap")
            .field("name", &self.name)
            .field("routes", &self.routes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;
    use crate::resolver::{DefaultEndpointProvider, InMemoryEndpointResolver};
    use crate::routing::Destination;

    #[test]
    fn route_lookup_is_get_or_create() {
        let mut map = RouteMap::new("bc");
        map.route("commands");
        map.route("events");
        map.route("commands");

        let names: Vec<_> = map.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, ["commands", "events"]);
        assert!(map.get("missing").is_none());
        assert_eq!(map.route("commands").local_context(), Some("bc"));
    }

    #[test]
    fn mixing_route_kinds_is_rejected() {
        let mut map = RouteMap::new("bc");
        let route = map.route("mixed");
        route
            .add_subscribed_command(MessageType::of::<String>(), 0, None)
            .unwrap();

        let err = route
            .add_published_event(MessageType::of::<i32>(), 0, None)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MixedRouteKinds { .. }));
    }

    #[test]
    fn conflicting_lane_is_rejected() {
        let mut map = RouteMap::new("bc");
        let route = map.route("out");
        route
            .add_published_command(MessageType::of::<String>(), 0, "a", None)
            .unwrap();
        route
            .add_published_command(MessageType::of::<String>(), 0, "a", None)
            .unwrap();

        let err = route
            .add_published_command(MessageType::of::<String>(), 0, "b", None)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConflictingRoutingKey { .. }));
    }

    #[test]
    fn publish_lookup_matches_priority_and_remote_context() {
        let mut map = RouteMap::new("bc");
        map.route("to-a")
            .add_published_command(MessageType::of::<String>(), 0, "a", None)
            .unwrap();
        map.route("to-a")
            .add_published_command(MessageType::of::<String>(), 1, "a", None)
            .unwrap();
        map.route("events")
            .add_published_event(MessageType::of::<i32>(), 0, None)
            .unwrap();
        map.resolve_routes(&DefaultEndpointProvider::new(), &InMemoryEndpointResolver)
            .unwrap();

        let (_, endpoint) = map
            .find_publish_endpoint(MessageType::of::<String>(), RouteType::Commands, 1, Some("a"))
            .unwrap();
        assert_eq!(endpoint.destination, Destination::new("to-a.1"));

        assert!(
            map.find_publish_endpoint(MessageType::of::<String>(), RouteType::Commands, 0, Some("b"))
                .is_none()
        );
        assert!(
            map.find_publish_endpoint(MessageType::of::<i32>(), RouteType::Events, 0, None)
                .is_some()
        );
    }
}
