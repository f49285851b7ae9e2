//! Endpoint resolution.
//!
//! An [`EndpointResolver`] turns a `(route name, routing key)` pair into an
//! [`Endpoint`]. Explicitly named endpoints held by an [`EndpointProvider`]
//! always win over conventions.
//!
//! | Resolver | Behaviour |
//! |----------|-----------|
//! | [`InMemoryEndpointResolver`] | `route` or `route.{priority}` on the `InMemory` transport |
//! | [`ConventionEndpointResolver`] | broker exchange/queue naming, cached |
//! | [`ConfiguredEndpointResolver`] | provider only, fails when nothing is registered |
//! | [`ExplicitEndpointSelector`] | named endpoints picked by key predicate |

mod convention;
mod explicit;
mod in_memory;

pub use convention::{ConventionEndpointResolver, ConventionOptions};
pub use explicit::ExplicitEndpointSelector;
pub use in_memory::{IN_MEMORY_TRANSPORT, InMemoryEndpointResolver};

use std::collections::HashMap;

use crate::error::{ConfigurationError, ConfigurationResult};
use crate::routing::{Endpoint, RoutingKey};

/// Maps a routing key on a named route to a transport endpoint.
pub trait EndpointResolver: Send + Sync {
    /// Resolves the endpoint for `key` on `route`.
    fn resolve(
        &self,
        route: &str,
        key: &RoutingKey,
        provider: &dyn EndpointProvider,
    ) -> ConfigurationResult<Endpoint>;
}

/// Source of explicitly registered, named endpoints.
pub trait EndpointProvider: Send + Sync {
    /// Returns `true` if an endpoint is registered under `name`.
    fn contains(&self, name: &str) -> bool;

    /// Returns the endpoint registered under `name`.
    fn get(&self, name: &str) -> Option<Endpoint>;
}

/// Map-backed [`EndpointProvider`].
#[derive(Debug, Clone, Default)]
pub struct DefaultEndpointProvider {
    endpoints: HashMap<String, Endpoint>,
}

impl DefaultEndpointProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint under `name`, replacing any previous one.
    pub fn add(&mut self, name: impl Into<String>, endpoint: Endpoint) {
        self.endpoints.insert(name.into(), endpoint);
    }

    /// Builder-style variant of [`DefaultEndpointProvider::add`].
    pub fn with(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.add(name, endpoint);
        self
    }
}

impl FromIterator<(String, Endpoint)> for DefaultEndpointProvider {
    fn from_iter<I: IntoIterator<Item = (String, Endpoint)>>(iter: I) -> Self {
        Self {
            endpoints: iter.into_iter().collect(),
        }
    }
}

impl EndpointProvider for DefaultEndpointProvider {
    fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.get(name).cloned()
    }
}

/// Resolves only through the provider, using the route name as the
/// endpoint name. There is no convention fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfiguredEndpointResolver;

impl EndpointResolver for ConfiguredEndpointResolver {
    fn resolve(
        &self,
        route: &str,
        key: &RoutingKey,
        provider: &dyn EndpointProvider,
    ) -> ConfigurationResult<Endpoint> {
        provider
            .get(route)
            .ok_or_else(|| ConfigurationError::UnresolvedEndpoint {
                route: route.to_string(),
                message_type: key.message_type.name().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use crate::routing::{CommunicationType, Destination, RouteType, SerializationFormat};

    #[test]
    fn configured_resolver_requires_a_named_endpoint() {
        let key = RoutingKey::new(
            MessageType::of::<String>(),
            RouteType::Commands,
            CommunicationType::Subscribe,
        );
        let endpoint = Endpoint::new(
            "rmq",
            Destination::new("orders"),
            true,
            SerializationFormat::Json,
        );
        let provider = DefaultEndpointProvider::new().with("orders", endpoint.clone());

        assert_eq!(
            ConfiguredEndpointResolver
                .resolve("orders", &key, &provider)
                .unwrap(),
            endpoint
        );
        assert!(matches!(
            ConfiguredEndpointResolver.resolve("payments", &key, &provider),
            Err(ConfigurationError::UnresolvedEndpoint { .. })
        ));
    }
}
