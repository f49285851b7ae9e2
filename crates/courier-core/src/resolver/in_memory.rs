use super::{EndpointProvider, EndpointResolver};
use crate::error::ConfigurationResult;
use crate::routing::{Destination, Endpoint, RoutingKey, SerializationFormat};

/// Transport id used by in-memory endpoints.
pub const IN_MEMORY_TRANSPORT: &str = "InMemory";

/// Resolves every key to an in-memory destination named after the route.
///
/// Priority lanes get their own destination, `route.{priority}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryEndpointResolver;

impl EndpointResolver for InMemoryEndpointResolver {
    fn resolve(
        &self,
        route: &str,
        key: &RoutingKey,
        provider: &dyn EndpointProvider,
    ) -> ConfigurationResult<Endpoint> {
        if let Some(endpoint) = provider.get(route) {
            return Ok(endpoint);
        }

        let destination = if key.priority == 0 {
            route.to_string()
        } else {
            format!("{route}.{}", key.priority)
        };
        Ok(Endpoint::new(
            IN_MEMORY_TRANSPORT,
            Destination::new(destination),
            true,
            SerializationFormat::Json,
        ))
    }
}
