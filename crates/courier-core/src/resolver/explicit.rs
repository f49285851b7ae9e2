use std::fmt;
use std::sync::Arc;

use super::{ConfiguredEndpointResolver, EndpointProvider, EndpointResolver};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::routing::{Endpoint, RoutingKey};

type KeyPredicate = Arc<dyn Fn(&RoutingKey) -> bool + Send + Sync>;

/// Picks a named endpoint from the provider by routing-key predicate.
///
/// Rules are tried in order. Keys matching no rule go to the fallback
/// resolver, or to [`ConfiguredEndpointResolver`] when none is set.
///
/// ```rust,ignore
/// let selector = ExplicitEndpointSelector::new()
///     .endpoint_for("high", |key| key.priority == 0)
///     .endpoint_for("low", |key| key.priority == 1);
/// ```
#[derive(Clone, Default)]
pub struct ExplicitEndpointSelector {
    rules: Vec<(String, KeyPredicate)>,
    fallback: Option<Arc<dyn EndpointResolver>>,
}

impl ExplicitEndpointSelector {
    /// Creates a selector with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses the endpoint named `endpoint` for keys matching `predicate`.
    pub fn endpoint_for<F>(mut self, endpoint: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&RoutingKey) -> bool + Send + Sync + 'static,
    {
        self.rules.push((endpoint.into(), Arc::new(predicate)));
        self
    }

    /// Sets the resolver used for keys matching no rule.
    pub fn fallback(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.fallback = Some(resolver);
        self
    }
}

impl EndpointResolver for ExplicitEndpointSelector {
    fn resolve(
        &self,
        route: &str,
        key: &RoutingKey,
        provider: &dyn EndpointProvider,
    ) -> ConfigurationResult<Endpoint> {
        if let Some((name, _)) = self.rules.iter().find(|(_, predicate)| predicate(key)) {
            return provider
                .get(name)
                .ok_or_else(|| ConfigurationError::UnresolvedEndpoint {
                    route: format!("{route} -> {name}"),
                    message_type: key.message_type.name().to_string(),
                });
        }

        match &self.fallback {
            Some(resolver) => resolver.resolve(route, key, provider),
            None => ConfiguredEndpointResolver.resolve(route, key, provider),
        }
    }
}

impl fmt::Debug for ExplicitEndpointSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplicitEndpointSelector")
            .field(
                "endpoints",
                &self.rules.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}
