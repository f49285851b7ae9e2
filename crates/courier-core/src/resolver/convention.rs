use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{EndpointProvider, EndpointResolver};
use crate::error::{ConfigurationError, ConfigurationResult};
use crate::routing::{
    CommunicationType, Destination, Endpoint, RouteType, RoutingKey, SerializationFormat,
};

/// Naming options of the [`ConventionEndpointResolver`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConventionOptions {
    /// Transport id placed on every produced endpoint.
    pub transport: String,
    /// Serialization format placed on every produced endpoint.
    #[serde(default)]
    pub serialization_format: SerializationFormat,
    /// Environment prepended to exchange and queue names (`{env}.`).
    #[serde(default)]
    pub environment: Option<String>,
    /// Suffix of exclusive queues, without the leading dot.
    #[serde(default = "default_exclusive_postfix")]
    pub exclusive_postfix: String,
    /// Keyword used for command routes instead of `commands`.
    #[serde(default)]
    pub commands_keyword: Option<String>,
    /// Keyword used for event routes instead of `events`.
    #[serde(default)]
    pub events_keyword: Option<String>,
}

fn default_exclusive_postfix() -> String {
    "projections".to_string()
}

impl ConventionOptions {
    /// Options with defaults for everything but the transport.
    pub fn new(transport: impl Into<String>, serialization_format: SerializationFormat) -> Self {
        Self {
            transport: transport.into(),
            serialization_format,
            environment: None,
            exclusive_postfix: default_exclusive_postfix(),
            commands_keyword: None,
            events_keyword: None,
        }
    }

    /// Sets the environment prefix.
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Sets the exclusive queue suffix.
    pub fn exclusive_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.exclusive_postfix = postfix.into();
        self
    }

    /// Overrides the route keywords.
    pub fn keywords(mut self, commands: impl Into<String>, events: impl Into<String>) -> Self {
        self.commands_keyword = Some(commands.into());
        self.events_keyword = Some(events.into());
        self
    }
}

/// Derives broker exchange and queue names from the routing key.
///
/// Exchanges are `topic://{env.}{context}.{kind}.exchange/{type}[.{priority}]`,
/// subscribe-side queues are `{env.}{context}.queue...`, with the exclusive
/// suffix appended for exclusive keys. Commands publish to the remote
/// context's exchange, events to the local one.
///
/// Results are cached per `(route, key)` for the resolver's lifetime.
pub struct ConventionEndpointResolver {
    options: ConventionOptions,
    environment_prefix: String,
    cache: Mutex<HashMap<(String, RoutingKey), Endpoint>>,
}

impl ConventionEndpointResolver {
    /// Creates a resolver with the given naming options.
    pub fn new(options: ConventionOptions) -> Self {
        let environment_prefix = options
            .environment
            .as_deref()
            .map(|env| format!("{env}."))
            .unwrap_or_default();
        Self {
            options,
            environment_prefix,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Naming options in use.
    pub fn options(&self) -> &ConventionOptions {
        &self.options
    }

    fn keyword(&self, route_type: RouteType) -> &str {
        let custom = match route_type {
            RouteType::Commands => self.options.commands_keyword.as_deref(),
            RouteType::Events => self.options.events_keyword.as_deref(),
        };
        custom.unwrap_or(route_type.as_str())
    }

    fn exchange_name(&self, exchange: &str) -> String {
        format!("topic://{}{exchange}", self.environment_prefix)
    }

    fn queue_name(&self, queue: &str, exclusive: bool) -> String {
        if exclusive {
            format!(
                "{}{queue}.{}",
                self.environment_prefix, self.options.exclusive_postfix
            )
        } else {
            format!("{}{queue}", self.environment_prefix)
        }
    }

    fn create_endpoint(&self, route: &str, key: &RoutingKey) -> ConfigurationResult<Endpoint> {
        let type_name = key.message_type.name();
        let (routing_suffix, queue) = if key.priority == 0 {
            (type_name.to_string(), route.to_string())
        } else {
            (
                format!("{type_name}.{}", key.priority),
                format!("{route}.{}", key.priority),
            )
        };
        let keyword = self.keyword(key.route_type);
        let context = |context: &Option<String>| {
            context
                .clone()
                .ok_or_else(|| ConfigurationError::UnresolvedEndpoint {
                    route: route.to_string(),
                    message_type: type_name.to_string(),
                })
        };

        let destination = match (key.route_type, key.communication_type) {
            (RouteType::Commands, CommunicationType::Subscribe) => {
                let local = context(&key.local_context)?;
                Destination::split(
                    self.exchange_name(&format!("{local}.{keyword}.exchange/{routing_suffix}")),
                    self.queue_name(&format!("{local}.queue.{keyword}.{queue}"), key.exclusive),
                )
            }
            (RouteType::Commands, CommunicationType::Publish) => {
                let remote = context(&key.remote_context)?;
                Destination::publish_only(
                    self.exchange_name(&format!("{remote}.{keyword}.exchange/{routing_suffix}")),
                )
            }
            (RouteType::Events, CommunicationType::Subscribe) => {
                let local = context(&key.local_context)?;
                let remote = context(&key.remote_context)?;
                Destination::split(
                    self.exchange_name(&format!("{remote}.{keyword}.exchange/{type_name}")),
                    self.queue_name(
                        &format!("{local}.queue.{remote}.{keyword}.{route}"),
                        key.exclusive,
                    ),
                )
            }
            (RouteType::Events, CommunicationType::Publish) => {
                let local = context(&key.local_context)?;
                Destination::publish_only(
                    self.exchange_name(&format!("{local}.{keyword}.exchange/{type_name}")),
                )
            }
        };

        Ok(Endpoint::new(
            self.options.transport.clone(),
            destination,
            true,
            self.options.serialization_format,
        ))
    }
}

impl EndpointResolver for ConventionEndpointResolver {
    fn resolve(
        &self,
        route: &str,
        key: &RoutingKey,
        provider: &dyn EndpointProvider,
    ) -> ConfigurationResult<Endpoint> {
        let mut cache = self.cache.lock();
        let cache_key = (route.to_string(), key.clone());
        if let Some(endpoint) = cache.get(&cache_key) {
            return Ok(endpoint.clone());
        }

        let endpoint = match provider.get(route) {
            Some(endpoint) => endpoint,
            None => self.create_endpoint(route, key)?,
        };
        trace!(route, key = %key, endpoint = %endpoint, "Convention endpoint cached");
        cache.insert(cache_key, endpoint.clone());
        Ok(endpoint)
    }
}

impl fmt::Debug for ConventionEndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConventionEndpointResolver")
            .field("options", &self.options)
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::message::MessageType;
    use crate::resolver::DefaultEndpointProvider;

    #[derive(Debug, serde::Serialize)]
    struct CreateCashOut;

    #[derive(Debug, serde::Serialize)]
    struct CashOutCreated;

    fn resolver() -> ConventionEndpointResolver {
        ConventionEndpointResolver::new(
            ConventionOptions::new("rmq", SerializationFormat::Json).environment("dev"),
        )
    }

    fn key(route_type: RouteType, communication_type: CommunicationType) -> RoutingKey {
        let message_type = match route_type {
            RouteType::Commands => MessageType::of::<CreateCashOut>(),
            RouteType::Events => MessageType::of::<CashOutCreated>(),
        };
        RoutingKey::new(message_type, route_type, communication_type)
            .with_local_context("operations")
            .with_remote_context("wallet")
    }

    #[test]
    fn command_subscribe_binds_local_queue() {
        let endpoint = resolver()
            .resolve(
                "commands",
                &key(RouteType::Commands, CommunicationType::Subscribe).with_priority(2),
                &DefaultEndpointProvider::new(),
            )
            .unwrap();

        assert_eq!(endpoint.transport_id, "rmq");
        assert_eq!(
            endpoint.destination.publish,
            "topic://dev.operations.commands.exchange/CreateCashOut.2"
        );
        assert_eq!(
            endpoint.destination.subscribe,
            "dev.operations.queue.commands.commands.2"
        );
    }

    #[test]
    fn command_publish_targets_remote_exchange() {
        let endpoint = resolver()
            .resolve(
                "out",
                &key(RouteType::Commands, CommunicationType::Publish),
                &DefaultEndpointProvider::new(),
            )
            .unwrap();

        assert_eq!(
            endpoint.destination.publish,
            "topic://dev.wallet.commands.exchange/CreateCashOut"
        );
        assert!(endpoint.destination.subscribe.is_empty());
    }

    #[test]
    fn event_subscribe_uses_remote_exchange_and_exclusive_queue() {
        let resolver = ConventionEndpointResolver::new(
            ConventionOptions::new("rmq", SerializationFormat::Json)
                .keywords("cmd", "evt")
                .exclusive_postfix("readmodel"),
        );
        let endpoint = resolver
            .resolve(
                "wallet-events",
                &key(RouteType::Events, CommunicationType::Subscribe).exclusive(true),
                &DefaultEndpointProvider::new(),
            )
            .unwrap();

        assert_eq!(
            endpoint.destination.publish,
            "topic://wallet.evt.exchange/CashOutCreated"
        );
        assert_eq!(
            endpoint.destination.subscribe,
            "operations.queue.wallet.evt.wallet-events.readmodel"
        );
    }

    #[test]
    fn event_publish_targets_local_exchange() {
        let endpoint = resolver()
            .resolve(
                "events",
                &key(RouteType::Events, CommunicationType::Publish).with_priority(3),
                &DefaultEndpointProvider::new(),
            )
            .unwrap();

        assert_eq!(
            endpoint.destination.publish,
            "topic://dev.operations.events.exchange/CashOutCreated"
        );
    }

    #[test]
    fn named_endpoints_override_convention() {
        let explicit = Endpoint::new(
            "rmq",
            Destination::new("custom"),
            false,
            SerializationFormat::MessagePack,
        );
        let provider = DefaultEndpointProvider::new().with("commands", explicit.clone());

        let endpoint = resolver()
            .resolve(
                "commands",
                &key(RouteType::Commands, CommunicationType::Subscribe),
                &provider,
            )
            .unwrap();
        assert_eq!(endpoint, explicit);
    }

    #[test]
    fn resolution_is_cached_per_route_and_key() {
        let resolver = resolver();
        let key = key(RouteType::Commands, CommunicationType::Subscribe);
        let first = resolver
            .resolve("commands", &key, &DefaultEndpointProvider::new())
            .unwrap();

        // A provider registered after the first lookup does not change the cached value.
        let provider = DefaultEndpointProvider::new().with(
            "commands",
            Endpoint::new("other", Destination::new("x"), true, SerializationFormat::Json),
        );
        let second = resolver.resolve("commands", &key, &provider).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn concurrent_resolution_yields_one_value() {
        let resolver = Arc::new(resolver());
        let key = key(RouteType::Events, CommunicationType::Publish);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    resolver
                        .resolve("events", &key, &DefaultEndpointProvider::new())
                        .unwrap()
                })
            })
            .collect();

        let endpoints: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(endpoints.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn missing_context_is_unresolved() {
        let key = RoutingKey::new(
            MessageType::of::<CashOutCreated>(),
            RouteType::Events,
            CommunicationType::Publish,
        );
        let result = resolver().resolve("events", &key, &DefaultEndpointProvider::new());
        assert!(matches!(
            result,
            Err(ConfigurationError::UnresolvedEndpoint { .. })
        ));
    }
}
