//! The CQRS engine: bounded contexts wired to a messaging engine.
//!
//! # Lifecycle
//!
//! ```text
//! CqrsEngineBuilder::build()   wire handlers, resolve routes, check listened types
//!         │
//! start_publishers()           verify publish-side endpoints
//! start_subscribers()          verify subscribe-side endpoints, subscribe dispatchers
//! start_processes()            start every registered Process
//!         │
//! send_command / publish_event
//!         │
//! shutdown()                   unsubscribe, dispose processes, stop batch timers
//! ```
//!
//! ```rust,ignore
//! let engine = CqrsEngine::builder(Arc::new(InMemoryMessagingEngine::new()))
//!     .default_endpoint_resolver(Arc::new(InMemoryEndpointResolver))
//!     .create_missing_endpoints(true)
//!     .context(orders)
//!     .build()?;
//!
//! engine.start_all().await?;
//! engine.send_command(CreateOrder { id: 1 }, "api", "orders", 0).await?;
//! engine.shutdown().await;
//! ```

mod builder;
mod context;
mod headers;
mod process;
mod registration;
mod router;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use courier_core::{
    Acknowledge, BoxedMessage, CommunicationType, ConfigurationError, Endpoint, EndpointUsage,
    Headers, Message, MessageCallback, MessageType, MessagingEngine, RouteMap, RouteType,
    SubscribeRequest, Subscription, UnknownTypeCallback,
};
use courier_framework::{CommandSender, EventPublisher};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{RuntimeError, RuntimeResult};

pub use builder::CqrsEngineBuilder;
pub use headers::{ReadHeadersAction, WriteHeadersFunc};
pub use process::Process;
pub use registration::{ContextRegistration, DefaultRouting};

use context::BoundedContext;
use router::Router;

/// Runs bounded contexts on top of a [`MessagingEngine`].
///
/// Built by [`CqrsEngineBuilder`]; every configuration error surfaces at
/// build time, so a built engine only fails on endpoint verification or
/// unrouted messages.
pub struct CqrsEngine {
    router: Arc<Router>,
    contexts: Vec<Arc<BoundedContext>>,
    subscriptions: Mutex<Vec<Subscription>>,
    create_missing_endpoints: bool,
    shutdown: CancellationToken,
}

/// Subscribe-side keys sharing one subscription.
struct SubscriptionGroup {
    route: String,
    processing_group: String,
    route_type: RouteType,
    endpoint: Endpoint,
    priority: u32,
    remote_context: Option<String>,
    accepted_types: Vec<MessageType>,
}

impl CqrsEngine {
    /// Starts building an engine over `messaging`.
    pub fn builder(messaging: Arc<dyn MessagingEngine>) -> CqrsEngineBuilder {
        CqrsEngineBuilder::new(messaging)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Verifies every publish-side endpoint.
    pub fn start_publishers(&self) -> RuntimeResult<()> {
        self.ensure_running()?;
        let endpoints = self.collect_endpoints(CommunicationType::Publish);
        self.ensure_endpoints(EndpointUsage::Publish, &endpoints)?;
        info!(endpoints = endpoints.len(), "Publishers started");
        Ok(())
    }

    /// Verifies every subscribe-side endpoint and subscribes the dispatchers.
    ///
    /// Calling this again after a successful start does nothing.
    pub fn start_subscribers(&self) -> RuntimeResult<()> {
        self.ensure_running()?;
        if !self.subscriptions.lock().is_empty() {
            warn!("Subscribers already started");
            return Ok(());
        }

        let endpoints = self.collect_endpoints(CommunicationType::Subscribe);
        self.ensure_endpoints(EndpointUsage::Subscribe, &endpoints)?;

        let mut subscriptions = Vec::new();
        for context in &self.contexts {
            let Some(map) = self.router.context_map(&context.name) else {
                continue;
            };
            for group in subscription_groups(map) {
                let subscription = self.subscribe(context, group)?;
                subscriptions.push(subscription);
            }
        }

        info!(subscriptions = subscriptions.len(), "Subscribers started");
        self.subscriptions.lock().extend(subscriptions);
        Ok(())
    }

    /// Starts every registered process, in registration order.
    pub async fn start_processes(&self) -> RuntimeResult<()> {
        self.ensure_running()?;
        for context in &self.contexts {
            for process in &context.processes {
                let commands: Arc<dyn CommandSender> = context.publisher.clone();
                let events: Arc<dyn EventPublisher> = context.publisher.clone();
                process
                    .start(commands, events)
                    .await
                    .map_err(|source| RuntimeError::ProcessStart {
                        context: context.name.clone(),
                        source,
                    })?;
                debug!(context = %context.name, "Process started");
            }
        }
        Ok(())
    }

    /// Starts publishers, subscribers and processes.
    pub async fn start_all(&self) -> RuntimeResult<()> {
        self.start_publishers()?;
        self.start_subscribers()?;
        self.start_processes().await?;
        info!(contexts = self.contexts.len(), "CQRS engine started");
        Ok(())
    }

    /// Starts everything and runs until Ctrl+C or [`shutdown`](Self::shutdown).
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start_all().await?;
        info!("CQRS engine is now running. Press Ctrl+C to stop.");

        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down"),
                    Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
                }
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.shutdown().await;
        Ok(())
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Sends a command from `context` to `remote_context`.
    ///
    /// Routes of `context` are tried first, then the default routes.
    pub async fn send_command<C: Message>(
        &self,
        command: C,
        context: &str,
        remote_context: &str,
        priority: u32,
    ) -> RuntimeResult<()> {
        self.ensure_running()?;
        self.router
            .send_message(
                BoxedMessage::new(command),
                RouteType::Commands,
                Some(context),
                priority,
                Some(remote_context),
            )
            .await?;
        Ok(())
    }

    /// Sends a command to `remote_context` through the default routes.
    pub async fn send_default_command<C: Message>(
        &self,
        command: C,
        remote_context: &str,
        priority: u32,
    ) -> RuntimeResult<()> {
        self.ensure_running()?;
        self.router
            .send_message(
                BoxedMessage::new(command),
                RouteType::Commands,
                None,
                priority,
                Some(remote_context),
            )
            .await?;
        Ok(())
    }

    /// Publishes an event on behalf of `context`.
    pub async fn publish_event<E: Message>(&self, event: E, context: &str) -> RuntimeResult<()> {
        self.ensure_running()?;
        self.router
            .send_message(
                BoxedMessage::new(event),
                RouteType::Events,
                Some(context),
                0,
                None,
            )
            .await?;
        Ok(())
    }

    // =========================================================================
    // Headers
    // =========================================================================

    /// Adds a hook that sees the headers of every inbound message.
    pub fn set_read_headers_action(&self, action: impl Fn(&Headers) + Send + Sync + 'static) {
        self.router.headers.add_read(Arc::new(action));
    }

    /// Adds a hook contributing headers to every outbound message.
    ///
    /// When two hooks write the same key, the first registered value wins.
    pub fn set_write_headers_func(&self, func: impl Fn() -> Headers + Send + Sync + 'static) {
        self.router.headers.add_write(Arc::new(func));
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Command sender acting on behalf of `context`.
    pub fn command_sender(&self, context: &str) -> RuntimeResult<Arc<dyn CommandSender>> {
        let context = self.context(context)?;
        Ok(context.publisher.clone())
    }

    /// Event publisher acting on behalf of `context`.
    pub fn event_publisher(&self, context: &str) -> RuntimeResult<Arc<dyn EventPublisher>> {
        let context = self.context(context)?;
        Ok(context.publisher.clone())
    }

    /// The resolved route map of `context`.
    pub fn route_map(&self, context: &str) -> Option<&RouteMap> {
        self.router.context_map(context)
    }

    /// The resolved default route map.
    pub fn default_route_map(&self) -> &RouteMap {
        &self.router.default_map
    }

    /// Names of the registered bounded contexts.
    pub fn contexts(&self) -> impl Iterator<Item = &str> {
        self.contexts.iter().map(|context| context.name.as_str())
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stops consuming, disposes processes and stops batch timers.
    ///
    /// Handler invocations already running are not aborted. Calling this
    /// again does nothing.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        info!("Stopping CQRS engine");

        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }

        for context in &self.contexts {
            for process in &context.processes {
                process.dispose().await;
            }
            context.events.shutdown();
            debug!(context = %context.name, "Bounded context stopped");
        }

        info!("CQRS engine stopped");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_running(&self) -> RuntimeResult<()> {
        if self.shutdown.is_cancelled() {
            Err(RuntimeError::ShutDown)
        } else {
            Ok(())
        }
    }

    fn context(&self, name: &str) -> RuntimeResult<&Arc<BoundedContext>> {
        self.contexts
            .iter()
            .find(|context| context.name == name)
            .ok_or_else(|| ConfigurationError::UnknownContext(name.to_string()).into())
    }

    /// Distinct endpoints used in `direction`, in route order.
    fn collect_endpoints(&self, direction: CommunicationType) -> Vec<Endpoint> {
        let mut seen = HashSet::new();
        let mut endpoints = Vec::new();
        for map in self.router.route_maps() {
            for route in map.iter() {
                for (key, endpoint) in route.message_routes() {
                    if key.communication_type != direction {
                        continue;
                    }
                    let endpoint = match direction {
                        CommunicationType::Subscribe => endpoint.subscribe_side(),
                        CommunicationType::Publish => endpoint.clone(),
                    };
                    if seen.insert(endpoint.clone()) {
                        endpoints.push(endpoint);
                    }
                }
            }
        }
        endpoints
    }

    fn ensure_endpoints(&self, usage: EndpointUsage, endpoints: &[Endpoint]) -> RuntimeResult<()> {
        if endpoints.is_empty() {
            return Ok(());
        }

        let results = self.router.messaging.verify_endpoints(
            usage,
            endpoints,
            self.create_missing_endpoints,
        );

        let mut failures = Vec::new();
        for endpoint in endpoints {
            match results.get(endpoint) {
                Some(None) => info!(?usage, %endpoint, "Endpoint verified: OK"),
                Some(Some(reason)) => {
                    error!(?usage, %endpoint, %reason, "Endpoint verified: ERROR");
                    failures.push(format!("{endpoint}: {reason}"));
                }
                None => {
                    error!(?usage, %endpoint, "Endpoint verified: ERROR (no result)");
                    failures.push(format!("{endpoint}: not verified"));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidEndpoints(failures.join("; ")).into())
        }
    }

    fn subscribe(
        &self,
        context: &Arc<BoundedContext>,
        group: SubscriptionGroup,
    ) -> RuntimeResult<Subscription> {
        let callback = self.message_callback(context, &group);
        let failed_delay = match group.route_type {
            RouteType::Commands => context.commands.failed_retry_delay(),
            RouteType::Events => context.events.failed_retry_delay(),
        };

        let name = context.name.clone();
        let destination = group.endpoint.to_string();
        let unknown_type_callback: UnknownTypeCallback =
            Arc::new(move |message_type: MessageType, ack: Acknowledge| {
                error!(
                    context = %name,
                    endpoint = %destination,
                    %message_type,
                    "Received message of a type the subscription does not accept"
                );
                ack.nack(failed_delay);
            });

        debug!(
            context = %context.name,
            route = %group.route,
            endpoint = %group.endpoint,
            priority = group.priority,
            types = group.accepted_types.len(),
            "Subscribing"
        );

        let subscription = self.router.messaging.subscribe(SubscribeRequest {
            endpoint: group.endpoint,
            callback,
            unknown_type_callback,
            processing_group: group.processing_group,
            priority: group.priority,
            accepted_types: group.accepted_types,
        })?;
        Ok(subscription)
    }

    fn message_callback(
        &self,
        context: &Arc<BoundedContext>,
        group: &SubscriptionGroup,
    ) -> MessageCallback {
        let context = Arc::clone(context);
        let hooks = Arc::clone(&self.router.headers);

        match group.route_type {
            RouteType::Commands => {
                let endpoint = group.endpoint.clone();
                let route = group.route.clone();
                Arc::new(
                    move |message: BoxedMessage,
                          ack: Acknowledge,
                          headers: Headers|
                          -> BoxFuture<'static, ()> {
                        hooks.read(&headers);
                        let context = Arc::clone(&context);
                        let endpoint = endpoint.clone();
                        let route = route.clone();
                        async move {
                            context
                                .commands
                                .dispatch(message, ack, &endpoint, &route)
                                .await;
                        }
                        .boxed()
                    },
                )
            }
            RouteType::Events => {
                let remote_context = group.remote_context.clone().unwrap_or_default();
                Arc::new(
                    move |message: BoxedMessage,
                          ack: Acknowledge,
                          headers: Headers|
                          -> BoxFuture<'static, ()> {
                        hooks.read(&headers);
                        let context = Arc::clone(&context);
                        let remote_context = remote_context.clone();
                        async move {
                            context
                                .events
                                .dispatch(&remote_context, message, ack)
                                .await;
                        }
                        .boxed()
                    },
                )
            }
        }
    }
}

impl fmt::Debug for CqrsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CqrsEngine")
            .field("router", &self.router)
            .field("contexts", &self.contexts)
            .field("subscriptions", &self.subscriptions.lock().len())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish()
    }
}

/// Groups the subscribe-side keys of `map` by route, endpoint, priority and
/// remote context.
fn subscription_groups(map: &RouteMap) -> Vec<SubscriptionGroup> {
    let mut groups: Vec<SubscriptionGroup> = Vec::new();
    for route in map.iter() {
        let mut keys: Vec<_> = route
            .message_routes()
            .iter()
            .filter(|(key, _)| key.communication_type == CommunicationType::Subscribe)
            .collect();
        // Stable subscription order.
        keys.sort_by(|(a, _), (b, _)| {
            (a.priority, a.message_type.full_name()).cmp(&(b.priority, b.message_type.full_name()))
        });

        for (key, endpoint) in keys {
            let endpoint = endpoint.subscribe_side();
            let existing = groups.iter_mut().find(|group| {
                group.route == route.name()
                    && group.endpoint == endpoint
                    && group.priority == key.priority
                    && group.remote_context == key.remote_context
            });
            match existing {
                Some(group) => {
                    if !group.accepted_types.contains(&key.message_type) {
                        group.accepted_types.push(key.message_type);
                    }
                }
                None => groups.push(SubscriptionGroup {
                    route: route.name().to_string(),
                    processing_group: route.processing_group_name().to_string(),
                    route_type: key.route_type,
                    endpoint,
                    priority: key.priority,
                    remote_context: key.remote_context.clone(),
                    accepted_types: vec![key.message_type],
                }),
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::InMemoryEndpointResolver;

    fn map() -> RouteMap {
        let mut map = RouteMap::new("bc");
        map.route("commands")
            .add_subscribed_command(MessageType::of::<String>(), 0, None)
            .unwrap();
        map.route("commands")
            .add_subscribed_command(MessageType::of::<i32>(), 0, None)
            .unwrap();
        map.route("commands")
            .add_subscribed_command(MessageType::of::<String>(), 1, None)
            .unwrap();
        map.route("events")
            .add_subscribed_event(MessageType::of::<u64>(), 0, "remote", false, None)
            .unwrap();
        map.resolve_routes(
            &courier_core::DefaultEndpointProvider::new(),
            &InMemoryEndpointResolver,
        )
        .unwrap();
        map
    }

    #[test]
    fn groups_keys_by_endpoint_priority_and_remote() {
        let groups = subscription_groups(&map());
        assert_eq!(groups.len(), 3);

        let commands: Vec<_> = groups
            .iter()
            .filter(|group| group.route_type == RouteType::Commands)
            .collect();
        assert_eq!(commands.len(), 2);
        let lane0 = commands.iter().find(|g| g.priority == 0).unwrap();
        assert_eq!(lane0.accepted_types.len(), 2);
        assert_eq!(lane0.processing_group, "cqrs.bc.commands");
        let lane1 = commands.iter().find(|g| g.priority == 1).unwrap();
        assert_eq!(lane1.accepted_types, vec![MessageType::of::<String>()]);

        let events = groups
            .iter()
            .find(|group| group.route_type == RouteType::Events)
            .unwrap();
        assert_eq!(events.remote_context.as_deref(), Some("remote"));
    }
}
