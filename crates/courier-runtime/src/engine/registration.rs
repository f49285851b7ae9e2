//! Bounded-context and default-routing registrations.
//!
//! A registration is a list of route descriptors plus the handlers and
//! processes of one context. Modifiers such as [`ContextRegistration::prioritized`]
//! apply to the descriptor added last.
//!
//! ```rust,ignore
//! let orders = ContextRegistration::new("orders")
//!     .listening_commands([MessageType::of::<CreateOrder>()], "commands")
//!     .prioritized(2)
//!     .with_loopback()
//!     .publishing_events([MessageType::of::<OrderCreated>()], "events")
//!     .with_command_handlers(CommandHandlers::new(OrderService::default()).on(OrderService::create));
//! ```

use std::fmt;
use std::sync::Arc;

use courier_core::{
    ConfigurationError, ConfigurationResult, EndpointResolver, MessageType, ProcessingOptions,
    RouteMap,
};
use courier_framework::{CommandDispatcher, CommandHandlers, EventDispatcher, IntoEventBindings};

use super::process::Process;

pub(crate) type CommandWiring =
    Box<dyn FnOnce(&mut CommandDispatcher) -> ConfigurationResult<()> + Send>;
pub(crate) type EventWiring = Box<dyn FnOnce(&mut EventDispatcher) -> ConfigurationResult<()> + Send>;

// =============================================================================
// Route Descriptors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    PublishCommands { remote: String },
    ListenCommands,
    PublishEvents,
    ListenEvents { remote: String },
}

#[derive(Clone)]
struct RouteDescriptor {
    flow: Flow,
    types: Vec<MessageType>,
    route: String,
    lowest_priority: u32,
    resolver: Option<Arc<dyn EndpointResolver>>,
    exclusive: bool,
    loopback: Option<String>,
}

impl RouteDescriptor {
    fn new(flow: Flow, types: impl IntoIterator<Item = MessageType>, route: &str) -> Self {
        Self {
            flow,
            types: types.into_iter().collect(),
            route: route.to_string(),
            lowest_priority: 0,
            resolver: None,
            exclusive: false,
            loopback: None,
        }
    }

    fn apply(&self, map: &mut RouteMap, context: Option<&str>) -> ConfigurationResult<()> {
        for &message_type in &self.types {
            for priority in 0..=self.lowest_priority {
                let resolver = self.resolver.clone();
                match &self.flow {
                    Flow::PublishCommands { remote } => map
                        .route(&self.route)
                        .add_published_command(message_type, priority, remote, resolver)?,
                    Flow::ListenCommands => {
                        map.route(&self.route).add_subscribed_command(
                            message_type,
                            priority,
                            resolver.clone(),
                        )?;
                        if let (Some(route), Some(context)) = (&self.loopback, context) {
                            map.route(route).add_published_command(
                                message_type,
                                priority,
                                context,
                                resolver,
                            )?;
                        }
                    }
                    Flow::PublishEvents => map
                        .route(&self.route)
                        .add_published_event(message_type, priority, resolver)?,
                    Flow::ListenEvents { remote } => map.route(&self.route).add_subscribed_event(
                        message_type,
                        priority,
                        remote,
                        self.exclusive,
                        resolver,
                    )?,
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("flow", &self.flow)
            .field("types", &self.types)
            .field("route", &self.route)
            .field("lowest_priority", &self.lowest_priority)
            .field("exclusive", &self.exclusive)
            .field("loopback", &self.loopback)
            .finish()
    }
}

/// Descriptors plus the misuse of modifiers, reported at build time.
#[derive(Debug, Default, Clone)]
struct Descriptors {
    items: Vec<RouteDescriptor>,
    errors: Vec<String>,
}

impl Descriptors {
    fn modify(&mut self, modifier: &str, f: impl FnOnce(&mut RouteDescriptor) -> Result<(), String>) {
        let result = match self.items.last_mut() {
            Some(descriptor) => f(descriptor),
            None => Err("no route registered yet".to_string()),
        };
        if let Err(reason) = result {
            self.errors.push(format!("{modifier}: {reason}"));
        }
    }

    fn apply(&self, map: &mut RouteMap, context: Option<&str>) -> ConfigurationResult<()> {
        if let Some(error) = self.errors.first() {
            return Err(ConfigurationError::invalid(format!(
                "route map '{}': {error}",
                map.name()
            )));
        }
        for descriptor in &self.items {
            descriptor.apply(map, context)?;
        }
        Ok(())
    }
}

// =============================================================================
// Context Registration
// =============================================================================

/// Everything the engine needs to know about one bounded context.
pub struct ContextRegistration {
    name: String,
    descriptors: Descriptors,
    processing: Vec<(String, ProcessingOptions)>,
    failed_command_retry_delay: Option<u64>,
    failed_event_retry_delay: Option<u64>,
    command_wirings: Vec<CommandWiring>,
    event_wirings: Vec<EventWiring>,
    processes: Vec<Arc<dyn Process>>,
}

impl ContextRegistration {
    /// Starts the registration of context `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptors: Descriptors::default(),
            processing: Vec::new(),
            failed_command_retry_delay: None,
            failed_event_retry_delay: None,
            command_wirings: Vec::new(),
            event_wirings: Vec::new(),
            processes: Vec::new(),
        }
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sends `types` to `remote_context` through `route`.
    pub fn publishing_commands(
        mut self,
        types: impl IntoIterator<Item = MessageType>,
        remote_context: &str,
        route: &str,
    ) -> Self {
        self.descriptors.items.push(RouteDescriptor::new(
            Flow::PublishCommands {
                remote: remote_context.to_string(),
            },
            types,
            route,
        ));
        self
    }

    /// Consumes commands of `types` from `route`.
    pub fn listening_commands(
        mut self,
        types: impl IntoIterator<Item = MessageType>,
        route: &str,
    ) -> Self {
        self.descriptors
            .items
            .push(RouteDescriptor::new(Flow::ListenCommands, types, route));
        self
    }

    /// Publishes events of `types` through `route`.
    pub fn publishing_events(
        mut self,
        types: impl IntoIterator<Item = MessageType>,
        route: &str,
    ) -> Self {
        self.descriptors
            .items
            .push(RouteDescriptor::new(Flow::PublishEvents, types, route));
        self
    }

    /// Consumes events of `types` published by `remote_context` from `route`.
    pub fn listening_events(
        mut self,
        types: impl IntoIterator<Item = MessageType>,
        remote_context: &str,
        route: &str,
    ) -> Self {
        self.descriptors.items.push(RouteDescriptor::new(
            Flow::ListenEvents {
                remote: remote_context.to_string(),
            },
            types,
            route,
        ));
        self
    }

    /// Registers priority lanes `0..=lowest_priority` for the last route.
    pub fn prioritized(mut self, lowest_priority: u32) -> Self {
        self.descriptors.modify("prioritized", |descriptor| {
            descriptor.lowest_priority = lowest_priority;
            Ok(())
        });
        self
    }

    /// Resolves the last route's keys with `resolver` instead of the default.
    pub fn with_endpoint_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.descriptors.modify("with_endpoint_resolver", |descriptor| {
            descriptor.resolver = Some(resolver);
            Ok(())
        });
        self
    }

    /// Makes the last listened events route exclusive to this context.
    pub fn exclusive(mut self) -> Self {
        self.descriptors
            .modify("exclusive", |descriptor| match descriptor.flow {
                Flow::ListenEvents { .. } => {
                    descriptor.exclusive = true;
                    Ok(())
                }
                _ => Err("only listened events can be exclusive".to_string()),
            });
        self
    }

    /// Lets the context send the last listened commands to itself on the
    /// same route.
    pub fn with_loopback(self) -> Self {
        let route = self
            .descriptors
            .items
            .last()
            .map(|descriptor| descriptor.route.clone())
            .unwrap_or_default();
        self.with_loopback_on(&route)
    }

    /// Lets the context send the last listened commands to itself through
    /// `route`.
    pub fn with_loopback_on(mut self, route: &str) -> Self {
        self.descriptors
            .modify("with_loopback", |descriptor| match descriptor.flow {
                Flow::ListenCommands => {
                    descriptor.loopback = Some(route.to_string());
                    Ok(())
                }
                _ => Err("loopback needs listened commands".to_string()),
            });
        self
    }

    /// Overrides the worker settings of `route`.
    pub fn processing_options(mut self, route: &str, options: ProcessingOptions) -> Self {
        self.processing.push((route.to_string(), options));
        self
    }

    /// Redelivery delay for failed commands, in milliseconds.
    pub fn failed_command_retry_delay(mut self, delay_ms: u64) -> Self {
        self.failed_command_retry_delay = Some(delay_ms);
        self
    }

    /// Redelivery delay for failed events, in milliseconds.
    pub fn failed_event_retry_delay(mut self, delay_ms: u64) -> Self {
        self.failed_event_retry_delay = Some(delay_ms);
        self
    }

    /// Wires a command handler table.
    pub fn with_command_handlers<H: Send + Sync + 'static>(
        mut self,
        handlers: CommandHandlers<H>,
    ) -> Self {
        self.command_wirings
            .push(Box::new(move |dispatcher: &mut CommandDispatcher| {
                dispatcher.wire(handlers)
            }));
        self
    }

    /// Wires event handlers for events coming from `remote_context`.
    pub fn with_event_handlers<B>(mut self, remote_context: &str, handlers: B) -> Self
    where
        B: IntoEventBindings + Send + 'static,
    {
        let remote = remote_context.to_string();
        self.event_wirings
            .push(Box::new(move |dispatcher: &mut EventDispatcher| {
                dispatcher.wire(&remote, handlers)
            }));
        self
    }

    /// Adds a process started with the engine.
    pub fn with_process(mut self, process: impl Process) -> Self {
        self.processes.push(Arc::new(process));
        self
    }

    /// Builds this context's route map.
    pub(crate) fn route_map(&self) -> ConfigurationResult<RouteMap> {
        let mut map = RouteMap::new(self.name.clone());
        self.descriptors.apply(&mut map, Some(&self.name))?;
        Ok(map)
    }

    /// Explicit processing options, checked against the route map.
    pub(crate) fn apply_processing(&self, map: &mut RouteMap) -> ConfigurationResult<()> {
        for (route, options) in &self.processing {
            if map.get(route).is_none() {
                return Err(ConfigurationError::invalid(format!(
                    "context '{}' sets processing options for unknown route '{route}'",
                    self.name
                )));
            }
            map.route(route).set_options(*options);
        }
        Ok(())
    }

    pub(crate) fn retry_delays(&self) -> (Option<u64>, Option<u64>) {
        (
            self.failed_command_retry_delay,
            self.failed_event_retry_delay,
        )
    }

    pub(crate) fn into_wiring(self) -> (Vec<CommandWiring>, Vec<EventWiring>, Vec<Arc<dyn Process>>) {
        (self.command_wirings, self.event_wirings, self.processes)
    }
}

impl fmt::Debug for ContextRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRegistration")
            .field("name", &self.name)
            .field("routes", &self.descriptors.items)
            .field("command_handlers", &self.command_wirings.len())
            .field("event_handlers", &self.event_wirings.len())
            .field("processes", &self.processes.len())
            .finish()
    }
}

// =============================================================================
// Default Routing
// =============================================================================

/// Routes of the default route map.
///
/// Used when a context sends a command it has no route for, or when a
/// command is sent without a context.
#[derive(Debug, Default, Clone)]
pub struct DefaultRouting {
    descriptors: Descriptors,
}

impl DefaultRouting {
    /// Creates empty default routing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `types` to `remote_context` through `route`.
    pub fn publishing_commands(
        mut self,
        types: impl IntoIterator<Item = MessageType>,
        remote_context: &str,
        route: &str,
    ) -> Self {
        self.descriptors.items.push(RouteDescriptor::new(
            Flow::PublishCommands {
                remote: remote_context.to_string(),
            },
            types,
            route,
        ));
        self
    }

    /// Registers priority lanes `0..=lowest_priority` for the last route.
    pub fn prioritized(mut self, lowest_priority: u32) -> Self {
        self.descriptors.modify("prioritized", |descriptor| {
            descriptor.lowest_priority = lowest_priority;
            Ok(())
        });
        self
    }

    /// Resolves the last route's keys with `resolver` instead of the default.
    pub fn with_endpoint_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.descriptors.modify("with_endpoint_resolver", |descriptor| {
            descriptor.resolver = Some(resolver);
            Ok(())
        });
        self
    }

    pub(crate) fn route_map(&self) -> ConfigurationResult<RouteMap> {
        let mut map = RouteMap::default_map();
        self.descriptors.apply(&mut map, None)?;
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{CommunicationType, RouteType};

    use super::*;

    #[test]
    fn prioritized_listening_registers_every_lane() {
        let map = ContextRegistration::new("bc")
            .listening_commands([MessageType::of::<String>()], "commands")
            .prioritized(2)
            .route_map()
            .unwrap();

        let priorities: Vec<u32> = map
            .get("commands")
            .unwrap()
            .routing_keys()
            .map(|key| key.priority)
            .collect();
        assert_eq!(priorities, [0, 1, 2]);
    }

    #[test]
    fn loopback_publishes_listened_commands_to_self() {
        let map = ContextRegistration::new("bc")
            .listening_commands([MessageType::of::<String>()], "commands")
            .with_loopback()
            .route_map()
            .unwrap();

        let keys: Vec<_> = map.get("commands").unwrap().routing_keys().cloned().collect();
        assert_eq!(keys.len(), 2);
        let published = keys
            .iter()
            .find(|key| key.communication_type == CommunicationType::Publish)
            .unwrap();
        assert_eq!(published.route_type, RouteType::Commands);
        assert_eq!(published.remote_context.as_deref(), Some("bc"));
    }

    #[test]
    fn misplaced_modifiers_fail_the_build() {
        let err = ContextRegistration::new("bc")
            .publishing_events([MessageType::of::<i32>()], "events")
            .with_loopback()
            .route_map()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRegistration(_)));

        let err = DefaultRouting::new().prioritized(1).route_map().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidRegistration(_)));
    }

    #[test]
    fn processing_options_need_a_known_route() {
        let registration = ContextRegistration::new("bc")
            .listening_commands([MessageType::of::<String>()], "commands")
            .processing_options(
                "commands",
                ProcessingOptions {
                    thread_count: 4,
                    queue_capacity: 16,
                },
            )
            .processing_options("missing", ProcessingOptions::default());

        let mut map = registration.route_map().unwrap();
        assert!(registration.apply_processing(&mut map).is_err());
        assert_eq!(map.get("commands").unwrap().options().thread_count, 4);
    }
}
