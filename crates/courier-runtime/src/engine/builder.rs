use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use courier_core::{
    ConfigurationError, ConfiguredEndpointResolver, DefaultEndpointProvider, EndpointProvider,
    EndpointResolver, InMemoryEndpointResolver, MessagingEngine, NoopTelemetry, ProcessingOptions,
    RouteMap, TelemetryReporter,
};
use courier_framework::{
    CommandDispatcher, CommandInterceptorChain, CommandSender, EventDispatcher,
    EventInterceptorChain, EventPublisher, Interceptor,
};
use courier_transport::InMemoryMessagingEngine;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::context::BoundedContext;
use super::headers::HeaderHooks;
use super::registration::{ContextRegistration, DefaultRouting};
use super::router::{ContextPublisher, Router};
use super::CqrsEngine;
use crate::config::CourierConfig;
use crate::error::RuntimeResult;
use crate::logging;

/// Builds a [`CqrsEngine`] from context registrations.
///
/// ```rust,ignore
/// let engine = CqrsEngineBuilder::in_memory()
///     .context(
///         ContextRegistration::new("orders")
///             .listening_commands([MessageType::of::<CreateOrder>()], "commands")
///             .with_command_handlers(CommandHandlers::new(Orders).on(Orders::create)),
///     )
///     .build()?;
/// engine.start_all().await?;
/// ```
pub struct CqrsEngineBuilder {
    messaging: Arc<dyn MessagingEngine>,
    provider: Arc<dyn EndpointProvider>,
    default_resolver: Arc<dyn EndpointResolver>,
    create_missing_endpoints: bool,
    telemetry: Arc<dyn TelemetryReporter>,
    command_chain: CommandInterceptorChain,
    event_chain: EventInterceptorChain,
    failed_command_retry_delay: u64,
    failed_event_retry_delay: u64,
    processing: HashMap<String, ProcessingOptions>,
    contexts: Vec<ContextRegistration>,
    default_routing: DefaultRouting,
}

impl CqrsEngineBuilder {
    /// Starts a builder over `messaging`.
    ///
    /// Routes resolve through named endpoints only until another default
    /// resolver is set.
    pub fn new(messaging: Arc<dyn MessagingEngine>) -> Self {
        Self {
            messaging,
            provider: Arc::new(DefaultEndpointProvider::new()),
            default_resolver: Arc::new(ConfiguredEndpointResolver),
            create_missing_endpoints: false,
            telemetry: Arc::new(NoopTelemetry),
            command_chain: CommandInterceptorChain::new(),
            event_chain: EventInterceptorChain::new(),
            failed_command_retry_delay: courier_framework::DEFAULT_FAILED_RETRY_DELAY_MS,
            failed_event_retry_delay: courier_framework::DEFAULT_FAILED_RETRY_DELAY_MS,
            processing: HashMap::new(),
            contexts: Vec::new(),
            default_routing: DefaultRouting::new(),
        }
    }

    /// A builder over a fresh [`InMemoryMessagingEngine`], resolving routes
    /// to in-memory destinations and declaring them on startup.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryMessagingEngine::new()))
            .default_endpoint_resolver(Arc::new(InMemoryEndpointResolver))
            .create_missing_endpoints(true)
    }

    /// A builder over `messaging` set up from `config`.
    ///
    /// Also installs logging from `config.logging`, unless a subscriber is
    /// already in place.
    pub fn from_config(messaging: Arc<dyn MessagingEngine>, config: &CourierConfig) -> Self {
        let installed = logging::init_from_config(&config.logging);
        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            logging_installed = installed,
            "CQRS engine configured"
        );
        Self::new(messaging).with_config(config)
    }

    /// Applies dispatcher defaults, routing and processing settings.
    pub fn with_config(mut self, config: &CourierConfig) -> Self {
        self.failed_command_retry_delay = config.dispatch.failed_command_retry_delay_ms;
        self.failed_event_retry_delay = config.dispatch.failed_event_retry_delay_ms;
        self.provider = Arc::new(config.routing.endpoint_provider());
        self.default_resolver = config.routing.resolver.build();
        self.create_missing_endpoints = config.routing.create_missing_endpoints;
        self.processing.extend(
            config
                .processing
                .iter()
                .map(|(route, options)| (route.clone(), *options)),
        );
        self
    }

    /// Source of explicitly named endpoints.
    pub fn endpoint_provider(mut self, provider: impl EndpointProvider + 'static) -> Self {
        self.provider = Arc::new(provider);
        self
    }

    /// Resolver used for keys without their own resolver.
    pub fn default_endpoint_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.default_resolver = resolver;
        self
    }

    /// Declare missing destinations during startup verification.
    pub fn create_missing_endpoints(mut self, create: bool) -> Self {
        self.create_missing_endpoints = create;
        self
    }

    /// Reporter for dispatch and send operations.
    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryReporter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Appends an interceptor to every context's command chain.
    pub fn command_interceptor(
        mut self,
        interceptor: impl Interceptor<dyn EventPublisher>,
    ) -> Self {
        self.command_chain.push(Arc::new(interceptor));
        self
    }

    /// Appends an interceptor to every context's event chain.
    pub fn event_interceptor(mut self, interceptor: impl Interceptor<dyn CommandSender>) -> Self {
        self.event_chain.push(Arc::new(interceptor));
        self
    }

    /// Default redelivery delay for failed commands, in milliseconds.
    pub fn failed_command_retry_delay(mut self, delay_ms: u64) -> Self {
        self.failed_command_retry_delay = delay_ms;
        self
    }

    /// Default redelivery delay for failed events, in milliseconds.
    pub fn failed_event_retry_delay(mut self, delay_ms: u64) -> Self {
        self.failed_event_retry_delay = delay_ms;
        self
    }

    /// Worker settings for every route called `route`.
    ///
    /// Options set on a context registration take precedence.
    pub fn processing_options(mut self, route: &str, options: ProcessingOptions) -> Self {
        self.processing.insert(route.to_string(), options);
        self
    }

    /// Registers a bounded context.
    pub fn context(mut self, registration: ContextRegistration) -> Self {
        self.contexts.push(registration);
        self
    }

    /// Sets the routes of the default route map.
    pub fn default_routing(mut self, routing: DefaultRouting) -> Self {
        self.default_routing = routing;
        self
    }

    /// Resolves routes, wires handlers and checks the result.
    ///
    /// Every configuration error surfaces here; nothing is subscribed yet.
    pub fn build(self) -> RuntimeResult<CqrsEngine> {
        let mut names = HashSet::new();
        for registration in &self.contexts {
            if !names.insert(registration.name()) {
                let name = registration.name().to_string();
                return Err(ConfigurationError::DuplicateContext(name).into());
            }
        }

        let mut default_map = self.default_routing.route_map()?;
        self.apply_processing(&mut default_map);
        self.prepare(&mut default_map)?;

        let mut maps = Vec::with_capacity(self.contexts.len());
        for registration in &self.contexts {
            let mut map = registration.route_map()?;
            self.apply_processing(&mut map);
            registration.apply_processing(&mut map)?;
            self.prepare(&mut map)?;
            maps.push(map);
        }

        let router = Arc::new(Router {
            messaging: Arc::clone(&self.messaging),
            default_map,
            maps,
            headers: Arc::new(HeaderHooks::default()),
            telemetry: Arc::clone(&self.telemetry),
        });

        let command_chain = Arc::new(self.command_chain);
        let event_chain = Arc::new(self.event_chain);
        let mut contexts = Vec::with_capacity(self.contexts.len());

        for registration in self.contexts {
            let name = registration.name().to_string();
            let (command_delay, event_delay) = registration.retry_delays();
            let publisher = Arc::new(ContextPublisher::new(Arc::clone(&router), name.clone()));

            let mut commands = CommandDispatcher::new(
                name.clone(),
                Arc::clone(&publisher) as Arc<dyn EventPublisher>,
                Arc::clone(&command_chain),
                command_delay.unwrap_or(self.failed_command_retry_delay),
            )
            .with_telemetry(Arc::clone(&self.telemetry));
            let mut events = EventDispatcher::new(
                name.clone(),
                Arc::clone(&publisher) as Arc<dyn CommandSender>,
                Arc::clone(&event_chain),
                event_delay.unwrap_or(self.failed_event_retry_delay),
            )
            .with_telemetry(Arc::clone(&self.telemetry));

            let (command_wirings, event_wirings, processes) = registration.into_wiring();
            for wire in command_wirings {
                wire(&mut commands)?;
            }
            for wire in event_wirings {
                wire(&mut events)?;
            }

            let context = BoundedContext {
                name,
                commands,
                events,
                publisher,
                processes,
            };
            if let Some(map) = router.context_map(&context.name) {
                context.check_listened_types(map)?;
            }
            debug!(context = %context.name, "Bounded context wired");
            contexts.push(Arc::new(context));
        }

        info!(
            contexts = contexts.len(),
            interceptors = command_chain.len() + event_chain.len(),
            "CQRS engine built"
        );

        Ok(CqrsEngine {
            router,
            contexts,
            subscriptions: Mutex::new(Vec::new()),
            create_missing_endpoints: self.create_missing_endpoints,
            shutdown: CancellationToken::new(),
        })
    }

    fn apply_processing(&self, map: &mut RouteMap) {
        for (route, options) in &self.processing {
            if map.get(route).is_some() {
                map.route(route).set_options(*options);
            }
        }
    }

    /// Declares the map's processing groups and resolves its endpoints.
    fn prepare(&self, map: &mut RouteMap) -> RuntimeResult<()> {
        for route in map.iter() {
            self.messaging
                .add_processing_group(route.processing_group_name(), *route.options());
        }
        map.resolve_routes(self.provider.as_ref(), self.default_resolver.as_ref())?;
        Ok(())
    }
}
