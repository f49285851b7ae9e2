//! Command dispatch: one handler per command type.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use courier_core::{
    Acknowledge, BoxFuture, BoxedMessage, ConfigurationError, ConfigurationResult, Endpoint, MessageType,
    NoopTelemetry, TelemetryReporter,
};
use tracing::{Instrument, debug, info_span, warn};

use super::DEFAULT_FAILED_RETRY_DELAY_MS;
use crate::error::ChainResult;
use crate::handler::{CommandBinding, CommandHandlers, HandlerRef, ParameterSet, guarded};
use crate::middleware::{ChainTerminal, CommandInterceptorChain};
use crate::publisher::EventPublisher;

struct CommandEntry {
    handler: HandlerRef,
    parameters: ParameterSet,
    binding: CommandBinding,
}

/// Routes inbound commands of one bounded context to their single handler.
///
/// # Acknowledgement
///
/// | outcome                           | acknowledge                   |
/// |-----------------------------------|-------------------------------|
/// | no handler for the type           | `(failed_retry_delay, false)` |
/// | handler asked for a retry         | `(retry_delay_ms, false)`     |
/// | handler failed or panicked        | `(failed_retry_delay, false)` |
/// | otherwise                         | `(0, true)`                   |
pub struct CommandDispatcher {
    context: String,
    handlers: HashMap<MessageType, CommandEntry>,
    publisher: Arc<dyn EventPublisher>,
    chain: Arc<CommandInterceptorChain>,
    failed_retry_delay: u64,
    telemetry: Arc<dyn TelemetryReporter>,
}

impl CommandDispatcher {
    /// Creates a dispatcher for `context`.
    ///
    /// `publisher` is handed to interceptors; `failed_retry_delay` is the
    /// redelivery delay in milliseconds for failed commands.
    pub fn new(
        context: impl Into<String>,
        publisher: Arc<dyn EventPublisher>,
        chain: Arc<CommandInterceptorChain>,
        failed_retry_delay: u64,
    ) -> Self {
        Self {
            context: context.into(),
            handlers: HashMap::new(),
            publisher,
            chain,
            failed_retry_delay,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    /// A dispatcher with an empty chain and the default failure delay.
    pub fn standalone(context: impl Into<String>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self::new(
            context,
            publisher,
            Arc::new(CommandInterceptorChain::new()),
            DEFAULT_FAILED_RETRY_DELAY_MS,
        )
    }

    /// Reports every handled command to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryReporter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The bounded context this dispatcher belongs to.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Redelivery delay for failed commands, in milliseconds.
    pub fn failed_retry_delay(&self) -> u64 {
        self.failed_retry_delay
    }

    /// Registers the handlers of one table.
    ///
    /// Fails without registering anything if any command type of the table
    /// already has a handler.
    pub fn wire<H: Send + Sync + 'static>(
        &mut self,
        handlers: CommandHandlers<H>,
    ) -> ConfigurationResult<()> {
        let (handler, parameters, bindings) = handlers.into_parts();

        let mut seen = HashSet::new();
        for binding in &bindings {
            if self.handlers.contains_key(&binding.message_type)
                || !seen.insert(binding.message_type)
            {
                return Err(ConfigurationError::DuplicateCommandHandler {
                    context: self.context.clone(),
                    message_type: binding.message_type.full_name().to_string(),
                });
            }
        }

        debug!(
            context = %self.context,
            handler = handler.name(),
            commands = bindings.len(),
            "Wired command handler"
        );

        for binding in bindings {
            self.handlers.insert(
                binding.message_type,
                CommandEntry {
                    handler: handler.clone(),
                    parameters: parameters.clone(),
                    binding,
                },
            );
        }
        Ok(())
    }

    /// Returns `true` if a handler is wired for `message_type`.
    pub fn handles(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Command types with a wired handler.
    pub fn message_types(&self) -> impl Iterator<Item = MessageType> + '_ {
        self.handlers.keys().copied()
    }

    /// Handles one inbound command and acknowledges it exactly once.
    ///
    /// Handler failures are never returned to the caller; they only show up
    /// in the acknowledge call.
    pub async fn dispatch(
        &self,
        message: BoxedMessage,
        ack: Acknowledge,
        endpoint: &Endpoint,
        route: &str,
    ) {
        let message_type = message.message_type();
        let Some(entry) = self.handlers.get(&message_type) else {
            warn!(
                context = %self.context,
                message_type = %message_type,
                %endpoint,
                route,
                "Failed to handle command: no handler registered"
            );
            ack.nack(self.failed_retry_delay);
            return;
        };

        let span = info_span!(
            "handle_command",
            context = %self.context,
            message_type = %message_type,
            route
        );
        let mut operation = self
            .telemetry
            .start_operation(
                "Cqrs handle command",
                message_type.name(),
                Some(self.context.as_str()),
                Some(route),
            )
            .with_span(span.clone());

        let call = Arc::clone(&entry.binding.call);
        let parameters = entry.parameters.clone();
        let terminal: ChainTerminal =
            Box::new(move |message: BoxedMessage| -> BoxFuture<'static, ChainResult> {
                let scope = parameters.open_scope();
                Box::pin(async move {
                    let result = call(message, &scope).await;
                    drop(scope);
                    result
                })
            });

        let result = guarded(self.chain.run(
            message,
            entry.handler.clone(),
            Arc::clone(&self.publisher),
            terminal,
        ))
        .instrument(span)
        .await;

        let (delay, success) = match result {
            Ok(outcome) => outcome.to_ack(),
            Err(err) => {
                warn!(
                    context = %self.context,
                    message_type = %message_type,
                    handler = entry.handler.name(),
                    %endpoint,
                    error = %err,
                    "Failed to handle command"
                );
                self.telemetry.record_failure(&mut operation, &err);
                (self.failed_retry_delay, false)
            }
        };

        self.telemetry.finish_operation(operation);
        ack.call(delay, success);
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("context", &self.context)
            .field("commands", &self.handlers.len())
            .field("failed_retry_delay", &self.failed_retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{Param, ParameterProvider};
    use crate::middleware::{CommandInterceptionContext, Interceptor};
    use crate::publisher::DiscardingPublisher;
    use courier_core::{CommandHandlingResult, Destination, IN_MEMORY_TRANSPORT, SerializationFormat};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    type Calls = Arc<Mutex<Vec<(u64, bool)>>>;

    fn recording_ack() -> (Acknowledge, Calls) {
        let calls = Calls::default();
        let sink = Arc::clone(&calls);
        let ack = Acknowledge::new(move |delay, success| sink.lock().push((delay, success)));
        (ack, calls)
    }

    fn endpoint() -> Endpoint {
        Endpoint::new(
            IN_MEMORY_TRANSPORT,
            Destination::new("commands"),
            true,
            SerializationFormat::Json,
        )
    }

    fn dispatcher() -> CommandDispatcher {
        CommandDispatcher::standalone("orders", Arc::new(DiscardingPublisher))
    }

    #[derive(Default)]
    struct Recorder {
        handled: Mutex<Vec<String>>,
    }

    impl Recorder {
        async fn handle(self: Arc<Self>, command: String) -> Result<(), HandlerError> {
            if command == "fail" {
                return Err(HandlerError::failed("rejected"));
            }
            self.handled.lock().push(command);
            Ok(())
        }

        async fn retry(self: Arc<Self>, _command: u32) -> CommandHandlingResult {
            CommandHandlingResult::retry_after(500)
        }

        fn handle_sync(&self, command: bool) {
            if command {
                panic!("sync handler panicked");
            }
        }
    }

    struct Other;

    impl Other {
        async fn handle(self: Arc<Self>, _command: String) {}
    }

    #[tokio::test]
    async fn successful_commands_are_acknowledged() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(CommandHandlers::from_arc(Arc::clone(&recorder)).on(Recorder::handle))
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new("x".to_string()), ack, &endpoint(), "commands")
            .await;

        assert_eq!(*calls.lock(), vec![(0, true)]);
        assert_eq!(*recorder.handled.lock(), vec!["x"]);
    }

    #[tokio::test]
    async fn unhandled_commands_are_nacked_with_the_default_delay() {
        let dispatcher = dispatcher();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new("x".to_string()), ack, &endpoint(), "commands")
            .await;

        assert_eq!(*calls.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
    }

    #[tokio::test]
    async fn failing_handlers_are_nacked_with_the_failure_delay() {
        let mut dispatcher = CommandDispatcher::new(
            "orders",
            Arc::new(DiscardingPublisher),
            Arc::new(CommandInterceptorChain::new()),
            1_000,
        );
        dispatcher
            .wire(
                CommandHandlers::new(Recorder::default())
                    .on(Recorder::handle)
                    .on_sync(Recorder::handle_sync),
            )
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new("fail".to_string()), ack, &endpoint(), "commands")
            .await;
        let (ack, panicked) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new(true), ack, &endpoint(), "commands")
            .await;

        assert_eq!(*calls.lock(), vec![(1_000, false)]);
        assert_eq!(*panicked.lock(), vec![(1_000, false)]);
    }

    #[tokio::test]
    async fn retry_results_use_the_handler_delay() {
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(CommandHandlers::new(Recorder::default()).on(Recorder::retry))
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new(1u32), ack, &endpoint(), "commands")
            .await;

        assert_eq!(*calls.lock(), vec![(500, false)]);
    }

    #[test]
    fn duplicate_handlers_are_rejected_when_wiring() {
        let mut dispatcher = dispatcher();
        assert_ok!(
            dispatcher.wire(CommandHandlers::new(Recorder::default()).on(Recorder::handle))
        );

        let err = assert_err!(dispatcher.wire(CommandHandlers::new(Other).on(Other::handle)));

        assert!(matches!(err, ConfigurationError::DuplicateCommandHandler { .. }));
        assert!(dispatcher.handles(MessageType::of::<String>()));
    }

    #[test]
    fn duplicate_types_within_one_table_register_nothing() {
        let mut dispatcher = dispatcher();
        let result = dispatcher.wire(
            CommandHandlers::new(Recorder::default())
                .on(Recorder::retry)
                .on(Recorder::handle)
                .on(Recorder::handle),
        );

        assert!(result.is_err());
        assert!(!dispatcher.handles(MessageType::of::<u32>()));
    }

    struct Connection {
        released: Arc<AtomicUsize>,
    }

    impl Drop for Connection {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Repository;

    impl Repository {
        async fn save(
            self: Arc<Self>,
            _command: String,
            prefix: Param<&'static str>,
            connection: Option<Param<Connection>>,
        ) -> Result<(), String> {
            match (*prefix, connection) {
                ("orders", Some(_)) => Ok(()),
                ("orders", None) => Err("no connection".to_string()),
                _ => Err("wrong prefix".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn scoped_parameters_are_released_after_each_call() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                CommandHandlers::new(Repository)
                    .with_parameter(ParameterProvider::value("orders"))
                    .with_parameter(ParameterProvider::scoped(move || {
                        Some(Connection {
                            released: Arc::clone(&counter),
                        })
                    }))
                    .on(Repository::save),
            )
            .unwrap();

        for _ in 0..2 {
            let (ack, calls) = recording_ack();
            dispatcher
                .dispatch(BoxedMessage::new("x".to_string()), ack, &endpoint(), "commands")
                .await;
            assert_eq!(*calls.lock(), vec![(0, true)]);
        }

        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unavailable_optional_parameters_still_call_the_handler() {
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                CommandHandlers::new(Repository)
                    .with_parameter(ParameterProvider::value("orders"))
                    .with_parameter(ParameterProvider::scoped(|| None::<Connection>))
                    .on(Repository::save),
            )
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new("x".to_string()), ack, &endpoint(), "commands")
            .await;

        assert_eq!(*calls.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
    }

    struct Reject;

    #[async_trait::async_trait]
    impl Interceptor<dyn EventPublisher> for Reject {
        async fn intercept(&self, _context: CommandInterceptionContext) -> ChainResult {
            Ok(CommandHandlingResult::ok())
        }
    }

    #[tokio::test]
    async fn short_circuited_commands_open_no_parameter_scope() {
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        let mut dispatcher = CommandDispatcher::new(
            "orders",
            Arc::new(DiscardingPublisher),
            Arc::new(CommandInterceptorChain::new().with(Reject)),
            1_000,
        );
        dispatcher
            .wire(
                CommandHandlers::new(Repository)
                    .with_parameter(ParameterProvider::value("orders"))
                    .with_parameter(ParameterProvider::scoped(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                        None::<Connection>
                    }))
                    .on(Repository::save),
            )
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch(BoxedMessage::new("x".to_string()), ack, &endpoint(), "commands")
            .await;

        assert_eq!(*calls.lock(), vec![(0, true)]);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }
}
