//! Event dispatch.
//!
//! Each event fans out to every handler bound to its type for the sending
//! context. Handler outcomes are merged into a single acknowledge call.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use courier_core::{
    Acknowledge, BoxFuture, BoxedMessage, ConfigurationError, ConfigurationResult, MessageType,
    NoopTelemetry, TelemetryReporter,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use super::batch::{BatchManager, BatchSpec};
use super::{DEFAULT_FAILED_RETRY_DELAY_MS, PendingAck};
use crate::error::{ChainResult, HandlerResult};
use crate::handler::{
    ErasedCall, ErasedManyCall, EventBindingKind, EventBindings, HandlerRef, IntoEventBindings,
    ParameterSet, guarded,
};
use crate::middleware::{ChainTerminal, EventInterceptorChain};
use crate::publisher::CommandSender;

enum EventEntry {
    Single {
        handler: HandlerRef,
        parameters: ParameterSet,
        call: ErasedCall,
    },
    Many {
        handler: HandlerRef,
        parameters: ParameterSet,
        call: ErasedManyCall,
    },
    Batched(Arc<BatchManager>),
}

type Delivery = (BoxedMessage, Arc<PendingAck>);

/// Routes inbound events of one bounded context to every handler bound to
/// their type.
///
/// Bindings are keyed by the remote context the events come from. Each
/// message is acknowledged once, after all its handlers have run:
///
/// - no handler for the type: `(0, true)`
/// - every handler succeeded: `(0, true)`
/// - any handler failed: `(delay, false)`, where `delay` is the largest
///   delay reported by a failing handler
///
/// Single-message handlers run through the interceptor chain. Handlers
/// receiving several messages at once, including batched handlers, are
/// called directly.
pub struct EventDispatcher {
    context: String,
    bindings: HashMap<String, HashMap<MessageType, Vec<EventEntry>>>,
    batches: Vec<Arc<BatchManager>>,
    sender: Arc<dyn CommandSender>,
    chain: Arc<EventInterceptorChain>,
    failed_retry_delay: u64,
    telemetry: Arc<dyn TelemetryReporter>,
    shutdown: CancellationToken,
}

impl EventDispatcher {
    /// Creates a dispatcher for the local `context`.
    ///
    /// `sender` is handed to interceptors; `failed_retry_delay` is the
    /// redelivery delay in milliseconds for failed events.
    pub fn new(
        context: impl Into<String>,
        sender: Arc<dyn CommandSender>,
        chain: Arc<EventInterceptorChain>,
        failed_retry_delay: u64,
    ) -> Self {
        Self {
            context: context.into(),
            bindings: HashMap::new(),
            batches: Vec::new(),
            sender,
            chain,
            failed_retry_delay,
            telemetry: Arc::new(NoopTelemetry),
            shutdown: CancellationToken::new(),
        }
    }

    /// A dispatcher with an empty chain and the default failure delay.
    pub fn standalone(context: impl Into<String>, sender: Arc<dyn CommandSender>) -> Self {
        Self::new(
            context,
            sender,
            Arc::new(EventInterceptorChain::new()),
            DEFAULT_FAILED_RETRY_DELAY_MS,
        )
    }

    /// Reports every handler invocation to `telemetry`.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetryReporter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// The bounded context this dispatcher belongs to.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Redelivery delay for failed events, in milliseconds.
    pub fn failed_retry_delay(&self) -> u64 {
        self.failed_retry_delay
    }

    /// Registers a handler table for events coming from `remote_context`.
    ///
    /// Batched bindings need a batch size or a timeout.
    pub fn wire(
        &mut self,
        remote_context: &str,
        handlers: impl IntoEventBindings,
    ) -> ConfigurationResult<()> {
        let EventBindings {
            handler,
            parameters,
            bindings,
        } = handlers.into_event_bindings();

        for binding in &bindings {
            if let EventBindingKind::Batched { settings, .. } = &binding.kind {
                if !settings.is_enabled() {
                    return Err(ConfigurationError::invalid(format!(
                        "batched handler '{}' for {} needs a batch size or a timeout",
                        handler.name(),
                        binding.message_type
                    )));
                }
            }
        }

        debug!(
            context = %self.context,
            remote_context,
            handler = handler.name(),
            events = bindings.len(),
            "Wired event handler"
        );

        let by_type = self.bindings.entry(remote_context.to_string()).or_default();
        for binding in bindings {
            let entry = match binding.kind {
                EventBindingKind::Single(call) => EventEntry::Single {
                    handler: handler.clone(),
                    parameters: parameters.clone(),
                    call,
                },
                EventBindingKind::Many(call) => EventEntry::Many {
                    handler: handler.clone(),
                    parameters: parameters.clone(),
                    call,
                },
                EventBindingKind::Batched { flush, settings } => {
                    let manager = BatchManager::new(
                        BatchSpec {
                            context: self.context.clone(),
                            handler: handler.clone(),
                            message_type: binding.message_type,
                            settings,
                            flush,
                            parameters: parameters.clone(),
                            failed_retry_delay: self.failed_retry_delay,
                        },
                        self.shutdown.child_token(),
                    );
                    self.batches.push(Arc::clone(&manager));
                    EventEntry::Batched(manager)
                }
            };
            by_type.entry(binding.message_type).or_default().push(entry);
        }
        Ok(())
    }

    /// Returns `true` if a handler is wired for `message_type` from
    /// `remote_context`.
    pub fn handles(&self, remote_context: &str, message_type: MessageType) -> bool {
        self.bindings
            .get(remote_context)
            .is_some_and(|by_type| by_type.contains_key(&message_type))
    }

    /// Event types with a wired handler, per remote context.
    pub fn message_types(&self) -> impl Iterator<Item = (&str, MessageType)> + '_ {
        self.bindings.iter().flat_map(|(remote, by_type)| {
            by_type
                .keys()
                .map(move |message_type| (remote.as_str(), *message_type))
        })
    }

    /// Handles one inbound event from `remote_context`.
    pub async fn dispatch(&self, remote_context: &str, message: BoxedMessage, ack: Acknowledge) {
        self.dispatch_many(remote_context, vec![(message, ack)]).await;
    }

    /// Handles several inbound events from `remote_context`.
    ///
    /// Every message is acknowledged independently; a failing message does
    /// not stop the others from being handled.
    pub async fn dispatch_many(
        &self,
        remote_context: &str,
        deliveries: Vec<(BoxedMessage, Acknowledge)>,
    ) {
        let by_type = self.bindings.get(remote_context);
        let mut groups: Vec<(MessageType, &[EventEntry], Vec<Delivery>)> = Vec::new();

        for (message, ack) in deliveries {
            let message_type = message.message_type();
            let entries = by_type
                .and_then(|by_type| by_type.get(&message_type))
                .filter(|entries| !entries.is_empty());
            let Some(entries) = entries else {
                debug!(
                    context = %self.context,
                    remote_context,
                    message_type = %message_type,
                    "No handler for event, acknowledging"
                );
                ack.ack();
                continue;
            };

            let pending = PendingAck::new(ack, entries.len());
            match groups.iter_mut().find(|(t, _, _)| *t == message_type) {
                Some((_, _, messages)) => messages.push((message, pending)),
                None => groups.push((message_type, entries.as_slice(), vec![(message, pending)])),
            }
        }

        for (_, entries, messages) in groups {
            for entry in entries {
                match entry {
                    EventEntry::Single {
                        handler,
                        parameters,
                        call,
                    } => {
                        for (message, pending) in &messages {
                            let (delay, success) = self
                                .invoke_single(handler, parameters, call, message.clone())
                                .await;
                            pending.report(delay, success);
                        }
                    }
                    EventEntry::Many {
                        handler,
                        parameters,
                        call,
                    } => {
                        let batch = messages.iter().map(|(m, _)| m.clone()).collect();
                        let (delay, success) =
                            self.invoke_many(handler, parameters, call, batch).await;
                        for (_, pending) in &messages {
                            pending.report(delay, success);
                        }
                    }
                    EventEntry::Batched(manager) => {
                        for (message, pending) in &messages {
                            manager.enqueue(message.clone(), Arc::clone(pending)).await;
                        }
                    }
                }
            }
        }
    }

    /// Stops batch timers and asks for redelivery of buffered events.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for batch in &self.batches {
            batch.abandon();
        }
    }

    async fn invoke_single(
        &self,
        handler: &HandlerRef,
        parameters: &ParameterSet,
        call: &ErasedCall,
        message: BoxedMessage,
    ) -> (u64, bool) {
        let message_type = message.message_type();
        let call = Arc::clone(call);
        let parameters = parameters.clone();
        let terminal: ChainTerminal =
            Box::new(move |message: BoxedMessage| -> BoxFuture<'static, ChainResult> {
                let scope = parameters.open_scope();
                Box::pin(async move {
                    let result = call(message, &scope).await;
                    drop(scope);
                    result
                })
            });

        let future = guarded(self.chain.run(
            message,
            handler.clone(),
            Arc::clone(&self.sender),
            terminal,
        ));
        self.complete(handler, message_type, 1, future).await
    }

    async fn invoke_many(
        &self,
        handler: &HandlerRef,
        parameters: &ParameterSet,
        call: &ErasedManyCall,
        messages: Vec<BoxedMessage>,
    ) -> (u64, bool) {
        let Some(message_type) = messages.first().map(BoxedMessage::message_type) else {
            return (0, true);
        };
        let count = messages.len();
        let scope = parameters.open_scope();
        let future = call(messages, &scope);
        let outcome = self.complete(handler, message_type, count, future).await;
        drop(scope);
        outcome
    }

    async fn complete(
        &self,
        handler: &HandlerRef,
        message_type: MessageType,
        count: usize,
        future: BoxFuture<'static, HandlerResult>,
    ) -> (u64, bool) {
        let span = info_span!(
            "handle_event",
            context = %self.context,
            message_type = %message_type,
            handler = handler.name()
        );
        let mut operation = self
            .telemetry
            .start_operation(
                "Cqrs handle events",
                message_type.name(),
                Some(self.context.as_str()),
                Some(handler.name()),
            )
            .with_span(span.clone());

        let outcome = match future.instrument(span).await {
            Ok(outcome) => outcome.to_ack(),
            Err(err) => {
                warn!(
                    context = %self.context,
                    message_type = %message_type,
                    handler = handler.name(),
                    count,
                    error = %err,
                    "Failed to handle event"
                );
                self.telemetry.record_failure(&mut operation, &err);
                (self.failed_retry_delay, false)
            }
        };

        self.telemetry.finish_operation(operation);
        outcome
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("context", &self.context)
            .field("remote_contexts", &self.bindings.keys().collect::<Vec<_>>())
            .field("batches", &self.batches.len())
            .field("failed_retry_delay", &self.failed_retry_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handler::{Batch, BatchSettings, EventHandlers};
    use crate::publisher::DiscardingPublisher;
    use courier_core::CommandHandlingResult;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Calls = Arc<Mutex<Vec<(u64, bool)>>>;

    fn recording_ack() -> (Acknowledge, Calls) {
        let calls = Calls::default();
        let sink = Arc::clone(&calls);
        let ack = Acknowledge::new(move |delay, success| sink.lock().push((delay, success)));
        (ack, calls)
    }

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::standalone("projections", Arc::new(DiscardingPublisher))
    }

    #[derive(Default)]
    struct Recorder {
        handled: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Recorder {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        async fn handle(self: Arc<Self>, event: String) -> Result<(), HandlerError> {
            self.handled.lock().push(event.clone());
            if self.fail || event == "bad" {
                return Err(HandlerError::failed("rejected"));
            }
            Ok(())
        }

        async fn handle_all(self: Arc<Self>, events: Vec<String>) {
            self.handled.lock().push(events.join(","));
        }
    }

    #[tokio::test]
    async fn events_without_handlers_are_acknowledged() {
        let dispatcher = dispatcher();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch("orders", BoxedMessage::new("x".to_string()), ack)
            .await;

        assert_eq!(*calls.lock(), vec![(0, true)]);
    }

    #[tokio::test]
    async fn every_handler_runs_and_any_failure_nacks() {
        let ok = Arc::new(Recorder::default());
        let failing = Arc::new(Recorder::failing());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire("orders", EventHandlers::from_arc(Arc::clone(&ok)).on(Recorder::handle))
            .unwrap();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&failing)).on(Recorder::handle),
            )
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch("orders", BoxedMessage::new("test".to_string()), ack)
            .await;

        assert_eq!(*ok.handled.lock(), vec!["test"]);
        assert_eq!(*failing.handled.lock(), vec!["test"]);
        assert_eq!(*calls.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
    }

    #[tokio::test]
    async fn bindings_are_scoped_to_the_remote_context() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&recorder)).on(Recorder::handle),
            )
            .unwrap();

        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch("billing", BoxedMessage::new("x".to_string()), ack)
            .await;

        assert!(recorder.handled.lock().is_empty());
        assert_eq!(*calls.lock(), vec![(0, true)]);
        assert!(dispatcher.handles("orders", MessageType::of::<String>()));
        assert!(!dispatcher.handles("billing", MessageType::of::<String>()));
    }

    #[tokio::test]
    async fn messages_of_one_call_are_acknowledged_independently() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&recorder)).on(Recorder::handle),
            )
            .unwrap();

        let (bad_ack, bad) = recording_ack();
        let (good_ack, good) = recording_ack();
        dispatcher
            .dispatch_many(
                "orders",
                vec![
                    (BoxedMessage::new("bad".to_string()), bad_ack),
                    (BoxedMessage::new("good".to_string()), good_ack),
                ],
            )
            .await;

        assert_eq!(*recorder.handled.lock(), vec!["bad", "good"]);
        assert_eq!(*bad.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
        assert_eq!(*good.lock(), vec![(0, true)]);
    }

    #[tokio::test]
    async fn many_handlers_receive_the_whole_call() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&recorder)).on_many(Recorder::handle_all),
            )
            .unwrap();

        let (a_ack, a) = recording_ack();
        let (b_ack, b) = recording_ack();
        dispatcher
            .dispatch_many(
                "orders",
                vec![
                    (BoxedMessage::new("a".to_string()), a_ack),
                    (BoxedMessage::new("b".to_string()), b_ack),
                ],
            )
            .await;

        assert_eq!(*recorder.handled.lock(), vec!["a,b"]);
        assert_eq!(*a.lock(), vec![(0, true)]);
        assert_eq!(*b.lock(), vec![(0, true)]);
    }

    // ------------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------------

    struct BatchContext {
        id: usize,
    }

    #[derive(Default)]
    struct BatchRecorder {
        handled: Mutex<Vec<(String, usize)>>,
        calls: AtomicUsize,
        started: AtomicUsize,
        finished: AtomicUsize,
        fail: bool,
    }

    impl BatchRecorder {
        fn start(&self) -> BatchContext {
            BatchContext {
                id: self.started.fetch_add(1, Ordering::SeqCst),
            }
        }

        fn finish(&self, _context: Arc<BatchContext>) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        async fn handle(
            self: Arc<Self>,
            batch: Batch<String, BatchContext>,
        ) -> Result<CommandHandlingResult, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(HandlerError::failed("batch rejected"));
            }
            let mut handled = self.handled.lock();
            for (event, context) in batch.iter() {
                handled.push((event.clone(), context.id));
            }
            Ok(CommandHandlingResult::ok())
        }

        async fn retry(
            self: Arc<Self>,
            _batch: Batch<String, BatchContext>,
        ) -> CommandHandlingResult {
            CommandHandlingResult::retry_after(250)
        }
    }

    fn batched(
        recorder: &Arc<BatchRecorder>,
        settings: BatchSettings,
    ) -> crate::handler::BatchedEventHandlers<BatchRecorder, BatchContext> {
        EventHandlers::from_arc(Arc::clone(recorder)).batched(
            settings,
            BatchRecorder::start,
            BatchRecorder::finish,
        )
    }

    async fn send(dispatcher: &EventDispatcher, event: &str) -> Calls {
        let (ack, calls) = recording_ack();
        dispatcher
            .dispatch("orders", BoxedMessage::new(event.to_string()), ack)
            .await;
        calls
    }

    #[tokio::test]
    async fn batches_flush_when_full() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::size(3)).on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let first = send(&dispatcher, "a").await;
        let second = send(&dispatcher, "b").await;
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        assert!(first.lock().is_empty());
        assert_eq!(dispatcher.batches[0].buffered(), 2);

        let third = send(&dispatcher, "c").await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.handled.lock(),
            vec![
                ("a".to_string(), 0),
                ("b".to_string(), 0),
                ("c".to_string(), 0)
            ]
        );
        assert_eq!(recorder.started.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
        for calls in [first, second, third] {
            assert_eq!(*calls.lock(), vec![(0, true)]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn batches_flush_after_the_timeout() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::new(3, Duration::from_millis(1000)))
                    .on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let first = send(&dispatcher, "a").await;
        let second = send(&dispatcher, "b").await;
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *recorder.handled.lock(),
            vec![("a".to_string(), 0), ("b".to_string(), 0)]
        );
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
        assert_eq!(*first.lock(), vec![(0, true)]);
        assert_eq!(*second.lock(), vec![(0, true)]);
    }

    #[tokio::test(start_paused = true)]
    async fn a_full_batch_cancels_its_timer() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::new(2, Duration::from_millis(1000)))
                    .on_batch(BatchRecorder::handle),
            )
            .unwrap();

        send(&dispatcher, "a").await;
        send(&dispatcher, "b").await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        send(&dispatcher, "c").await;
        tokio::time::sleep(Duration::from_millis(600)).await;

        // The first timer lost to the size trigger; the second one has not
        // fired yet.
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(recorder.started.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_batches_nack_every_message() {
        let recorder = Arc::new(BatchRecorder {
            fail: true,
            ..BatchRecorder::default()
        });
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::size(2)).on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let first = send(&dispatcher, "a").await;
        let second = send(&dispatcher, "b").await;

        assert!(recorder.handled.lock().is_empty());
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
        assert_eq!(*first.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
        assert_eq!(*second.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
    }

    #[tokio::test]
    async fn batch_retry_results_use_the_handler_delay() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::size(1)).on_batch(BatchRecorder::retry),
            )
            .unwrap();

        let calls = send(&dispatcher, "a").await;

        assert_eq!(*calls.lock(), vec![(250, false)]);
    }

    #[tokio::test]
    async fn shutdown_returns_buffered_messages() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::size(10)).on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let calls = send(&dispatcher, "a").await;
        dispatcher.shutdown();
        let late = send(&dispatcher, "b").await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*calls.lock(), vec![(0, false)]);
        assert_eq!(*late.lock(), vec![(0, false)]);
    }

    fn panicking_start(_recorder: &BatchRecorder) -> BatchContext {
        panic!("batch context unavailable");
    }

    fn panicking_finish(_recorder: &BatchRecorder, _context: Arc<BatchContext>) {
        panic!("batch context not released");
    }

    #[tokio::test]
    async fn panicking_batch_start_nacks_the_batch() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&recorder))
                    .batched(BatchSettings::size(2), panicking_start, BatchRecorder::finish)
                    .on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let first = send(&dispatcher, "a").await;
        let second = send(&dispatcher, "b").await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(*first.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
        assert_eq!(*second.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_batch_start_on_the_timer_nacks_the_batch() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&recorder))
                    .batched(
                        BatchSettings::new(10, Duration::from_millis(100)),
                        panicking_start,
                        BatchRecorder::finish,
                    )
                    .on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let calls = send(&dispatcher, "a").await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(*calls.lock(), vec![(DEFAULT_FAILED_RETRY_DELAY_MS, false)]);
        assert_eq!(dispatcher.batches[0].buffered(), 0);
    }

    #[tokio::test]
    async fn panicking_batch_finish_keeps_the_acknowledgements() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                EventHandlers::from_arc(Arc::clone(&recorder))
                    .batched(BatchSettings::size(1), BatchRecorder::start, panicking_finish)
                    .on_batch(BatchRecorder::handle),
            )
            .unwrap();

        let first = send(&dispatcher, "a").await;
        let second = send(&dispatcher, "b").await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*first.lock(), vec![(0, true)]);
        assert_eq!(*second.lock(), vec![(0, true)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_dispatches_flush_every_message_once() {
        const EVENTS: usize = 2000;

        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();
        dispatcher
            .wire(
                "orders",
                batched(&recorder, BatchSettings::new(7, Duration::from_millis(5)))
                    .on_batch(BatchRecorder::handle),
            )
            .unwrap();
        let dispatcher = Arc::new(dispatcher);

        let tasks: Vec<_> = (0..EVENTS)
            .map(|i| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    let (ack, calls) = recording_ack();
                    dispatcher
                        .dispatch("orders", BoxedMessage::new(i.to_string()), ack)
                        .await;
                    calls
                })
            })
            .collect();
        let mut acks = Vec::with_capacity(EVENTS);
        for task in tasks {
            acks.push(task.await.unwrap());
        }

        // Leftovers go out on the timer.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while recorder.handled.lock().len() < EVENTS && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handled = recorder.handled.lock();
        assert_eq!(handled.len(), EVENTS);
        let distinct: std::collections::HashSet<&String> =
            handled.iter().map(|(event, _)| event).collect();
        assert_eq!(distinct.len(), EVENTS);
        for calls in &acks {
            assert_eq!(*calls.lock(), vec![(0, true)]);
        }
        assert_eq!(
            recorder.started.load(Ordering::SeqCst),
            recorder.finished.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn batched_bindings_need_a_trigger() {
        let recorder = Arc::new(BatchRecorder::default());
        let mut dispatcher = dispatcher();

        let result = dispatcher.wire(
            "orders",
            batched(&recorder, BatchSettings::size(0)).on_batch(BatchRecorder::handle),
        );

        assert!(matches!(result, Err(ConfigurationError::InvalidRegistration(_))));
    }
}
