//! Handler tables: one handler object plus its per-message-type bindings.

use std::any::type_name;
use std::fmt;
use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use courier_core::{BoxFuture, BoxedMessage, Message, MessageType};

use super::function::{HandlerFn, SyncHandlerFn};
use super::params::{ParameterProvider, ParameterScope, ParameterSet};
use super::HandlerRef;
use crate::error::{HandlerError, HandlerResult};

pub(crate) type ErasedCall =
    Arc<dyn Fn(BoxedMessage, &ParameterScope) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

pub(crate) type ErasedManyCall = Arc<
    dyn Fn(Vec<BoxedMessage>, &ParameterScope) -> BoxFuture<'static, HandlerResult> + Send + Sync,
>;

/// Runs the batch-finish callback.
pub(crate) type BatchFinish = Box<dyn FnOnce() + Send>;

/// Starts a batch context, invokes the batch handler and hands back the
/// finish callback to run once every message is acknowledged.
pub(crate) type BatchFlush = Arc<
    dyn Fn(Vec<BoxedMessage>, &ParameterScope) -> BoxFuture<'static, (HandlerResult, BatchFinish)>
        + Send
        + Sync,
>;

fn mismatch<M: Message>(message: &BoxedMessage) -> HandlerError {
    HandlerError::TypeMismatch {
        expected: type_name::<M>(),
        actual: message.message_type().full_name(),
    }
}

fn downcast_all<M: Message + Clone>(messages: &[BoxedMessage]) -> Result<Vec<M>, HandlerError> {
    messages
        .iter()
        .map(|message| message.downcast::<M>().ok_or_else(|| mismatch::<M>(message)))
        .collect()
}

fn erase_single<H, M>(
    handler: Arc<H>,
    invoke: impl Fn(Arc<H>, M, &ParameterScope) -> BoxFuture<'static, HandlerResult>
    + Send
    + Sync
    + 'static,
) -> ErasedCall
where
    H: Send + Sync + 'static,
    M: Message + Clone,
{
    Arc::new(
        move |message: BoxedMessage,
              scope: &ParameterScope|
              -> BoxFuture<'static, HandlerResult> {
            match message.downcast::<M>() {
                Some(typed) => invoke(Arc::clone(&handler), typed, scope),
                None => Box::pin(ready(Err(mismatch::<M>(&message)))),
            }
        },
    )
}

// ============================================================================
// Command Handlers
// ============================================================================

pub(crate) struct CommandBinding {
    pub(crate) message_type: MessageType,
    pub(crate) call: ErasedCall,
}

/// Command handlers of one handler object.
///
/// Each command type may be bound once per dispatcher.
pub struct CommandHandlers<H> {
    handler: Arc<H>,
    parameters: Vec<ParameterProvider>,
    bindings: Vec<CommandBinding>,
}

impl<H: Send + Sync + 'static> CommandHandlers<H> {
    /// Starts a table for `handler`.
    pub fn new(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    /// Starts a table for an already shared handler object.
    pub fn from_arc(handler: Arc<H>) -> Self {
        Self {
            handler,
            parameters: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Adds an extra parameter source.
    pub fn with_parameter(mut self, provider: ParameterProvider) -> Self {
        self.parameters.push(provider);
        self
    }

    /// Binds an async handler for commands of type `M`.
    pub fn on<M, Args>(mut self, function: impl HandlerFn<H, M, Args>) -> Self
    where
        M: Message + Clone,
    {
        let call = erase_single(Arc::clone(&self.handler), move |handler, message, scope| {
            function.call(handler, message, scope)
        });
        self.bindings.push(CommandBinding {
            message_type: MessageType::of::<M>(),
            call,
        });
        self
    }

    /// Binds a synchronous handler for commands of type `M`.
    pub fn on_sync<M, Args>(mut self, function: impl SyncHandlerFn<H, M, Args>) -> Self
    where
        M: Message + Clone,
    {
        let call = erase_single(Arc::clone(&self.handler), move |handler, message, scope| {
            function.call(handler, message, scope)
        });
        self.bindings.push(CommandBinding {
            message_type: MessageType::of::<M>(),
            call,
        });
        self
    }

    /// Command types bound so far.
    pub fn message_types(&self) -> Vec<MessageType> {
        self.bindings.iter().map(|b| b.message_type).collect()
    }

    pub(crate) fn into_parts(self) -> (HandlerRef, ParameterSet, Vec<CommandBinding>) {
        (
            HandlerRef::new(self.handler),
            ParameterSet::new(self.parameters),
            self.bindings,
        )
    }
}

impl<H> fmt::Debug for CommandHandlers<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandHandlers")
            .field("handler", &type_name::<H>())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

// ============================================================================
// Event Handlers
// ============================================================================

/// Size and time limits of a batched handler.
///
/// A batch is flushed when it holds `size` messages or when `timeout` has
/// elapsed since its first message, whichever comes first. A zero value
/// disables that trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    /// Flush once this many messages are buffered.
    pub size: usize,
    /// Flush this long after the first buffered message.
    pub timeout: Duration,
}

impl BatchSettings {
    /// Creates batch settings.
    pub fn new(size: usize, timeout: Duration) -> Self {
        Self { size, timeout }
    }

    /// Size-triggered flushing only.
    pub fn size(size: usize) -> Self {
        Self::new(size, Duration::ZERO)
    }

    /// Returns `true` if either trigger is enabled.
    pub fn is_enabled(&self) -> bool {
        self.size > 0 || !self.timeout.is_zero()
    }
}

pub(crate) enum EventBindingKind {
    Single(ErasedCall),
    Many(ErasedManyCall),
    Batched {
        flush: BatchFlush,
        settings: BatchSettings,
    },
}

pub(crate) struct EventBinding {
    pub(crate) message_type: MessageType,
    pub(crate) kind: EventBindingKind,
}

/// Type-erased event bindings of one handler object, ready to be wired.
pub struct EventBindings {
    pub(crate) handler: HandlerRef,
    pub(crate) parameters: ParameterSet,
    pub(crate) bindings: Vec<EventBinding>,
}

impl EventBindings {
    /// The handler object.
    pub fn handler(&self) -> &HandlerRef {
        &self.handler
    }

    /// Event types bound by this table.
    pub fn message_types(&self) -> Vec<MessageType> {
        self.bindings.iter().map(|b| b.message_type).collect()
    }
}

impl fmt::Debug for EventBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBindings")
            .field("handler", &self.handler)
            .field("message_types", &self.message_types())
            .finish()
    }
}

/// Conversion into wireable event bindings.
pub trait IntoEventBindings {
    /// Erases the handler table.
    fn into_event_bindings(self) -> EventBindings;
}

impl IntoEventBindings for EventBindings {
    fn into_event_bindings(self) -> EventBindings {
        self
    }
}

/// Event handlers of one handler object.
///
/// Several handler objects may bind the same event type; each of them is
/// invoked for every delivery.
pub struct EventHandlers<H> {
    handler: Arc<H>,
    parameters: Vec<ParameterProvider>,
    bindings: Vec<EventBinding>,
}

impl<H: Send + Sync + 'static> EventHandlers<H> {
    /// Starts a table for `handler`.
    pub fn new(handler: H) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    /// Starts a table for an already shared handler object.
    pub fn from_arc(handler: Arc<H>) -> Self {
        Self {
            handler,
            parameters: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Adds an extra parameter source.
    pub fn with_parameter(mut self, provider: ParameterProvider) -> Self {
        self.parameters.push(provider);
        self
    }

    /// Binds an async handler for events of type `M`.
    pub fn on<M, Args>(mut self, function: impl HandlerFn<H, M, Args>) -> Self
    where
        M: Message + Clone,
    {
        let call = erase_single(Arc::clone(&self.handler), move |handler, message, scope| {
            function.call(handler, message, scope)
        });
        self.push(MessageType::of::<M>(), EventBindingKind::Single(call));
        self
    }

    /// Binds a synchronous handler for events of type `M`.
    pub fn on_sync<M, Args>(mut self, function: impl SyncHandlerFn<H, M, Args>) -> Self
    where
        M: Message + Clone,
    {
        let call = erase_single(Arc::clone(&self.handler), move |handler, message, scope| {
            function.call(handler, message, scope)
        });
        self.push(MessageType::of::<M>(), EventBindingKind::Single(call));
        self
    }

    /// Binds a handler receiving every `M` of one multi-message delivery at
    /// once.
    ///
    /// The messages succeed or fail together. The call bypasses the event
    /// interceptor chain, whose context carries a single message, so
    /// interceptors never see these deliveries.
    pub fn on_many<M, Args>(mut self, function: impl HandlerFn<H, Vec<M>, Args>) -> Self
    where
        M: Message + Clone,
    {
        let handler = Arc::clone(&self.handler);
        let call: ErasedManyCall = Arc::new(
            move |messages: Vec<BoxedMessage>,
                  scope: &ParameterScope|
                  -> BoxFuture<'static, HandlerResult> {
                match downcast_all::<M>(&messages) {
                    Ok(typed) => function.call(Arc::clone(&handler), typed, scope),
                    Err(err) => Box::pin(ready(Err(err))),
                }
            },
        );
        self.push(MessageType::of::<M>(), EventBindingKind::Many(call));
        self
    }

    /// Switches to batched handling.
    ///
    /// `on_start` creates the context shared by one batch; `on_finish` is
    /// called with it after the batch has been acknowledged. A panic in
    /// `on_start` fails the batch. Batched handlers bypass the event
    /// interceptor chain.
    pub fn batched<C, S, E>(
        self,
        settings: BatchSettings,
        on_start: S,
        on_finish: E,
    ) -> BatchedEventHandlers<H, C>
    where
        C: Send + Sync + 'static,
        S: Fn(&H) -> C + Send + Sync + 'static,
        E: Fn(&H, Arc<C>) + Send + Sync + 'static,
    {
        BatchedEventHandlers {
            table: self,
            settings,
            on_start: Arc::new(on_start),
            on_finish: Arc::new(on_finish),
        }
    }

    /// Event types bound so far.
    pub fn message_types(&self) -> Vec<MessageType> {
        self.bindings.iter().map(|b| b.message_type).collect()
    }

    fn push(&mut self, message_type: MessageType, kind: EventBindingKind) {
        self.bindings.push(EventBinding { message_type, kind });
    }
}

impl<H: Send + Sync + 'static> IntoEventBindings for EventHandlers<H> {
    fn into_event_bindings(self) -> EventBindings {
        EventBindings {
            handler: HandlerRef::new(self.handler),
            parameters: ParameterSet::new(self.parameters),
            bindings: self.bindings,
        }
    }
}

impl<H> fmt::Debug for EventHandlers<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handler", &type_name::<H>())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

// ============================================================================
// Batched Event Handlers
// ============================================================================

/// Messages of one flushed batch together with their batch context.
pub struct Batch<M, C = ()> {
    messages: Vec<M>,
    context: Arc<C>,
}

impl<M, C> Batch<M, C> {
    /// Builds a batch.
    pub fn new(messages: Vec<M>, context: Arc<C>) -> Self {
        Self { messages, context }
    }

    /// The buffered messages, in arrival order.
    pub fn messages(&self) -> &[M] {
        &self.messages
    }

    /// The context created when the batch was flushed.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the batch holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Iterates `(message, context)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&M, &C)> {
        self.messages.iter().map(|m| (m, self.context.as_ref()))
    }
}

impl<M, C> IntoIterator for Batch<M, C> {
    type Item = (M, Arc<C>);
    type IntoIter = std::vec::IntoIter<(M, Arc<C>)>;

    fn into_iter(self) -> Self::IntoIter {
        let context = self.context;
        self.messages
            .into_iter()
            .map(|m| (m, Arc::clone(&context)))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl<M: fmt::Debug, C> fmt::Debug for Batch<M, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

/// Event handlers of one handler object whose deliveries are buffered and
/// handled in batches.
///
/// Every bound type gets its own buffer.
pub struct BatchedEventHandlers<H, C> {
    table: EventHandlers<H>,
    settings: BatchSettings,
    on_start: Arc<dyn Fn(&H) -> C + Send + Sync>,
    on_finish: Arc<dyn Fn(&H, Arc<C>) + Send + Sync>,
}

impl<H, C> BatchedEventHandlers<H, C>
where
    H: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// Adds an extra parameter source.
    pub fn with_parameter(mut self, provider: ParameterProvider) -> Self {
        self.table.parameters.push(provider);
        self
    }

    /// Binds a batch handler for events of type `M`.
    pub fn on_batch<M, Args>(mut self, function: impl HandlerFn<H, Batch<M, C>, Args>) -> Self
    where
        M: Message + Clone,
    {
        let handler = Arc::clone(&self.table.handler);
        let on_start = Arc::clone(&self.on_start);
        let on_finish = Arc::clone(&self.on_finish);

        let flush: BatchFlush = Arc::new(
            move |messages: Vec<BoxedMessage>,
                  scope: &ParameterScope|
                  -> BoxFuture<'static, (HandlerResult, BatchFinish)> {
                let typed = match downcast_all::<M>(&messages) {
                    Ok(typed) => typed,
                    Err(err) => {
                        let finish: BatchFinish = Box::new(|| {});
                        return Box::pin(ready((Err(err), finish)));
                    }
                };

                let context = Arc::new(on_start(&*handler));
                let invocation = function.call(
                    Arc::clone(&handler),
                    Batch::new(typed, Arc::clone(&context)),
                    scope,
                );
                let handler = Arc::clone(&handler);
                let on_finish = Arc::clone(&on_finish);

                Box::pin(async move {
                    let result = invocation.await;
                    let finish: BatchFinish = Box::new(move || on_finish(&*handler, context));
                    (result, finish)
                })
            },
        );

        let settings = self.settings;
        self.table.push(
            MessageType::of::<M>(),
            EventBindingKind::Batched { flush, settings },
        );
        self
    }

    /// Batch limits applied to every bound type.
    pub fn settings(&self) -> BatchSettings {
        self.settings
    }
}

impl<H, C> IntoEventBindings for BatchedEventHandlers<H, C>
where
    H: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    fn into_event_bindings(self) -> EventBindings {
        self.table.into_event_bindings()
    }
}

impl<H, C> fmt::Debug for BatchedEventHandlers<H, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchedEventHandlers")
            .field("handler", &type_name::<H>())
            .field("settings", &self.settings)
            .finish()
    }
}
