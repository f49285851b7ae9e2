//! Per-binding event buffers flushed on size or timeout.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use courier_core::{BoxedMessage, MessageType};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::PendingAck;
use crate::error::HandlerError;
use crate::handler::{
    BatchFinish, BatchFlush, BatchSettings, HandlerRef, ParameterSet, panic_message,
};

type Buffered = (BoxedMessage, Arc<PendingAck>);

/// Buffer of one batched binding.
///
/// The buffer is flushed by whichever comes first: the enqueue that fills it
/// or the timer armed by its first message. Both paths take the buffer under
/// the lock, and the generation counter makes a timer that lost the race a
/// no-op, so every batch is flushed exactly once.
pub(crate) struct BatchManager {
    context: String,
    handler: HandlerRef,
    message_type: MessageType,
    settings: BatchSettings,
    flush: BatchFlush,
    parameters: ParameterSet,
    failed_retry_delay: u64,
    shutdown: CancellationToken,
    state: Mutex<BatchState>,
}

#[derive(Default)]
struct BatchState {
    pending: Vec<Buffered>,
    generation: u64,
}

impl BatchState {
    fn take(&mut self) -> Vec<Buffered> {
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.pending)
    }
}

pub(crate) struct BatchSpec {
    pub(crate) context: String,
    pub(crate) handler: HandlerRef,
    pub(crate) message_type: MessageType,
    pub(crate) settings: BatchSettings,
    pub(crate) flush: BatchFlush,
    pub(crate) parameters: ParameterSet,
    pub(crate) failed_retry_delay: u64,
}

impl BatchManager {
    pub(crate) fn new(spec: BatchSpec, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            context: spec.context,
            handler: spec.handler,
            message_type: spec.message_type,
            settings: spec.settings,
            flush: spec.flush,
            parameters: spec.parameters,
            failed_retry_delay: spec.failed_retry_delay,
            shutdown,
            state: Mutex::new(BatchState::default()),
        })
    }

    /// Buffers one message, flushing in place if the batch is full.
    pub(crate) async fn enqueue(self: &Arc<Self>, message: BoxedMessage, ack: Arc<PendingAck>) {
        if self.shutdown.is_cancelled() {
            ack.report(0, false);
            return;
        }

        let ready = {
            let mut state = self.state.lock();
            state.pending.push((message, ack));
            if self.settings.size > 0 && state.pending.len() >= self.settings.size {
                Some(state.take())
            } else {
                if state.pending.len() == 1 && !self.settings.timeout.is_zero() {
                    self.schedule_flush(state.generation);
                }
                None
            }
        };

        if let Some(batch) = ready {
            self.flush_batch(batch).await;
        }
    }

    fn schedule_flush(self: &Arc<Self>, generation: u64) {
        let manager = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        let timeout = self.settings.timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    let batch = {
                        let mut state = manager.state.lock();
                        if state.generation == generation && !state.pending.is_empty() {
                            Some(state.take())
                        } else {
                            None
                        }
                    };
                    if let Some(batch) = batch {
                        manager.flush_batch(batch).await;
                    }
                }
            }
        });
    }

    async fn flush_batch(&self, batch: Vec<Buffered>) {
        let (messages, acks): (Vec<_>, Vec<_>) = batch.into_iter().unzip();
        debug!(
            context = %self.context,
            handler = self.handler.name(),
            message_type = %self.message_type,
            size = messages.len(),
            "Flushing event batch"
        );

        // The start callback runs while the flush future is built.
        let scope = self.parameters.open_scope();
        let flushed = match catch_unwind(AssertUnwindSafe(|| (self.flush)(messages, &scope))) {
            Ok(invocation) => AssertUnwindSafe(invocation).catch_unwind().await,
            Err(panic) => Err(panic),
        };
        drop(scope);
        let (result, finish) = flushed.unwrap_or_else(|panic| {
            let finish: BatchFinish = Box::new(|| {});
            (Err(HandlerError::Panicked(panic_message(panic.as_ref()))), finish)
        });

        let (delay, success) = match result {
            Ok(outcome) => outcome.to_ack(),
            Err(err) => {
                warn!(
                    context = %self.context,
                    handler = self.handler.name(),
                    message_type = %self.message_type,
                    size = acks.len(),
                    error = %err,
                    "Failed to handle event batch"
                );
                (self.failed_retry_delay, false)
            }
        };

        for ack in acks {
            ack.report(delay, success);
        }
        if let Err(panic) = catch_unwind(AssertUnwindSafe(finish)) {
            warn!(
                context = %self.context,
                handler = self.handler.name(),
                message_type = %self.message_type,
                error = %panic_message(panic.as_ref()),
                "Batch finish callback panicked"
            );
        }
    }

    /// Drops the buffered messages, asking for immediate redelivery.
    pub(crate) fn abandon(&self) {
        let batch = self.state.lock().take();
        if !batch.is_empty() {
            debug!(
                context = %self.context,
                handler = self.handler.name(),
                size = batch.len(),
                "Abandoning buffered events"
            );
        }
        for (_, ack) in batch {
            ack.report(0, false);
        }
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> usize {
        self.state.lock().pending.len()
    }
}
