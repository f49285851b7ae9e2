//! Processing groups: priority queues drained by a fixed pool of workers.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use courier_core::{
    Acknowledge, BoxedMessage, Headers, MessageCallback, MessageType, ProcessingOptions,
    TransportError, TransportResult, UnknownTypeCallback,
};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

// ============================================================================
// Subscriber
// ============================================================================

/// One subscription: a callback bound to a destination and a priority lane.
pub(crate) struct Subscriber {
    pub(crate) id: u64,
    pub(crate) destination: String,
    pub(crate) priority: u32,
    pub(crate) callback: MessageCallback,
    pub(crate) unknown_type_callback: UnknownTypeCallback,
    pub(crate) accepted: HashSet<MessageType>,
    pub(crate) group: Arc<ProcessingGroup>,
    pub(crate) active: AtomicBool,
}

impl Subscriber {
    /// An empty accepted set accepts everything.
    fn accepts(&self, message_type: MessageType) -> bool {
        self.accepted.is_empty() || self.accepted.contains(&message_type)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, AtomicOrdering::Release);
    }
}

/// A message on its way to one subscriber.
pub(crate) struct Delivery {
    pub(crate) subscriber: Arc<Subscriber>,
    pub(crate) message: BoxedMessage,
    pub(crate) headers: Headers,
    pub(crate) attempt: u32,
}

struct Queued {
    priority: u32,
    sequence: u64,
    delivery: Delivery,
    _permit: OwnedSemaphorePermit,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // `BinaryHeap` is a max-heap: the lowest priority number, then the
    // oldest message, must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

// ============================================================================
// Processing Group
// ============================================================================

/// A bounded priority queue with `thread_count` worker tasks.
pub(crate) struct ProcessingGroup {
    name: String,
    queue: Mutex<BinaryHeap<Queued>>,
    capacity: Arc<Semaphore>,
    notify: Notify,
    sequence: AtomicU64,
    shutdown: CancellationToken,
}

impl ProcessingGroup {
    /// Creates the group and spawns its workers on `handle`.
    pub(crate) fn start(
        name: &str,
        options: ProcessingOptions,
        shutdown: CancellationToken,
        handle: &Handle,
    ) -> Arc<Self> {
        let group = Arc::new(Self {
            name: name.to_string(),
            queue: Mutex::new(BinaryHeap::new()),
            capacity: Arc::new(Semaphore::new(options.queue_capacity.max(1))),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            shutdown,
        });

        let workers = options.thread_count.max(1);
        for worker in 0..workers {
            handle.spawn(Arc::clone(&group).run_worker(worker));
        }
        debug!(
            group = %group.name,
            workers,
            queue_capacity = options.queue_capacity,
            "Started processing group"
        );

        group
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Queues a delivery, waiting while the group is at capacity.
    pub(crate) async fn enqueue(&self, delivery: Delivery) -> TransportResult<()> {
        let permit = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(TransportError::Closed),
            permit = Arc::clone(&self.capacity).acquire_owned() => {
                permit.map_err(|_| TransportError::Closed)?
            }
        };

        let queued = Queued {
            priority: delivery.subscriber.priority,
            sequence: self.sequence.fetch_add(1, AtomicOrdering::Relaxed),
            delivery,
            _permit: permit,
        };
        self.queue.lock().push(queued);
        self.notify.notify_one();
        Ok(())
    }

    async fn next(&self) -> Queued {
        loop {
            let notified = self.notify.notified();
            if let Some(queued) = self.queue.lock().pop() {
                return queued;
            }
            notified.await;
        }
    }

    async fn run_worker(self: Arc<Self>, worker: usize) {
        trace!(group = %self.name, worker, "Processing worker started");
        loop {
            let queued = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                queued = self.next() => queued,
            };
            self.process(queued).await;
        }
        trace!(group = %self.name, worker, "Processing worker stopped");
    }

    async fn process(self: &Arc<Self>, queued: Queued) {
        let Delivery {
            subscriber,
            message,
            headers,
            attempt,
        } = queued.delivery;

        if !subscriber.is_active() {
            trace!(
                group = %self.name,
                destination = %subscriber.destination,
                "Dropping delivery for a closed subscription"
            );
            return;
        }

        let message_type = message.message_type();
        let ack = self.acknowledge(Delivery {
            subscriber: Arc::clone(&subscriber),
            message: message.clone(),
            headers: headers.clone(),
            attempt: attempt + 1,
        });

        if !subscriber.accepts(message_type) {
            (subscriber.unknown_type_callback)(message_type, ack);
            return;
        }

        let handled = AssertUnwindSafe((subscriber.callback)(message, ack, headers))
            .catch_unwind()
            .await;
        if handled.is_err() {
            error!(
                group = %self.name,
                destination = %subscriber.destination,
                message_type = %message_type,
                "Delivery callback panicked"
            );
        }
    }

    /// Builds the acknowledge for one delivery; a nack queues `redelivery`
    /// again after the requested delay.
    fn acknowledge(self: &Arc<Self>, redelivery: Delivery) -> Acknowledge {
        let group = Arc::clone(self);
        Acknowledge::new(move |retry_delay_ms, success| {
            if !success {
                group.schedule_redelivery(redelivery, Duration::from_millis(retry_delay_ms));
            }
        })
    }

    fn schedule_redelivery(self: Arc<Self>, delivery: Delivery, delay: Duration) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                group = %self.name,
                destination = %delivery.subscriber.destination,
                "No runtime to schedule a redelivery on, dropping message"
            );
            return;
        };

        debug!(
            group = %self.name,
            destination = %delivery.subscriber.destination,
            message_type = %delivery.message.message_type(),
            attempt = delivery.attempt,
            delay_ms = delay.as_millis() as u64,
            "Scheduling redelivery"
        );

        let shutdown = self.shutdown.clone();
        handle.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = self.enqueue(delivery).await {
                        debug!(group = %self.name, error = %err, "Redelivery dropped");
                    }
                }
            }
        });
    }
}
