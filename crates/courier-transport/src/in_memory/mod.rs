//! In-process messaging engine.
//!
//! Destinations are plain names. Every subscriber of a destination receives
//! its own copy of each message sent to it; deliveries are queued on the
//! subscriber's processing group and handed to its callback by the group's
//! workers, lowest priority number first. A negative acknowledge queues the
//! message again after the requested delay.

mod group;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use courier_core::{
    BoxedMessage, Endpoint, EndpointUsage, Headers, IN_MEMORY_TRANSPORT, MessagingEngine,
    ProcessingOptions, SubscribeRequest, Subscription, TransportError, TransportResult,
};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use group::{Delivery, ProcessingGroup, Subscriber};

/// Messaging engine that moves messages between tasks of one process.
///
/// Cloning is cheap; clones share the same destinations.
#[derive(Clone)]
pub struct InMemoryMessagingEngine {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: RwLock<HashMap<String, Vec<Arc<Subscriber>>>>,
    declared: RwLock<HashSet<String>>,
    group_options: Mutex<HashMap<String, ProcessingOptions>>,
    groups: Mutex<HashMap<String, Arc<ProcessingGroup>>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl InMemoryMessagingEngine {
    /// Creates an engine with no destinations.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                declared: RwLock::new(HashSet::new()),
                group_options: Mutex::new(HashMap::new()),
                groups: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Declares a destination so that verification succeeds without
    /// creating it.
    pub fn declare(&self, destination: impl Into<String>) {
        self.inner.declared.write().insert(destination.into());
    }

    /// Number of active subscriptions on `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .get(destination)
            .map_or(0, Vec::len)
    }

    /// Stops every worker and drops all subscriptions.
    pub fn shutdown(&self) {
        info!("Shutting down in-memory messaging engine");
        self.inner.shutdown.cancel();
        for subscriber in self.inner.subscribers.write().drain().flat_map(|(_, s)| s) {
            subscriber.deactivate();
        }
        self.inner.groups.lock().clear();
    }

    fn check_transport(endpoint: &Endpoint) -> TransportResult<()> {
        if endpoint.transport_id == IN_MEMORY_TRANSPORT {
            Ok(())
        } else {
            Err(TransportError::UnknownTransport(endpoint.transport_id.clone()))
        }
    }

    fn group(&self, name: &str, handle: &Handle) -> Arc<ProcessingGroup> {
        let mut groups = self.inner.groups.lock();
        if let Some(group) = groups.get(name) {
            return Arc::clone(group);
        }

        let options = self
            .inner
            .group_options
            .lock()
            .get(name)
            .copied()
            .unwrap_or_default();
        let group = ProcessingGroup::start(
            name,
            options,
            self.inner.shutdown.child_token(),
            handle,
        );
        groups.insert(name.to_string(), Arc::clone(&group));
        group
    }
}

impl Default for InMemoryMessagingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryMessagingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMessagingEngine")
            .field("destinations", &self.inner.subscribers.read().len())
            .field("groups", &self.inner.groups.lock().len())
            .finish()
    }
}

#[async_trait]
impl MessagingEngine for InMemoryMessagingEngine {
    async fn send(
        &self,
        message: BoxedMessage,
        endpoint: &Endpoint,
        headers: Headers,
    ) -> TransportResult<()> {
        Self::check_transport(endpoint)?;
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let destination = &endpoint.destination.publish;
        let subscribers: Vec<Arc<Subscriber>> = self
            .inner
            .subscribers
            .read()
            .get(destination)
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            debug!(
                destination = %destination,
                message_type = %message.message_type(),
                "No subscribers, dropping message"
            );
            return Ok(());
        }

        for subscriber in subscribers.into_iter().filter(|s| s.is_active()) {
            let group = Arc::clone(&subscriber.group);
            group
                .enqueue(Delivery {
                    subscriber,
                    message: message.clone(),
                    headers: headers.clone(),
                    attempt: 0,
                })
                .await?;
        }
        Ok(())
    }

    fn subscribe(&self, request: SubscribeRequest) -> TransportResult<Subscription> {
        Self::check_transport(&request.endpoint)?;

        let destination = request.endpoint.destination.subscribe.clone();
        if destination.is_empty() {
            return Err(TransportError::SubscribeFailed {
                destination: request.endpoint.destination.to_string(),
                reason: "endpoint has no subscribe-side destination".to_string(),
            });
        }
        let handle = Handle::try_current().map_err(|err| TransportError::SubscribeFailed {
            destination: destination.clone(),
            reason: err.to_string(),
        })?;
        if self.inner.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let group = self.group(&request.processing_group, &handle);
        let subscriber = Arc::new(Subscriber {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            destination: destination.clone(),
            priority: request.priority,
            callback: request.callback,
            unknown_type_callback: request.unknown_type_callback,
            accepted: request.accepted_types.into_iter().collect(),
            group,
            active: AtomicBool::new(true),
        });

        debug!(
            destination = %destination,
            group = subscriber.group.name(),
            priority = subscriber.priority,
            "Subscribed"
        );

        self.inner
            .subscribers
            .write()
            .entry(destination.clone())
            .or_default()
            .push(Arc::clone(&subscriber));
        self.inner.declared.write().insert(destination);

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            subscriber.deactivate();
            if let Some(inner) = inner.upgrade() {
                let mut subscribers = inner.subscribers.write();
                if let Some(list) = subscribers.get_mut(&subscriber.destination) {
                    list.retain(|s| s.id != subscriber.id);
                    if list.is_empty() {
                        subscribers.remove(&subscriber.destination);
                    }
                }
            }
            debug!(destination = %subscriber.destination, "Unsubscribed");
        }))
    }

    fn verify_endpoints(
        &self,
        usage: EndpointUsage,
        endpoints: &[Endpoint],
        create_missing: bool,
    ) -> HashMap<Endpoint, Option<String>> {
        endpoints
            .iter()
            .map(|endpoint| {
                let error = match Self::check_transport(endpoint) {
                    Err(err) => Some(err.to_string()),
                    Ok(()) => {
                        let name = match usage {
                            EndpointUsage::Publish => &endpoint.destination.publish,
                            EndpointUsage::Subscribe => &endpoint.destination.subscribe,
                        };
                        if name.is_empty() {
                            Some(format!("no destination for {usage:?}"))
                        } else if create_missing {
                            self.inner.declared.write().insert(name.clone());
                            None
                        } else if self.inner.declared.read().contains(name) {
                            None
                        } else {
                            Some(format!("destination '{name}' does not exist"))
                        }
                    }
                };
                (endpoint.clone(), error)
            })
            .collect()
    }

    fn add_processing_group(&self, name: &str, options: ProcessingOptions) {
        if self.inner.groups.lock().contains_key(name) {
            debug!(group = name, "Processing group already started, keeping its options");
            return;
        }
        self.inner
            .group_options
            .lock()
            .insert(name.to_string(), options);
    }
}

#[cfg(test)]
mod tests;
