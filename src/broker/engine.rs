//! Broker engine
//!
//! This module contains the in-process broker responsible for:
//! - managing topics and the subscriptions bound to them
//! - fanning each published event out to every bound subscription
//! - pull/acknowledge access to subscription queues (at-least-once)
//! - starting and stopping one consumer loop per handled subscription
//!
//! Concurrency and usage notes:
//! - Registries sit behind read/write locks that are held only for lookups
//!   and inserts. Each topic and each subscription queue has its own lock,
//!   so publishes to different topics never contend and no lock is ever held
//!   while a handler runs.
//! - Lock order is subscriptions registry, then topics registry, then a
//!   topic, then a subscription queue. The handler registry is only ever
//!   locked last.
//! - A consumer loop is registered under the subscriptions read lock, after
//!   checking that its queue is still the live one. Deletion and shutdown
//!   take the write lock, so a loop can never be left on a deleted queue or
//!   slip in behind a shutdown.
//! - `subscribe`, `unsubscribe`, the delete operations and `shutdown` are
//!   async because they join consumer tasks; they must run inside a tokio
//!   runtime. Everything else is synchronous and short.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::message::{Message, ProcessingEvent};
use crate::broker::subscription::{Capacity, Subscription};
use crate::broker::topic::Topic;
use crate::config::BrokerSettings;
use crate::consumer::registry::ConsumerHandle;
use crate::consumer::{HandlerRegistry, LoopConfig, MessageHandler};
use crate::utils::error::{BrokerError, NameKind, Result};

pub struct Broker {
    settings: BrokerSettings,
    topics: RwLock<HashMap<String, Arc<Topic>>>,
    subscriptions: RwLock<HashMap<String, Arc<Subscription>>>,
    handlers: HandlerRegistry,
    // bumped by shutdown under the subscriptions write lock
    shutdowns: AtomicU64,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(BrokerSettings::default())
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("settings", &self.settings)
            .field("topics", &self.topics.read().len())
            .field("subscriptions", &self.subscriptions.read().len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl Broker {
    pub fn new(settings: BrokerSettings) -> Self {
        Self {
            settings,
            topics: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(HashMap::new()),
            handlers: HandlerRegistry::new(),
            shutdowns: AtomicU64::new(0),
        }
    }

    /// Settings the broker and its consumer loops run with.
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    fn capacity(&self) -> Capacity {
        Capacity {
            max_pending: self.settings.max_pending_per_subscription,
            policy: self.settings.overflow_policy,
        }
    }

    // ---- topic registry ----

    /// Register an empty topic. Returns `false` if the name is taken.
    pub fn create_topic(&self, name: &str) -> bool {
        self.try_create_topic(name).is_ok()
    }

    pub fn try_create_topic(&self, name: &str) -> Result<()> {
        match self.topics.write().entry(name.to_string()) {
            Entry::Occupied(_) => {
                warn!(topic = %name, "Topic already exists");
                Err(BrokerError::DuplicateName {
                    kind: NameKind::Topic,
                    name: name.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Topic::new(name)));
                info!(topic = %name, "Created topic");
                Ok(())
            }
        }
    }

    /// Bind a new subscription to an existing topic. Returns `false` if the
    /// topic does not exist or the subscription name is taken.
    pub fn create_subscription(&self, name: &str, topic: &str) -> bool {
        self.try_create_subscription(name, topic).is_ok()
    }

    pub fn try_create_subscription(&self, name: &str, topic: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write();
        if subscriptions.contains_key(name) {
            warn!(subscription = %name, "Subscription already exists");
            return Err(BrokerError::DuplicateName {
                kind: NameKind::Subscription,
                name: name.to_string(),
            });
        }
        let subscription = self.bind_subscription(name, topic)?;
        subscriptions.insert(name.to_string(), subscription);
        Ok(())
    }

    /// Return the named subscription, creating it on `topic` if it is new.
    fn ensure_subscription(&self, name: &str, topic: &str) -> Result<Arc<Subscription>> {
        let mut subscriptions = self.subscriptions.write();
        if let Some(existing) = subscriptions.get(name) {
            if existing.topic() != topic {
                return Err(BrokerError::TopicMismatch {
                    subscription: name.to_string(),
                    bound: existing.topic().to_string(),
                    requested: topic.to_string(),
                });
            }
            return Ok(existing.clone());
        }
        let subscription = self.bind_subscription(name, topic)?;
        subscriptions.insert(name.to_string(), subscription.clone());
        Ok(subscription)
    }

    // caller holds the subscriptions write lock
    fn bind_subscription(&self, name: &str, topic: &str) -> Result<Arc<Subscription>> {
        let Some(owner) = self.topics.read().get(topic).cloned() else {
            warn!(topic = %topic, subscription = %name, "Topic not found");
            return Err(BrokerError::UnknownTopic(topic.to_string()));
        };
        let subscription = Arc::new(Subscription::new(name, topic, self.capacity()));
        owner.bind(subscription.clone());
        info!(subscription = %name, topic = %topic, "Created subscription");
        Ok(subscription)
    }

    /// Remove a subscription, its pending messages and its consumer loop.
    pub async fn delete_subscription(&self, name: &str) -> bool {
        let removed = {
            let mut subscriptions = self.subscriptions.write();
            let removed = subscriptions.remove(name);
            if let Some(subscription) = &removed {
                if let Some(topic) = self.topics.read().get(subscription.topic()) {
                    topic.unbind(name);
                }
            }
            removed
        };
        if removed.is_none() {
            return false;
        }

        self.stop_consumer(name).await;
        info!(subscription = %name, "Deleted subscription");
        true
    }

    /// Remove a topic together with every subscription bound to it.
    pub async fn delete_topic(&self, name: &str) -> bool {
        let bound = {
            let mut subscriptions = self.subscriptions.write();
            let Some(topic) = self.topics.write().remove(name) else {
                return false;
            };
            let bound = topic.subscription_names();
            for subscription in &bound {
                subscriptions.remove(subscription);
            }
            bound
        };

        for subscription in &bound {
            self.stop_consumer(subscription).await;
        }
        info!(topic = %name, subscriptions = bound.len(), "Deleted topic");
        true
    }

    /// All topic names, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Subscriptions bound to `topic`, in binding order.
    pub fn topic_subscriptions(&self, topic: &str) -> Option<Vec<String>> {
        self.topics.read().get(topic).map(|t| t.subscription_names())
    }

    /// The topic `subscription` is bound to.
    pub fn subscription_topic(&self, subscription: &str) -> Option<String> {
        self.subscription(subscription)
            .map(|s| s.topic().to_string())
    }

    /// Messages waiting for acknowledgment in `subscription`.
    pub fn pending_count(&self, subscription: &str) -> Option<usize> {
        self.subscription(subscription).map(|s| s.len())
    }

    /// Messages `subscription` lost to its capacity policy.
    pub fn dropped_count(&self, subscription: &str) -> Option<u64> {
        self.subscription(subscription).map(|s| s.dropped())
    }

    fn subscription(&self, name: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.read().get(name).cloned()
    }

    // ---- publish / pull / acknowledge ----

    /// Publish `event` to every subscription bound to `topic`.
    ///
    /// Returns the new message id as soon as the copies are queued; delivery
    /// to consumers happens on their own schedule.
    pub fn publish(&self, topic: &str, event: ProcessingEvent) -> Result<String> {
        let Some(owner) = self.topics.read().get(topic).cloned() else {
            warn!(topic = %topic, "Publish to unknown topic rejected");
            return Err(BrokerError::UnknownTopic(topic.to_string()));
        };

        let message_id = Uuid::new_v4().to_string();
        let event_type = event.event_type.clone();
        let fan_out = owner.fan_out(|publish_time| {
            Message::new(message_id.clone(), event, publish_time)
        });

        debug!(
            topic = %topic,
            message_id = %message_id,
            event_type = %event_type,
            delivered = fan_out.delivered,
            rejected = fan_out.rejected,
            "Published message"
        );
        Ok(message_id)
    }

    /// Up to `max_messages` oldest pending messages of `subscription`.
    ///
    /// Nothing is removed; a message keeps coming back until acknowledged.
    /// Unknown subscriptions yield an empty batch.
    pub fn pull(&self, subscription: &str, max_messages: usize) -> Vec<Message> {
        match self.subscription(subscription) {
            Some(queue) => {
                let batch = queue.peek(max_messages);
                debug!(subscription = %subscription, count = batch.len(), "Pulled messages");
                batch
            }
            None => {
                debug!(subscription = %subscription, "Pull from unknown subscription");
                Vec::new()
            }
        }
    }

    /// Remove the message carrying `ack_id` from `subscription`.
    ///
    /// Returns whether a message was removed. Unknown tokens, including ones
    /// already acknowledged, are a no-op.
    pub fn acknowledge(&self, subscription: &str, ack_id: &str) -> bool {
        let removed = self
            .subscription(subscription)
            .is_some_and(|queue| queue.remove(ack_id));
        debug!(subscription = %subscription, ack_id = %ack_id, removed, "Acknowledge");
        removed
    }

    // ---- handler registry ----

    /// Attach `handler` to `subscription` on `topic` and start its consumer
    /// loop. Returns `false` if the topic does not exist or the subscription
    /// is bound to a different topic.
    pub async fn subscribe<H>(&self, subscription: &str, topic: &str, handler: H) -> bool
    where
        H: MessageHandler + 'static,
    {
        self.try_subscribe(subscription, topic, handler).await.is_ok()
    }

    /// Like [`subscribe`](Self::subscribe), reporting why it failed.
    ///
    /// A new subscription name is bound to `topic` first. Re-subscribing
    /// stops the previous loop before the new handler starts polling.
    ///
    /// Fails with `UnknownSubscription` if the subscription is deleted while
    /// the previous loop is being stopped, and with `ShuttingDown` if
    /// `shutdown` runs in that window. No loop is left running either way.
    pub async fn try_subscribe<H>(&self, subscription: &str, topic: &str, handler: H) -> Result<()>
    where
        H: MessageHandler + 'static,
    {
        info!(subscription = %subscription, topic = %topic, "Subscribing handler");
        let shutdowns = self.shutdowns.load(Ordering::Acquire);
        let queue = self.ensure_subscription(subscription, topic)?;

        self.stop_consumer(subscription).await;

        let previous = self.register_consumer(queue, Arc::new(handler), shutdowns)?;
        if let Some(previous) = previous {
            // lost a race with a concurrent subscribe; last one wins
            previous.stop(self.settings.shutdown_grace()).await;
        }
        Ok(())
    }

    /// Start the loop for `queue` unless it was deleted or a shutdown began
    /// since `shutdowns` was read. Returns the handle it displaced.
    fn register_consumer(
        &self,
        queue: Arc<Subscription>,
        handler: Arc<dyn MessageHandler>,
        shutdowns: u64,
    ) -> Result<Option<ConsumerHandle>> {
        let subscriptions = self.subscriptions.read();
        let name = queue.name();

        if self.shutdowns.load(Ordering::Acquire) != shutdowns {
            warn!(subscription = %name, "Shutdown began during subscribe, handler not started");
            return Err(BrokerError::ShuttingDown);
        }
        let live = subscriptions
            .get(name)
            .is_some_and(|current| Arc::ptr_eq(current, &queue));
        if !live {
            warn!(subscription = %name, "Subscription deleted during subscribe, handler not started");
            return Err(BrokerError::UnknownSubscription(name.to_string()));
        }

        let handle = ConsumerHandle::spawn(queue.clone(), handler, LoopConfig::from(&self.settings));
        Ok(self.handlers.insert(handle))
    }

    /// Stop the consumer loop of `subscription`. Its queue is kept and keeps
    /// accumulating messages. Returns whether a handler was registered.
    pub async fn unsubscribe(&self, subscription: &str) -> bool {
        let stopped = self.stop_consumer(subscription).await;
        if stopped {
            info!(subscription = %subscription, "Handler unregistered");
        }
        stopped
    }

    /// Whether a consumer loop is registered for `subscription`.
    pub fn has_handler(&self, subscription: &str) -> bool {
        self.handlers.contains(subscription)
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    async fn stop_consumer(&self, subscription: &str) -> bool {
        match self.handlers.take(subscription) {
            Some(handle) => {
                handle.stop(self.settings.shutdown_grace()).await;
                true
            }
            None => false,
        }
    }

    /// Stop every consumer loop and wait for them to finish.
    ///
    /// Queues are left intact; the broker stays usable for publish and pull.
    /// A `subscribe` still in flight when this starts fails with
    /// `ShuttingDown`; later ones register normally.
    pub async fn shutdown(&self) {
        let handles = {
            let _subscriptions = self.subscriptions.write();
            self.shutdowns.fetch_add(1, Ordering::AcqRel);
            self.handlers.drain()
        };
        if handles.is_empty() {
            return;
        }
        info!(consumers = handles.len(), "Shutting down consumer loops");

        for handle in &handles {
            handle.signal();
        }
        let grace = self.settings.shutdown_grace();
        futures::future::join_all(handles.into_iter().map(|handle| handle.stop(grace))).await;
        info!("All consumer loops stopped");
    }
}
