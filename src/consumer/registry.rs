//! Handler registry
//!
//! Maps a subscription name to its handler and the running consumer loop.
//! The map lock is never held across an await: stopping a loop first takes
//! its handle out of the map, then signals and joins it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::subscription::Subscription;
use crate::consumer::handler::MessageHandler;
use crate::consumer::worker::{self, LoopConfig};

/// A running consumer loop.
pub(crate) struct ConsumerHandle {
    subscription: String,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    /// Spawn the consumer loop for `subscription` on the current runtime.
    pub(crate) fn spawn(
        subscription: Arc<Subscription>,
        handler: Arc<dyn MessageHandler>,
        config: LoopConfig,
    ) -> Self {
        let (cancel, cancel_rx) = watch::channel(false);
        let name = subscription.name().to_string();
        let task = tokio::spawn(worker::run(subscription, handler, config, cancel_rx));
        Self {
            subscription: name,
            cancel,
            task,
        }
    }

    /// Ask the loop to stop without waiting for it.
    pub(crate) fn signal(&self) {
        let _ = self.cancel.send(true);
    }

    /// Signal the loop and wait up to `grace` for it to finish, aborting it
    /// after that. Either way no message is left half-acknowledged:
    /// acknowledgment is a single queue removal.
    pub(crate) async fn stop(mut self, grace: Duration) {
        self.signal();
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(subscription = %self.subscription, error = %err, "Consumer loop ended abnormally");
            }
            Err(_) => {
                warn!(
                    subscription = %self.subscription,
                    grace_ms = grace.as_millis() as u64,
                    "Consumer loop did not stop in time, aborting"
                );
                self.task.abort();
                let _ = self.task.await;
            }
        }
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    consumers: Mutex<HashMap<String, ConsumerHandle>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a running consumer, returning the one it replaces.
    pub(crate) fn insert(&self, handle: ConsumerHandle) -> Option<ConsumerHandle> {
        info!(subscription = %handle.subscription, "Handler registered");
        self.consumers
            .lock()
            .insert(handle.subscription.clone(), handle)
    }

    pub(crate) fn take(&self, subscription: &str) -> Option<ConsumerHandle> {
        self.consumers.lock().remove(subscription)
    }

    pub(crate) fn drain(&self) -> Vec<ConsumerHandle> {
        self.consumers.lock().drain().map(|(_, handle)| handle).collect()
    }

    pub fn contains(&self, subscription: &str) -> bool {
        self.consumers.lock().contains_key(subscription)
    }

    pub fn len(&self) -> usize {
        self.consumers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for HandlerRegistry {
    fn drop(&mut self) {
        for handle in self.consumers.get_mut().values() {
            handle.signal();
        }
    }
}
