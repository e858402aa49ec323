//! Topic management
//!
//! A `Topic` holds the subscriptions bound to a topic name in binding order.
//! Its lock also serializes publishes to that topic, which keeps every bound
//! queue in non-decreasing `publish_time` order. Topics never share a lock,
//! so publishes to different topics do not contend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::broker::message::Message;
use crate::broker::subscription::{PushOutcome, Subscription};

#[derive(Debug, Default)]
struct TopicState {
    subscriptions: Vec<Arc<Subscription>>,
    last_publish: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct Topic {
    name: String,
    state: Mutex<TopicState>,
}

/// Result of fanning one message out to a topic's subscriptions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub rejected: usize,
}

impl Topic {
    /// Create a new topic with the given name and no subscriptions.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(TopicState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bind a subscription. Binding the same name twice is a no-op.
    pub fn bind(&self, subscription: Arc<Subscription>) {
        let mut state = self.state.lock();
        if !state
            .subscriptions
            .iter()
            .any(|s| s.name() == subscription.name())
        {
            state.subscriptions.push(subscription);
        }
    }

    /// Unbind a subscription by name. Returns whether it was bound.
    pub fn unbind(&self, subscription: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|s| s.name() != subscription);
        state.subscriptions.len() != before
    }

    pub fn subscription_names(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Stamp a message built by `build` and append a copy to every bound
    /// subscription.
    pub(crate) fn fan_out<F>(&self, build: F) -> FanOut
    where
        F: FnOnce(DateTime<Utc>) -> Message,
    {
        let mut state = self.state.lock();

        // wall clock may step back; publish_time must not
        let now = Utc::now();
        let publish_time = match state.last_publish {
            Some(last) if last > now => last,
            _ => now,
        };
        state.last_publish = Some(publish_time);

        let message = build(publish_time);
        let mut result = FanOut::default();
        for subscription in &state.subscriptions {
            match subscription.push(message.clone()) {
                PushOutcome::Queued | PushOutcome::Evicted => result.delivered += 1,
                PushOutcome::Rejected => result.rejected += 1,
            }
        }
        result
    }
}
