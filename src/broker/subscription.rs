//! Subscription queues
//!
//! Each subscription owns a FIFO of pending messages behind its own lock.
//! Publish appends, acknowledge removes, pull only reads. Messages stay in
//! the queue until acknowledged, so every pull may see them again.
//!
//! Queues are unbounded unless a capacity is configured; with no consumer
//! attached they grow with every publish to their topic.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tracing::warn;

use crate::broker::message::Message;
use crate::config::OverflowPolicy;

/// Optional bound on a subscription's pending messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capacity {
    pub max_pending: Option<usize>,
    pub policy: OverflowPolicy,
}

/// Outcome of appending a message to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest pending message.
    Evicted,
    /// Not queued because the subscription was full.
    Rejected,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Message>,
    dropped: u64,
}

#[derive(Debug)]
pub struct Subscription {
    name: String,
    topic: String,
    capacity: Capacity,
    state: Mutex<QueueState>,
}

impl Subscription {
    pub fn new(name: &str, topic: &str, capacity: Capacity) -> Self {
        Self {
            name: name.to_string(),
            topic: topic.to_string(),
            capacity,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append a message, applying the capacity policy if the queue is full.
    pub fn push(&self, message: Message) -> PushOutcome {
        let mut state = self.state.lock();

        let full = self
            .capacity
            .max_pending
            .is_some_and(|max| state.messages.len() >= max);
        if !full {
            state.messages.push_back(message);
            return PushOutcome::Queued;
        }

        state.dropped += 1;
        match self.capacity.policy {
            OverflowPolicy::DropOldest => {
                if let Some(evicted) = state.messages.pop_front() {
                    warn!(
                        subscription = %self.name,
                        message_id = %evicted.id,
                        "Subscription full, evicted oldest pending message"
                    );
                }
                state.messages.push_back(message);
                PushOutcome::Evicted
            }
            OverflowPolicy::RejectNew => {
                warn!(
                    subscription = %self.name,
                    message_id = %message.id,
                    "Subscription full, message not queued"
                );
                PushOutcome::Rejected
            }
        }
    }

    /// Up to `max` oldest pending messages, left in place.
    pub fn peek(&self, max: usize) -> Vec<Message> {
        let state = self.state.lock();
        state.messages.iter().take(max).cloned().collect()
    }

    /// Remove the message carrying `ack_id`. Returns whether one was removed.
    pub fn remove(&self, ack_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.messages.iter().position(|m| m.ack_id == ack_id) {
            Some(index) => state.messages.remove(index).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages lost to the capacity policy since creation.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}
