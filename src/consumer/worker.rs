//! The consumer loop.
//!
//! Polling: pull up to `batch_size` pending messages. An empty batch sleeps
//! for `poll_interval`. A non-empty batch is dispatched in pull order, then
//! the loop polls again right away if every message was acknowledged, or
//! after `poll_interval` if any handler failed. Sleeping only when there is
//! nothing new to do drains a backlog without waiting a full interval per
//! batch, unlike a loop that always sleeps between polls. Failures are retried
//! forever at that cadence; there is no backoff and no dead-letter routing.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::broker::message::Message;
use crate::broker::subscription::Subscription;
use crate::config::BrokerSettings;
use crate::consumer::handler::MessageHandler;
use crate::utils::error::HandlerError;

#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopConfig {
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl From<&BrokerSettings> for LoopConfig {
    fn from(settings: &BrokerSettings) -> Self {
        Self {
            batch_size: settings.batch_size.max(1),
            poll_interval: settings.poll_interval(),
        }
    }
}

enum BatchOutcome {
    Empty,
    AllAcked,
    Failures,
    Cancelled,
}

pub(crate) async fn run(
    subscription: Arc<Subscription>,
    handler: Arc<dyn MessageHandler>,
    config: LoopConfig,
    mut cancel: watch::Receiver<bool>,
) {
    info!(
        subscription = %subscription.name(),
        batch_size = config.batch_size,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Consumer loop started"
    );

    loop {
        if *cancel.borrow() {
            break;
        }

        match dispatch_batch(&subscription, handler.as_ref(), config.batch_size, &cancel).await {
            BatchOutcome::AllAcked => {
                tokio::task::yield_now().await;
                continue;
            }
            BatchOutcome::Cancelled => break,
            BatchOutcome::Empty | BatchOutcome::Failures => {}
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            changed = cancel.changed() => {
                // a dropped sender means the owning registry is gone
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
            }
        }
    }

    info!(subscription = %subscription.name(), "Consumer loop stopped");
}

async fn dispatch_batch(
    subscription: &Subscription,
    handler: &dyn MessageHandler,
    batch_size: usize,
    cancel: &watch::Receiver<bool>,
) -> BatchOutcome {
    let batch = subscription.peek(batch_size);
    if batch.is_empty() {
        return BatchOutcome::Empty;
    }

    let mut failed = false;
    for message in batch {
        if *cancel.borrow() {
            return BatchOutcome::Cancelled;
        }
        if !dispatch(subscription, handler, message).await {
            failed = true;
        }
    }

    if failed {
        BatchOutcome::Failures
    } else {
        BatchOutcome::AllAcked
    }
}

/// Invoke the handler for one message and acknowledge it on success.
async fn dispatch(subscription: &Subscription, handler: &dyn MessageHandler, message: Message) -> bool {
    let message_id = message.id.clone();
    let ack_id = message.ack_id.clone();

    let outcome = match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::new(format!(
            "handler panicked: {}",
            panic_reason(panic.as_ref())
        ))),
    };

    match outcome {
        Ok(()) => {
            let removed = subscription.remove(&ack_id);
            debug!(
                subscription = %subscription.name(),
                message_id = %message_id,
                removed,
                "Message handled and acknowledged"
            );
            true
        }
        Err(err) => {
            error!(
                subscription = %subscription.name(),
                message_id = %message_id,
                error = %err,
                "Error processing message, left pending for redelivery"
            );
            false
        }
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> &str {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = panic.downcast_ref::<String>() {
        reason.as_str()
    } else {
        "unknown panic"
    }
}
