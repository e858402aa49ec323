use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{HandlerResult, MessageHandler, handler_fn};
use crate::broker::{Broker, Message, ProcessingEvent};
use crate::config::BrokerSettings;
use crate::utils::error::{BrokerError, HandlerError};

fn fast_broker() -> Broker {
    Broker::new(BrokerSettings {
        batch_size: 5,
        poll_interval_ms: 10,
        shutdown_grace_ms: 500,
        ..BrokerSettings::default()
    })
}

fn event(document_id: &str) -> ProcessingEvent {
    ProcessingEvent::new("document_uploaded", document_id, "u1")
}

/// Poll `condition` until it holds or two seconds pass.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<Message>>,
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, message: Message) -> HandlerResult {
        self.seen.lock().push(message);
        Ok(())
    }
}

#[tokio::test]
async fn handler_receives_and_acknowledges_in_publish_order() {
    let broker = fast_broker();
    broker.create_topic("document-upload");
    let recorder = Arc::new(Recorder::default());

    assert!(broker.subscribe("document-processor", "document-upload", recorder.clone()).await);
    assert!(broker.has_handler("document-processor"));

    let ids: Vec<_> = (0..12)
        .map(|i| broker.publish("document-upload", event(&format!("d{i}"))).unwrap())
        .collect();

    assert!(eventually(|| broker.pending_count("document-processor") == Some(0)).await);
    let seen = recorder.seen.lock().clone();
    let seen_ids: Vec<_> = seen.iter().map(|m| m.id.clone()).collect();
    assert_eq!(seen_ids, ids);
    assert!(seen.windows(2).all(|w| w[0].publish_time <= w[1].publish_time));

    broker.shutdown().await;
}

#[tokio::test]
async fn subscribe_creates_missing_subscription() {
    let broker = fast_broker();
    broker.create_topic("t");

    assert!(broker.subscribe("fresh", "t", Recorder::default()).await);
    assert_eq!(broker.topic_subscriptions("t"), Some(vec!["fresh".to_string()]));
    broker.shutdown().await;
}

#[tokio::test]
async fn subscribe_rejects_unknown_topic_and_mismatch() {
    let broker = fast_broker();
    assert_eq!(
        broker.try_subscribe("s", "missing", Recorder::default()).await,
        Err(BrokerError::UnknownTopic("missing".to_string()))
    );
    assert!(!broker.has_handler("s"));

    broker.create_topic("a");
    broker.create_topic("b");
    broker.create_subscription("s", "a");
    assert!(matches!(
        broker.try_subscribe("s", "b", Recorder::default()).await,
        Err(BrokerError::TopicMismatch { .. })
    ));
}

#[tokio::test]
async fn failing_handler_retries_indefinitely() {
    let broker = fast_broker();
    broker.create_topic("t");
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    broker
        .subscribe(
            "s",
            "t",
            handler_fn(move |_message| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(HandlerError::new("analysis backend unavailable"))
                }
            }),
        )
        .await;
    broker.publish("t", event("d1")).unwrap();

    assert!(eventually(|| attempts.load(Ordering::SeqCst) >= 5).await);
    assert_eq!(broker.pending_count("s"), Some(1));
    assert!(broker.has_handler("s"));
    broker.shutdown().await;
}

#[tokio::test]
async fn panicking_handler_does_not_kill_the_loop() {
    let broker = fast_broker();
    broker.create_topic("t");
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    broker
        .subscribe(
            "s",
            "t",
            handler_fn(move |message: Message| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if message.data.document_id == "poison" {
                        panic!("cannot parse document");
                    }
                    Ok::<(), HandlerError>(())
                }
            }),
        )
        .await;

    broker.publish("t", event("poison")).unwrap();
    broker.publish("t", event("fine")).unwrap();

    // the good message is acknowledged, the poisoned one stays pending
    assert!(eventually(|| {
        broker
            .pull("s", 10)
            .iter()
            .all(|m| m.data.document_id == "poison")
            && broker.pending_count("s") == Some(1)
    })
    .await);
    assert!(eventually(|| calls.load(Ordering::SeqCst) >= 4).await);
    broker.shutdown().await;
}

#[tokio::test]
async fn messages_queued_before_subscribe_are_delivered() {
    let broker = fast_broker();
    broker.create_topic("t");
    broker.create_subscription("s", "t");
    broker.publish("t", event("early")).unwrap();

    let recorder = Arc::new(Recorder::default());
    broker.subscribe("s", "t", recorder.clone()).await;

    assert!(eventually(|| recorder.seen.lock().len() == 1).await);
    assert_eq!(recorder.seen.lock()[0].data.document_id, "early");
    broker.shutdown().await;
}

#[tokio::test]
async fn resubscribe_replaces_handler() {
    let broker = fast_broker();
    broker.create_topic("t");
    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());

    broker.subscribe("s", "t", first.clone()).await;
    broker.publish("t", event("one")).unwrap();
    assert!(eventually(|| first.seen.lock().len() == 1).await);

    broker.subscribe("s", "t", second.clone()).await;
    assert_eq!(broker.handlers().len(), 1);
    broker.publish("t", event("two")).unwrap();
    assert!(eventually(|| second.seen.lock().len() == 1).await);

    assert_eq!(first.seen.lock().len(), 1);
    assert_eq!(second.seen.lock()[0].data.document_id, "two");
    broker.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_stops_delivery_but_keeps_queue() {
    let broker = fast_broker();
    broker.create_topic("t");
    let recorder = Arc::new(Recorder::default());
    broker.subscribe("s", "t", recorder.clone()).await;

    assert!(broker.unsubscribe("s").await);
    assert!(!broker.unsubscribe("s").await);
    assert!(!broker.has_handler("s"));

    broker.publish("t", event("later")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(recorder.seen.lock().is_empty());
    assert_eq!(broker.pending_count("s"), Some(1));
}

#[tokio::test]
async fn stuck_handler_does_not_block_other_subscriptions() {
    let broker = fast_broker();
    broker.create_topic("t");
    let release = Arc::new(Notify::new());
    let gate = release.clone();

    broker
        .subscribe(
            "stuck",
            "t",
            handler_fn(move |_message| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok::<(), HandlerError>(())
                }
            }),
        )
        .await;
    let recorder = Arc::new(Recorder::default());
    broker.subscribe("healthy", "t", recorder.clone()).await;

    for i in 0..3 {
        broker.publish("t", event(&format!("d{i}"))).unwrap();
    }

    assert!(eventually(|| recorder.seen.lock().len() == 3).await);
    assert_eq!(broker.pending_count("stuck"), Some(3));

    // publish path is not blocked by the stuck handler either
    assert!(broker.publish("t", event("d3")).is_ok());
    release.notify_waiters();
    broker.shutdown().await;
}

#[tokio::test]
async fn shutdown_aborts_handlers_past_grace_period() {
    let broker = Broker::new(BrokerSettings {
        poll_interval_ms: 10,
        shutdown_grace_ms: 50,
        ..BrokerSettings::default()
    });
    broker.create_topic("t");
    let entered = Arc::new(Notify::new());
    let signal = entered.clone();

    broker
        .subscribe(
            "s",
            "t",
            handler_fn(move |_message| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    std::future::pending::<()>().await;
                    Ok::<(), HandlerError>(())
                }
            }),
        )
        .await;
    broker.publish("t", event("d1")).unwrap();
    entered.notified().await;

    tokio::time::timeout(Duration::from_secs(2), broker.shutdown())
        .await
        .expect("shutdown should not hang on a stuck handler");
    assert!(broker.handlers().is_empty());
    // aborting mid-dispatch leaves the message pending, never half-acked
    assert_eq!(broker.pending_count("s"), Some(1));
}

#[tokio::test]
async fn delete_subscription_stops_its_loop() {
    let broker = fast_broker();
    broker.create_topic("t");
    broker.subscribe("s", "t", Recorder::default()).await;

    assert!(broker.delete_subscription("s").await);
    assert!(!broker.has_handler("s"));
}

#[tokio::test]
async fn delete_topic_stops_every_bound_loop() {
    let broker = fast_broker();
    broker.create_topic("t");
    broker.create_topic("other");
    broker.subscribe("a", "t", Recorder::default()).await;
    broker.subscribe("b", "t", Recorder::default()).await;
    broker.subscribe("c", "other", Recorder::default()).await;

    assert!(broker.delete_topic("t").await);
    assert!(!broker.has_handler("a"));
    assert!(!broker.has_handler("b"));
    assert_eq!(broker.pending_count("a"), None);
    assert!(broker.has_handler("c"));
    broker.shutdown().await;
}

/// Broker with a handler on `s` that never returns once it has a message.
async fn broker_with_stuck_handler() -> Arc<Broker> {
    let broker = Arc::new(Broker::new(BrokerSettings {
        poll_interval_ms: 10,
        shutdown_grace_ms: 300,
        ..BrokerSettings::default()
    }));
    broker.create_topic("t");
    let entered = Arc::new(Notify::new());
    let signal = entered.clone();

    broker
        .subscribe(
            "s",
            "t",
            handler_fn(move |_message| {
                let signal = signal.clone();
                async move {
                    signal.notify_one();
                    std::future::pending::<()>().await;
                    Ok::<(), HandlerError>(())
                }
            }),
        )
        .await;
    broker.publish("t", event("stuck")).unwrap();
    entered.notified().await;
    broker
}

#[tokio::test]
async fn subscribe_racing_delete_subscription_does_not_start_a_loop() {
    let broker = broker_with_stuck_handler().await;
    let recorder = Arc::new(Recorder::default());

    let resubscribe = {
        let broker = broker.clone();
        let recorder = recorder.clone();
        tokio::spawn(async move { broker.try_subscribe("s", "t", recorder).await })
    };

    // the old loop has been taken out and is inside its grace period
    assert!(eventually(|| !broker.has_handler("s")).await);
    assert!(broker.delete_subscription("s").await);
    assert!(broker.create_subscription("s", "t"));
    broker.publish("t", event("after")).unwrap();

    assert_eq!(
        resubscribe.await.unwrap(),
        Err(BrokerError::UnknownSubscription("s".to_string()))
    );
    assert!(!broker.has_handler("s"));
    assert!(broker.handlers().is_empty());
    assert_eq!(broker.pending_count("s"), Some(1));
    assert!(recorder.seen.lock().is_empty());

    // the recreated queue is served by the next subscribe
    assert!(broker.subscribe("s", "t", recorder.clone()).await);
    assert!(eventually(|| broker.pending_count("s") == Some(0)).await);
    assert_eq!(recorder.seen.lock()[0].data.document_id, "after");
    broker.shutdown().await;
}

#[tokio::test]
async fn subscribe_racing_shutdown_does_not_start_a_loop() {
    let broker = broker_with_stuck_handler().await;

    let resubscribe = {
        let broker = broker.clone();
        tokio::spawn(async move { broker.try_subscribe("s", "t", Recorder::default()).await })
    };

    assert!(eventually(|| !broker.has_handler("s")).await);
    broker.shutdown().await;

    assert_eq!(resubscribe.await.unwrap(), Err(BrokerError::ShuttingDown));
    assert!(broker.handlers().is_empty());
    assert_eq!(broker.pending_count("s"), Some(1));
}
