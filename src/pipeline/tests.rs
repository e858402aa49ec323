use std::sync::Arc;

use serde_json::json;

use super::events::{self, ANALYSIS_COMPLETED};
use super::*;
use crate::broker::Priority;

fn seeded() -> Pipeline {
    let pipeline = Pipeline::new(Arc::new(Broker::default()), TopicSettings::default());
    pipeline.seed();
    pipeline
}

#[test]
fn seed_creates_the_well_known_layout() {
    let pipeline = seeded();
    let broker = pipeline.broker();

    assert_eq!(
        broker.topic_names(),
        vec![
            "analysis-completed",
            "document-processed",
            "document-upload",
            "simulation-requested"
        ]
    );
    assert_eq!(
        broker.topic_subscriptions("document-processed"),
        Some(vec![ANALYSIS_TRIGGER.to_string(), NOTIFICATION_SERVICE.to_string()])
    );
    assert_eq!(
        broker.subscription_topic(SIMULATION_PROCESSOR).as_deref(),
        Some("simulation-requested")
    );
}

#[test]
fn seed_is_idempotent() {
    let pipeline = seeded();
    pipeline.seed();
    assert_eq!(pipeline.broker().topic_names().len(), 4);
    assert_eq!(
        pipeline.broker().topic_subscriptions("document-upload"),
        Some(vec![DOCUMENT_PROCESSOR.to_string()])
    );
}

#[test]
fn seed_uses_configured_topic_names() {
    let topics = TopicSettings {
        upload: "uploads-v2".to_string(),
        ..TopicSettings::default()
    };
    let pipeline = Pipeline::new(Arc::new(Broker::default()), topics);
    pipeline.seed();
    assert_eq!(
        pipeline.broker().subscription_topic(DOCUMENT_PROCESSOR).as_deref(),
        Some("uploads-v2")
    );
    assert_eq!(pipeline.topics().upload, "uploads-v2");
    assert_eq!(pipeline.topics().processed, "document-processed");
}

#[test]
fn document_upload_reaches_document_processor() {
    let pipeline = seeded();
    let id = pipeline
        .publish_document_upload("d1", "u1", "/uploads/d1.pdf", 1024, "application/pdf")
        .unwrap();

    let pulled = pipeline.broker().pull(DOCUMENT_PROCESSOR, 10);
    assert_eq!(pulled.len(), 1);
    let message = &pulled[0];
    assert_eq!(message.id, id);
    assert_eq!(message.data.event_type, events::DOCUMENT_UPLOADED);
    assert_eq!(message.data.priority, Priority::High);
    assert_eq!(message.data.data["file_size"], json!(1024));
    assert_eq!(message.data.data["processing_priority"], json!("high"));
    assert_eq!(message.attributes["document_id"], "d1");
}

#[test]
fn document_processed_fans_out_to_both_consumers() {
    let pipeline = seeded();
    pipeline
        .publish_document_processed("d1", "u1", json!({"pages": 3}))
        .unwrap();

    let broker = pipeline.broker();
    assert_eq!(broker.pending_count(ANALYSIS_TRIGGER), Some(1));
    assert_eq!(broker.pending_count(NOTIFICATION_SERVICE), Some(1));
    let message = broker.pull(ANALYSIS_TRIGGER, 1).remove(0);
    assert_eq!(message.data.data["next_steps"], json!(["analysis", "notification"]));
    assert_eq!(message.attributes["priority"], "2");
}

#[test]
fn analysis_completed_derives_summary_fields() {
    let event = events::analysis_completed(
        "d1",
        "u1",
        "a1",
        json!({"risk_score": 0.7, "recommendations": ["renegotiate", "review"]}),
    );
    assert_eq!(event.event_type, ANALYSIS_COMPLETED);
    assert_eq!(event.data["risk_score"], json!(0.7));
    assert_eq!(event.data["recommendations_count"], json!(2));

    let bare = events::analysis_completed("d1", "u1", "a2", json!({}));
    assert_eq!(bare.data["risk_score"], json!(0.0));
    assert_eq!(bare.data["recommendations_count"], json!(0));
}

#[test]
fn simulation_requested_fills_defaults() {
    let event = events::simulation_requested("d1", "u1", json!({"months": 12}));
    assert_eq!(event.data["scenario"], json!("default"));
    assert_eq!(event.data["priority"], json!("medium"));
    assert_eq!(event.priority, Priority::Medium);

    let custom = events::simulation_requested("d1", "u1", json!({"scenario": "late-payment"}));
    assert_eq!(custom.data["scenario"], json!("late-payment"));
}

#[test]
fn publishing_before_seed_is_rejected() {
    let pipeline = Pipeline::new(Arc::new(Broker::default()), TopicSettings::default());
    assert!(
        pipeline
            .publish_simulation_requested("d1", "u1", json!({}))
            .is_err()
    );
}
