//! Builders for the events the document flows publish.

use serde_json::{Value, json};

use crate::broker::message::{Priority, ProcessingEvent};

pub const DOCUMENT_UPLOADED: &str = "document_uploaded";
pub const DOCUMENT_PROCESSED: &str = "document_processed";
pub const ANALYSIS_COMPLETED: &str = "analysis_completed";
pub const SIMULATION_REQUESTED: &str = "simulation_requested";

pub fn document_uploaded(
    document_id: &str,
    user_id: &str,
    file_path: &str,
    file_size: u64,
    content_type: &str,
) -> ProcessingEvent {
    ProcessingEvent::new(DOCUMENT_UPLOADED, document_id, user_id)
        .with_field("file_path", file_path)
        .with_field("file_size", file_size)
        .with_field("content_type", content_type)
        .with_field("processing_priority", "high")
        .with_priority(Priority::High)
}

pub fn document_processed(document_id: &str, user_id: &str, processing_result: Value) -> ProcessingEvent {
    ProcessingEvent::new(DOCUMENT_PROCESSED, document_id, user_id)
        .with_field("processing_result", processing_result)
        .with_field("next_steps", json!(["analysis", "notification"]))
        .with_priority(Priority::Medium)
}

/// `risk_score` defaults to 0.0 and `recommendations_count` to 0 when the
/// analysis result lacks them.
pub fn analysis_completed(
    document_id: &str,
    user_id: &str,
    analysis_id: &str,
    analysis_result: Value,
) -> ProcessingEvent {
    let risk_score = analysis_result
        .get("risk_score")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let recommendations_count = analysis_result
        .get("recommendations")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    ProcessingEvent::new(ANALYSIS_COMPLETED, document_id, user_id)
        .with_field("analysis_id", analysis_id)
        .with_field("analysis_result", analysis_result)
        .with_field("risk_score", risk_score)
        .with_field("recommendations_count", recommendations_count)
        .with_priority(Priority::Medium)
}

pub fn simulation_requested(
    document_id: &str,
    user_id: &str,
    simulation_parameters: Value,
) -> ProcessingEvent {
    let scenario = simulation_parameters
        .get("scenario")
        .cloned()
        .unwrap_or_else(|| json!("default"));
    let priority = simulation_parameters
        .get("priority")
        .cloned()
        .unwrap_or_else(|| json!("medium"));

    ProcessingEvent::new(SIMULATION_REQUESTED, document_id, user_id)
        .with_field("simulation_parameters", simulation_parameters)
        .with_field("scenario", scenario)
        .with_field("priority", priority)
        .with_priority(Priority::Medium)
}
