//! Document-pipeline wiring on top of the broker.
//!
//! The pipeline has four topics (names come from [`TopicSettings`]) and five
//! well-known subscriptions. [`Pipeline::seed`] creates whatever is missing so
//! producers can publish from the first request on.

pub mod events;

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::broker::Broker;
use crate::config::TopicSettings;
use crate::utils::error::Result;

pub const DOCUMENT_PROCESSOR: &str = "document-processor";
pub const ANALYSIS_TRIGGER: &str = "analysis-trigger";
pub const NOTIFICATION_SERVICE: &str = "notification-service";
pub const USER_NOTIFICATION: &str = "user-notification";
pub const SIMULATION_PROCESSOR: &str = "simulation-processor";

#[derive(Debug, Clone)]
pub struct Pipeline {
    broker: Arc<Broker>,
    topics: TopicSettings,
}

impl Pipeline {
    pub fn new(broker: Arc<Broker>, topics: TopicSettings) -> Self {
        Self { broker, topics }
    }

    /// The broker the pipeline publishes into.
    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Topic names the pipeline was seeded with.
    pub fn topics(&self) -> &TopicSettings {
        &self.topics
    }

    /// Every well-known subscription paired with the topic it reads.
    pub fn bindings(&self) -> [(&'static str, &str); 5] {
        [
            (DOCUMENT_PROCESSOR, self.topics.upload.as_str()),
            (ANALYSIS_TRIGGER, self.topics.processed.as_str()),
            (NOTIFICATION_SERVICE, self.topics.processed.as_str()),
            (USER_NOTIFICATION, self.topics.analysis.as_str()),
            (SIMULATION_PROCESSOR, self.topics.simulation.as_str()),
        ]
    }

    /// Create the pipeline topics and subscriptions that do not exist yet.
    pub fn seed(&self) {
        let topics = [
            &self.topics.upload,
            &self.topics.processed,
            &self.topics.analysis,
            &self.topics.simulation,
        ];
        for topic in topics {
            if self.broker.topic_subscriptions(topic).is_none() {
                self.broker.create_topic(topic);
            }
        }
        for (subscription, topic) in self.bindings() {
            if self.broker.subscription_topic(subscription).is_none() {
                self.broker.create_subscription(subscription, topic);
            }
        }
        info!(topics = topics.len(), "Pipeline topics ready");
    }

    pub fn publish_document_upload(
        &self,
        document_id: &str,
        user_id: &str,
        file_path: &str,
        file_size: u64,
        content_type: &str,
    ) -> Result<String> {
        info!(document_id = %document_id, "Publishing document upload event");
        let event = events::document_uploaded(document_id, user_id, file_path, file_size, content_type);
        self.broker.publish(&self.topics.upload, event)
    }

    pub fn publish_document_processed(
        &self,
        document_id: &str,
        user_id: &str,
        processing_result: Value,
    ) -> Result<String> {
        info!(document_id = %document_id, "Publishing document processed event");
        let event = events::document_processed(document_id, user_id, processing_result);
        self.broker.publish(&self.topics.processed, event)
    }

    pub fn publish_analysis_completed(
        &self,
        document_id: &str,
        user_id: &str,
        analysis_id: &str,
        analysis_result: Value,
    ) -> Result<String> {
        info!(document_id = %document_id, "Publishing analysis completed event");
        let event = events::analysis_completed(document_id, user_id, analysis_id, analysis_result);
        self.broker.publish(&self.topics.analysis, event)
    }

    pub fn publish_simulation_requested(
        &self,
        document_id: &str,
        user_id: &str,
        simulation_parameters: Value,
    ) -> Result<String> {
        info!(document_id = %document_id, "Publishing simulation requested event");
        let event = events::simulation_requested(document_id, user_id, simulation_parameters);
        self.broker.publish(&self.topics.simulation, event)
    }
}

#[cfg(test)]
mod tests;
