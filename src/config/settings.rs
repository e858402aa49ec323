use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker, the pipeline topic names and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub topics: TopicSettings,
    pub logging: LoggingSettings,
}

/// What a bounded subscription does when a publish finds it full.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest pending message to make room.
    #[default]
    DropOldest,
    /// Keep the queue as is and skip the new message for that subscription.
    RejectNew,
}

/// Configuration settings for the broker and its consumer loops.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// `None` leaves subscription queues unbounded.
    pub max_pending_per_subscription: Option<usize>,
    pub overflow_policy: OverflowPolicy,
    pub shutdown_grace_ms: u64,
}

/// Names of the document-pipeline topics.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TopicSettings {
    pub upload: String,
    pub processed: String,
    pub analysis: String,
    pub simulation: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub topics: Option<PartialTopicSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub batch_size: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub max_pending_per_subscription: Option<usize>,
    pub overflow_policy: Option<OverflowPolicy>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTopicSettings {
    pub upload: Option<String>,
    pub processed: Option<String>,
    pub analysis: Option<String>,
    pub simulation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval_ms: 1000,
            max_pending_per_subscription: None,
            overflow_policy: OverflowPolicy::DropOldest,
            shutdown_grace_ms: 5000,
        }
    }
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            upload: "document-upload".to_string(),
            processed: "document-processed".to_string(),
            analysis: "analysis-completed".to_string(),
            simulation: "simulation-requested".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings::default(),
            topics: TopicSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let broker = self.broker.unwrap_or_default();
        let topics = self.topics.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                batch_size: broker.batch_size.unwrap_or(default.broker.batch_size),
                poll_interval_ms: broker
                    .poll_interval_ms
                    .unwrap_or(default.broker.poll_interval_ms),
                max_pending_per_subscription: broker
                    .max_pending_per_subscription
                    .or(default.broker.max_pending_per_subscription),
                overflow_policy: broker
                    .overflow_policy
                    .unwrap_or(default.broker.overflow_policy),
                shutdown_grace_ms: broker
                    .shutdown_grace_ms
                    .unwrap_or(default.broker.shutdown_grace_ms),
            },
            topics: TopicSettings {
                upload: topics.upload.unwrap_or(default.topics.upload),
                processed: topics.processed.unwrap_or(default.topics.processed),
                analysis: topics.analysis.unwrap_or(default.topics.analysis),
                simulation: topics.simulation.unwrap_or(default.topics.simulation),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }
}

impl BrokerSettings {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.shutdown_grace_ms)
    }
}
