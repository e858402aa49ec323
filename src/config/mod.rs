//! Layered configuration: defaults, then an optional `config/default` file,
//! then `PIPEBUS__*` environment variables.

mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, LoggingSettings, OverflowPolicy, Settings, TopicSettings};

/// Prefix for environment overrides, e.g. `PIPEBUS__BROKER__BATCH_SIZE=10`.
pub const ENV_PREFIX: &str = "PIPEBUS";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

/// Same as [`load_config`] with an explicit file stem. The file is optional.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge_with_defaults();
    validate(&settings)?;

    Ok(settings)
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.broker.batch_size == 0 {
        return Err(ConfigError::Message(
            "broker.batch_size must be at least 1".to_string(),
        ));
    }
    if settings.broker.max_pending_per_subscription == Some(0) {
        return Err(ConfigError::Message(
            "broker.max_pending_per_subscription must be at least 1 when set".to_string(),
        ));
    }
    let topics = &settings.topics;
    let names = [
        &topics.upload,
        &topics.processed,
        &topics.analysis,
        &topics.simulation,
    ];
    if names.iter().any(|name| name.trim().is_empty()) {
        return Err(ConfigError::Message(
            "topic names must not be empty".to_string(),
        ));
    }
    Ok(())
}
