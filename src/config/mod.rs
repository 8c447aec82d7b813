mod settings;

use crate::config::settings::PartialSettings;
use crate::utils::error::Result;
use config::{Config, Environment, File};

pub use settings::{
    BrokerSettings, ForumSettings, LoggingSettings, ServerSettings, Settings, validate_broker_url,
};

/// Prefix of the environment variables read by `load_config`,
/// e.g. `FORUMSUB__BROKER__URL`.
pub const ENV_PREFIX: &str = "FORUMSUB";

/// Loads the configuration from the default file and environment variables.
/// Merges the configuration with default values.
pub fn load_config() -> Result<Settings> {
    load_config_from("config/default")
}

/// Same as `load_config` but reads the optional file at `file` (extension
/// inferred by the `config` crate).
pub fn load_config_from(file: &str) -> Result<Settings> {
    let builder = Config::builder()
        .add_source(File::with_name(file).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    // Merge with defaults
    let default = Settings::default();
    let broker = partial.broker;
    let forum = partial.forum;
    let server = partial.server;
    let logging = partial.logging;

    Ok(Settings {
        broker: BrokerSettings {
            url: broker
                .as_ref()
                .and_then(|b| b.url.clone())
                .unwrap_or(default.broker.url),
            connect_timeout_ms: broker
                .as_ref()
                .and_then(|b| b.connect_timeout_ms)
                .unwrap_or(default.broker.connect_timeout_ms),
            request_timeout_ms: broker
                .as_ref()
                .and_then(|b| b.request_timeout_ms)
                .unwrap_or(default.broker.request_timeout_ms),
        },
        forum: ForumSettings {
            user_id: forum
                .as_ref()
                .and_then(|f| f.user_id.clone())
                .unwrap_or(default.forum.user_id),
        },
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            database_path: server
                .as_ref()
                .and_then(|s| s.database_path.clone())
                .unwrap_or(default.server.database_path),
            message_ttl_secs: server
                .as_ref()
                .and_then(|s| s.message_ttl_secs)
                .unwrap_or(default.server.message_ttl_secs),
            max_messages_per_queue: server
                .as_ref()
                .and_then(|s| s.max_messages_per_queue)
                .unwrap_or(default.server.max_messages_per_queue),
        },
        logging: LoggingSettings {
            level: logging
                .as_ref()
                .and_then(|l| l.level.clone())
                .unwrap_or(default.logging.level),
        },
    })
}
