use serde::Deserialize;
use url::Url;

use crate::utils::error::{Error, Result};

/// Top-level configuration settings for the application.
///
/// Groups the broker connection, the forum identity, the in-process broker
/// server and logging.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub forum: ForumSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

/// Where the broker client connects and how long it waits.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

/// Identity of this forum participant. `user_id` is both the durable client
/// id and the name of the private queue.
#[derive(Debug, Deserialize, Clone)]
pub struct ForumSettings {
    pub user_id: String,
}

/// Configuration settings for the in-process broker server.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub message_ttl_secs: u64,
    pub max_messages_per_queue: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Settings with every field optional. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub forum: Option<PartialForumSettings>,
    pub server: Option<PartialServerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub url: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialForumSettings {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_path: Option<String>,
    pub message_ttl_secs: Option<u64>,
    pub max_messages_per_queue: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// The defaults point the client at the in-process broker on its default port.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                url: "ws://127.0.0.1:61616".to_string(),
                connect_timeout_ms: 5000,
                request_timeout_ms: 5000,
            },
            forum: ForumSettings {
                user_id: "user-1".to_string(),
            },
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 61616,
                database_path: "forumsub_db".to_string(),
                message_ttl_secs: 3600,
                max_messages_per_queue: 1000,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Checks the values once at startup so that a bad configuration fails
    /// before any connection is attempted.
    pub fn validate(&self) -> Result<()> {
        validate_broker_url(&self.broker.url)?;

        if self.forum.user_id.trim().is_empty() {
            return Err(Error::Config("forum.user_id must not be empty".to_string()));
        }
        if self.broker.connect_timeout_ms == 0 {
            return Err(Error::Config(
                "broker.connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.broker.request_timeout_ms == 0 {
            return Err(Error::Config(
                "broker.request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.server.message_ttl()?;
        Ok(())
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl ServerSettings {
    /// Backlog TTL in seconds, as stored by persistence. Fails when the value
    /// does not fit a millisecond timestamp.
    pub fn message_ttl(&self) -> Result<i64> {
        i64::try_from(self.message_ttl_secs)
            .ok()
            .filter(|secs| secs.checked_mul(1000).is_some())
            .ok_or_else(|| {
                Error::Config(format!(
                    "server.message_ttl_secs is out of range: {}",
                    self.message_ttl_secs
                ))
            })
    }
}

/// Parses a broker URL and checks it is a WebSocket endpoint with a host.
pub fn validate_broker_url(raw: &str) -> Result<Url> {
    let invalid = |reason: &str| Error::InvalidBrokerUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => return Err(invalid(&format!("unsupported scheme `{other}`"))),
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(url)
}
