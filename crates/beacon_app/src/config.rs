//! Environment configuration for the host binary.

use beacon_engine::{SubscriberSettings, TransportConfig};
use log::LevelFilter;

use crate::logging::LogDestination;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// `None` runs against the in-process loopback transport.
    pub transport: Option<TransportConfig>,
    pub subscriber_id: String,
    pub subscriber: SubscriberSettings,
    pub api_base: Option<String>,
    pub fetch_locator: Option<String>,
    pub log_level: LevelFilter,
    pub log_destination: LogDestination,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = match get("BEACON_WS_HOST") {
            Some(host) => {
                let key = get("BEACON_WS_KEY").ok_or(ConfigError::Missing("BEACON_WS_KEY"))?;
                let mut transport = TransportConfig::new(host, key);
                if let Some(raw) = get("BEACON_WS_PORT") {
                    let port = raw.parse().map_err(|_| ConfigError::Invalid {
                        name: "BEACON_WS_PORT",
                        value: raw.clone(),
                    })?;
                    transport = transport.with_port(port);
                }
                if let Some(scheme) = get("BEACON_WS_SCHEME") {
                    if scheme != "ws" && scheme != "wss" {
                        return Err(ConfigError::Invalid {
                            name: "BEACON_WS_SCHEME",
                            value: scheme,
                        });
                    }
                    transport = transport.with_scheme(scheme);
                }
                if let Some(endpoint) = get("BEACON_AUTH_ENDPOINT") {
                    transport = transport.with_auth_endpoint(endpoint);
                }
                if let Some(token) = get("BEACON_AUTH_TOKEN") {
                    transport = transport.with_auth_token(token);
                }
                Some(transport)
            }
            None => None,
        };

        let mut subscriber = SubscriberSettings::default();
        if let Some(prefix) = get("BEACON_CHANNEL_PREFIX") {
            subscriber.channel_prefix = prefix;
        }
        if let Some(event_name) = get("BEACON_EVENT_NAME") {
            subscriber.event_name = event_name;
        }

        let log_level = match get("BEACON_LOG_LEVEL") {
            Some(raw) => beacon_logging::parse_level(&raw).ok_or(ConfigError::Invalid {
                name: "BEACON_LOG_LEVEL",
                value: raw,
            })?,
            None => LevelFilter::Info,
        };
        let log_destination = match get("BEACON_LOG_DESTINATION") {
            Some(raw) => LogDestination::parse(&raw).ok_or(ConfigError::Invalid {
                name: "BEACON_LOG_DESTINATION",
                value: raw,
            })?,
            None => LogDestination::default(),
        };

        Ok(Self {
            transport,
            subscriber_id: get("BEACON_SUBSCRIBER_ID")
                .ok_or(ConfigError::Missing("BEACON_SUBSCRIBER_ID"))?,
            subscriber,
            api_base: get("BEACON_API_BASE"),
            fetch_locator: get("BEACON_FETCH_LOCATOR"),
            log_level,
            log_destination,
        })
    }
}
