//! Client configuration.
//!
//! A [`ClientConfig`] can be deserialized from any serde source, loaded from
//! `ECLAIR_*` environment variables, or built in code. Durations are given in
//! whole seconds.

use std::env;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::Deserialize;
use thiserror::Error;

use crate::backoff::Backoff;
use crate::endpoint::{Credentials, Endpoint};
use crate::rpc::{EndpointStyle, RpcClient, RpcClientOptions};
use crate::stream::classify::ReconnectPolicy;
use crate::stream::client::{EventStreamClient, EventStreamOptions, StreamDefaults};

pub const ENV_HOST: &str = "ECLAIR_HOST";
pub const ENV_PASSWORD: &str = "ECLAIR_PASSWORD";
pub const ENV_CALL_TIMEOUT_SECS: &str = "ECLAIR_CALL_TIMEOUT_SECS";
pub const ENV_ENDPOINT_STYLE: &str = "ECLAIR_ENDPOINT_STYLE";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "ECLAIR_CONNECT_TIMEOUT_SECS";
pub const ENV_HEARTBEAT_SECS: &str = "ECLAIR_HEARTBEAT_SECS";
pub const ENV_RECONNECT_DELAY_SECS: &str = "ECLAIR_RECONNECT_DELAY_SECS";
pub const ENV_RECONNECT_POLICY: &str = "ECLAIR_RECONNECT_POLICY";

#[derive(Clone, Debug, Deserialize)]
pub struct ClientConfig {
    /// `host:port` or a full `http(s)://` URL.
    pub host: String,
    pub password: SecretString,
    #[serde(default = "defaults::call_timeout", with = "seconds")]
    pub call_timeout: Duration,
    #[serde(default)]
    pub endpoint_style: EndpointStyle,
    #[serde(default = "defaults::connect_timeout", with = "seconds")]
    pub connect_timeout: Duration,
    #[serde(default = "defaults::heartbeat_interval", with = "seconds")]
    pub heartbeat_interval: Duration,
    #[serde(default = "defaults::reconnect_delay", with = "seconds")]
    pub reconnect_delay: Duration,
    #[serde(default)]
    pub reconnect_policy: ReconnectPolicy,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, password: SecretString) -> Self {
        Self {
            host: host.into(),
            password,
            call_timeout: defaults::call_timeout(),
            endpoint_style: EndpointStyle::default(),
            connect_timeout: defaults::connect_timeout(),
            heartbeat_interval: defaults::heartbeat_interval(),
            reconnect_delay: defaults::reconnect_delay(),
            reconnect_policy: ReconnectPolicy::default(),
        }
    }

    /// Loads the configuration from `ECLAIR_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(ENV_HOST).ok_or(ConfigError::Missing(ENV_HOST))?;
        let password = lookup(ENV_PASSWORD).ok_or(ConfigError::Missing(ENV_PASSWORD))?;
        let mut config = Self::new(host, SecretString::new(password));

        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_SECS) {
            config.call_timeout = parse_seconds(ENV_CALL_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ENDPOINT_STYLE) {
            config.endpoint_style = parse_enum(ENV_ENDPOINT_STYLE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT_SECS) {
            config.connect_timeout = parse_seconds(ENV_CONNECT_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_HEARTBEAT_SECS) {
            config.heartbeat_interval = parse_seconds(ENV_HEARTBEAT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_DELAY_SECS) {
            config.reconnect_delay = parse_seconds(ENV_RECONNECT_DELAY_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RECONNECT_POLICY) {
            config.reconnect_policy = parse_enum(ENV_RECONNECT_POLICY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_endpoint_style(mut self, endpoint_style: EndpointStyle) -> Self {
        self.endpoint_style = endpoint_style;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    pub fn with_reconnect_policy(mut self, reconnect_policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = reconnect_policy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing("host"));
        }
        if self.password.expose_secret().is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                option: "call_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                option: "heartbeat_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(&self.host)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.password.clone())
    }

    pub fn rpc_client(&self) -> Result<RpcClient, ConfigError> {
        self.validate()?;
        let options = RpcClientOptions {
            call_timeout: self.call_timeout,
            connect_timeout: self.connect_timeout,
            endpoint_style: self.endpoint_style,
        };
        Ok(RpcClient::with_options(
            self.endpoint(),
            self.credentials(),
            options,
        )?)
    }

    pub fn event_stream_client(&self) -> Result<EventStreamClient, ConfigError> {
        self.validate()?;
        let options = EventStreamOptions {
            heartbeat_interval: self.heartbeat_interval,
            reconnect_delay: self.reconnect_delay,
            dial_backoff: Backoff::default(),
            dial_timeout: StreamDefaults::DIAL_TIMEOUT,
            reconnect_policy: self.reconnect_policy,
        };
        Ok(EventStreamClient::new(self.endpoint(), self.credentials()).with_options(options))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{option}`: {reason}")]
    Invalid {
        option: &'static str,
        reason: String,
    },

    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

fn parse_seconds(option: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|err| ConfigError::Invalid {
            option,
            reason: err.to_string(),
        })
}

fn parse_enum<T: DeserializeOwned>(option: &'static str, raw: &str) -> Result<T, ConfigError> {
    T::deserialize(raw.trim().to_ascii_lowercase().into_deserializer()).map_err(
        |err: serde::de::value::Error| ConfigError::Invalid {
            option,
            reason: err.to_string(),
        },
    )
}

mod defaults {
    use std::time::Duration;

    use crate::rpc::RpcDefaults;
    use crate::stream::client::StreamDefaults;

    pub(super) fn call_timeout() -> Duration {
        RpcDefaults::CALL_TIMEOUT
    }

    pub(super) fn connect_timeout() -> Duration {
        RpcDefaults::CONNECT_TIMEOUT
    }

    pub(super) fn heartbeat_interval() -> Duration {
        StreamDefaults::HEARTBEAT_INTERVAL
    }

    pub(super) fn reconnect_delay() -> Duration {
        StreamDefaults::RECONNECT_DELAY
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
