//! Host normalization and Basic authentication shared by the RPC and stream
//! clients.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use secrecy::{ExposeSecret, SecretString};

const DEFAULT_SCHEME: &str = "http://";
const WEBSOCKET_PATH: &str = "/ws";

/// Node address used to derive RPC and websocket URLs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    base_url: String,
}

impl Endpoint {
    /// Builds an endpoint from a host string.
    ///
    /// Hosts that already carry a scheme (`http://`, `https://`) are kept
    /// as-is; bare `host:port` values get `http://` prepended.
    pub fn new(host: impl AsRef<str>) -> Self {
        let host = host.as_ref().trim();
        let base_url = if has_scheme(host) {
            host.to_string()
        } else {
            format!("{DEFAULT_SCHEME}{host}")
        };

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL for a method-dispatch RPC call.
    pub fn rpc_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method.trim_start_matches('/'))
    }

    /// Websocket URL for the event stream (`ws`/`wss` scheme, `/ws` path).
    pub fn websocket_url(&self) -> String {
        let swapped = match self.base_url.split_once("://") {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("https") => {
                format!("wss://{rest}")
            }
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") => {
                format!("ws://{rest}")
            }
            _ => self.base_url.clone(),
        };
        format!("{swapped}{WEBSOCKET_PATH}")
    }

    /// Host portion used in diagnostics.
    pub fn host(&self) -> &str {
        self.base_url
            .split_once("://")
            .map_or(self.base_url.as_str(), |(_, rest)| rest)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}

fn has_scheme(host: &str) -> bool {
    host.split_once("://").is_some_and(|(scheme, _)| {
        !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
    })
}

/// Node password; the username of the Basic scheme is always empty.
#[derive(Clone)]
pub struct Credentials {
    password: SecretString,
}

impl Credentials {
    pub fn new(password: SecretString) -> Self {
        Self { password }
    }

    /// `Authorization` header value: `Basic base64(":" + password)`.
    pub fn authorization_header(&self) -> String {
        let token = BASE64_STANDARD.encode(format!(":{}", self.password.expose_secret()));
        format!("Basic {token}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl From<SecretString> for Credentials {
    fn from(password: SecretString) -> Self {
        Self::new(password)
    }
}
