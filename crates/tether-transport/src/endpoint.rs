//! Gateway endpoint description.

use crate::traits::TransportError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where the gateway lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Gateway host name or address.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Request path of the WebSocket endpoint.
    #[serde(default = "default_path")]
    pub path: String,
    /// Use TLS (`wss://`).
    #[serde(default)]
    pub secure: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl Endpoint {
    /// Create a plain-text endpoint at `/`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            path: default_path(),
            secure: false,
        }
    }

    /// Set the request path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        self.path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self
    }

    /// Toggle TLS.
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// URL scheme for this endpoint.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// Full WebSocket URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme(), self.host, self.port, self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    /// Parse `ws://host[:port][/path]` or `wss://...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secure, rest) = if let Some(rest) = s.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix("ws://") {
            (false, rest)
        } else {
            return Err(TransportError::InvalidEndpoint(format!(
                "expected ws:// or wss:// scheme in {s:?}"
            )));
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    TransportError::InvalidEndpoint(format!("invalid port in {s:?}"))
                })?;
                (host, port)
            }
            None => (authority, if secure { 443 } else { 80 }),
        };

        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(format!(
                "missing host in {s:?}"
            )));
        }

        Ok(Endpoint {
            host: host.to_string(),
            port,
            path: path.to_string(),
            secure,
        })
    }
}
