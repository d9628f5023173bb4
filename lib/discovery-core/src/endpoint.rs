//! Endpoint parsing

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resolved (host, port) pair
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The "nothing registered" sentinel returned by discovery
    pub fn empty() -> Self {
        Self {
            host: String::new(),
            port: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }

    /// Parse a `host:port` uri, splitting on the last colon
    pub fn parse(uri: &str) -> Result<Self> {
        let (host, port) = uri
            .rsplit_once(':')
            .ok_or_else(|| CoreError::InvalidUri(uri.to_string()))?;

        // [::1]:8080
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(CoreError::InvalidUri(uri.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| CoreError::InvalidUri(uri.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
