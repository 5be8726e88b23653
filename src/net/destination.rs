//! Outbound destination addresses.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::error::TransportError;

/// Scheme used for plain queue endpoints.
pub const DEFAULT_SCHEME: &str = "lq.tcp";

/// A remote endpoint for an outgoing batch, parsed from `scheme://host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    scheme: String,
    host: String,
    port: u16,
}

impl Destination {
    /// Parse a destination URI. Host and port are both required.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let invalid = |reason: &str| TransportError::InvalidDestination {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(uri).map_err(|e| invalid(&e.to_string()))?;
        let host = match url.host_str() {
            Some(h) if !h.is_empty() => h.trim_start_matches('[').trim_end_matches(']'),
            _ => return Err(invalid("missing host")),
        };
        let port = url.port().ok_or_else(|| invalid("missing port"))?;

        Ok(Self {
            scheme: url.scheme().to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Build a destination from parts.
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// Destination naming a socket address, used for the inbound side.
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self::new(DEFAULT_SCHEME, addr.ip().to_string(), addr.port())
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

impl std::str::FromStr for Destination {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
