//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SecurityError;
use crate::net::receiver::FailurePolicy;
use crate::protocol::length_prefixed::DEFAULT_MAX_FRAME_BYTES;
use crate::security::{NoSecurity, StreamSecurity, TlsClientSecurity, TlsServerSecurity};

/// Root configuration for the transport.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransportConfig {
    /// Inbound listener settings.
    pub listener: ListenerConfig,

    /// Outgoing batch settings.
    pub outbound: OutboundConfig,

    /// Framing limits.
    pub protocol: ProtocolConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2200").
    pub bind_address: String,

    /// What a failed connection does to the shared inbound sequence.
    pub failure_policy: FailurePolicy,

    /// Seconds a connection may stay silent (handshake or between frames)
    /// before it is dropped.
    pub receive_timeout_secs: u64,

    /// Seconds to wait for open connections after the receiver stops.
    pub drain_timeout_secs: u64,

    /// Optional TLS for accepted connections.
    pub tls: Option<ServerTlsConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2200".to_string(),
            failure_policy: FailurePolicy::default(),
            receive_timeout_secs: 5,
            drain_timeout_secs: 5,
            tls: None,
        }
    }
}

impl ListenerConfig {
    pub fn endpoint(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.bind_address.parse()
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    /// Security transform for accepted streams.
    pub fn security(&self) -> Result<Arc<dyn StreamSecurity>, SecurityError> {
        match &self.tls {
            Some(tls) => Ok(Arc::new(TlsServerSecurity::from_pem_files(
                &tls.cert_path,
                &tls.key_path,
            )?)),
            None => Ok(Arc::new(NoSecurity)),
        }
    }
}

/// TLS certificate and key for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerTlsConfig {
    /// Path to certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Path to private key (PEM).
    pub key_path: PathBuf,
}

/// Outgoing batch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Optional TLS for outgoing connections.
    pub tls: Option<ClientTlsConfig>,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            tls: None,
        }
    }
}

impl OutboundConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Security transform for connected streams.
    pub fn security(&self) -> Result<Arc<dyn StreamSecurity>, SecurityError> {
        match &self.tls {
            Some(tls) => {
                let mut security = TlsClientSecurity::from_ca_file(&tls.ca_path)?;
                if let Some(name) = &tls.server_name {
                    security = security.with_server_name(name.clone());
                }
                Ok(Arc::new(security))
            }
            None => Ok(Arc::new(NoSecurity)),
        }
    }
}

/// Trust settings for outgoing TLS.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientTlsConfig {
    /// CA bundle used to verify destinations (PEM).
    pub ca_path: PathBuf,

    /// Name to verify instead of the destination host.
    #[serde(default)]
    pub server_name: Option<String>,
}

/// Framing limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Largest accepted frame body in bytes.
    pub max_frame_bytes: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `tracing` filter directive, overridden by `RUST_LOG`.
    pub log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "queue_transport=info".to_string(),
        }
    }
}
