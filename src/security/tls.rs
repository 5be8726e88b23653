//! TLS transforms built on rustls.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use super::StreamSecurity;
use crate::error::SecurityError;
use crate::net::destination::Destination;
use crate::net::stream::BoxedStream;

/// Load certificates from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SecurityError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(SecurityError::Config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, SecurityError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        SecurityError::Config(format!("no private key found in {}", path.display()))
    })
}

/// Client-side TLS for outgoing batches.
///
/// The server name is the destination host unless an override is set.
#[derive(Clone)]
pub struct TlsClientSecurity {
    connector: TlsConnector,
    server_name: Option<String>,
}

impl TlsClientSecurity {
    pub fn new(config: Arc<ClientConfig>) -> Self {
        Self {
            connector: TlsConnector::from(config),
            server_name: None,
        }
    }

    /// Trust the certificates in a PEM bundle.
    pub fn from_ca_file(ca_path: &Path) -> Result<Self, SecurityError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots
                .add(cert)
                .map_err(|e| SecurityError::Config(e.to_string()))?;
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::new(Arc::new(config)))
    }

    /// Verify the peer against `name` instead of the destination host.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

impl std::fmt::Debug for TlsClientSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsClientSecurity")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamSecurity for TlsClientSecurity {
    async fn apply<'a>(
        &self,
        destination: &Destination,
        stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError> {
        let name = self
            .server_name
            .clone()
            .unwrap_or_else(|| destination.host().to_string());
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| SecurityError::InvalidServerName(name))?;

        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(SecurityError::Handshake)?;
        tracing::debug!(destination = %destination, "TLS handshake complete");
        Ok(Box::new(tls))
    }
}

/// Server-side TLS for accepted connections.
#[derive(Clone)]
pub struct TlsServerSecurity {
    acceptor: TlsAcceptor,
}

impl TlsServerSecurity {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
        }
    }

    /// Build from PEM certificate chain and key files.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, SecurityError> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| SecurityError::Config(e.to_string()))?;
        Ok(Self::new(Arc::new(config)))
    }
}

impl std::fmt::Debug for TlsServerSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServerSecurity").finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamSecurity for TlsServerSecurity {
    async fn apply<'a>(
        &self,
        destination: &Destination,
        stream: BoxedStream<'a>,
    ) -> Result<BoxedStream<'a>, SecurityError> {
        let tls = self
            .acceptor
            .accept(stream)
            .await
            .map_err(SecurityError::Handshake)?;
        tracing::debug!(endpoint = %destination, "TLS session accepted");
        Ok(Box::new(tls))
    }
}
