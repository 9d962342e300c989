//! QUIC transport over Quinn.
//!
//! Clients open one bidirectional stream and write request frames on it. The
//! server answers on a single server-opened unidirectional stream per
//! connection, so every event for a connection travels in one ordered
//! sequence. ALPN is `parlor`.
//!
//! TLS material comes either from PEM files or, for local development, from a
//! self-signed certificate generated at startup.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use parlor_proto::ALPN_PROTOCOL;
use quinn::{Endpoint, RecvStream, SendStream, ServerConfig, TransportConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::ServerError;

/// QUIC keep-alive, well under the idle timeout so quiet clients stay up.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Where the TLS certificate comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMaterial {
    /// PEM certificate chain and private key on disk
    Files {
        /// Certificate chain path
        cert_path: String,
        /// Private key path
        key_path: String,
    },
    /// Generate a throwaway certificate for `localhost`
    SelfSigned,
}

impl TlsMaterial {
    /// Files when both paths are given, self-signed otherwise.
    pub fn from_paths(cert_path: Option<String>, key_path: Option<String>) -> Self {
        match (cert_path, key_path) {
            (Some(cert_path), Some(key_path)) => Self::Files { cert_path, key_path },
            _ => Self::SelfSigned,
        }
    }
}

/// QUIC endpoint accepting Parlor connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Bind a server endpoint.
    ///
    /// # Errors
    ///
    /// - `ServerError::Config` for an unparsable address or bad TLS material
    /// - `ServerError::Transport` if the socket cannot be bound
    pub fn bind(address: &str, tls: &TlsMaterial) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let (certs, key) = match tls {
            TlsMaterial::Files { cert_path, key_path } => load_pem(cert_path, key_path)?,
            TlsMaterial::SelfSigned => self_signed()?,
        };
        let server_config = server_config(certs, key)?;

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Wait for the next connection to complete its handshake.
    ///
    /// Returns `Ok(None)` once the endpoint has been closed.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if this handshake failed; the endpoint
    ///   keeps accepting
    pub async fn accept(&self) -> Result<Option<QuinnConnection>, ServerError> {
        let Some(incoming) = self.endpoint.accept().await else {
            return Ok(None);
        };

        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("handshake failed: {e}")))?;

        Ok(Some(QuinnConnection { connection }))
    }

    /// Local address the endpoint is bound to.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the socket is gone
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self, reason: &str) {
        self.endpoint.close(0u32.into(), reason.as_bytes());
    }
}

/// One QUIC connection. Clones share the connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Wait for the client to open a request stream.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` once the connection is closed
    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream), ServerError> {
        self.connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi failed: {e}")))
    }

    /// Open the outbound event stream.
    ///
    /// # Errors
    ///
    /// - `ServerError::Transport` if the connection is closed
    pub async fn open_uni(&self) -> Result<SendStream, ServerError> {
        self.connection
            .open_uni()
            .await
            .map_err(|e| ServerError::Transport(format!("open_uni failed: {e}")))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close with application code 0 and a reason string.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}

fn load_pem(
    cert_path: &str,
    key_path: &str,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| ServerError::Config(format!("failed to read cert '{cert_path}': {e}")))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| ServerError::Config(format!("failed to read key '{key_path}': {e}")))?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config(format!("no private key in '{key_path}'")))?;

    Ok((certs, key))
}

fn self_signed() -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let key = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    tracing::warn!("using self-signed certificate, not for production use");

    Ok((vec![cert.cert.der().clone()], key.into()))
}

fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<ServerConfig, ServerError> {
    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;

    let mut transport = TransportConfig::default();
    transport.keep_alive_interval(Some(KEEP_ALIVE_INTERVAL));

    let mut server_config = ServerConfig::with_crypto(Arc::new(crypto));
    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_with_self_signed() {
        let transport = QuinnTransport::bind("127.0.0.1:0", &TlsMaterial::SelfSigned).unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0, "Should have assigned a port");
    }

    #[tokio::test]
    async fn rejects_invalid_address() {
        let result = QuinnTransport::bind("invalid:address:format", &TlsMaterial::SelfSigned);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn missing_pem_files_are_config_errors() {
        let tls = TlsMaterial::Files {
            cert_path: "/nonexistent/cert.pem".to_string(),
            key_path: "/nonexistent/key.pem".to_string(),
        };
        let result = QuinnTransport::bind("127.0.0.1:0", &tls);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn tls_material_needs_both_paths() {
        assert_eq!(TlsMaterial::from_paths(Some("c".into()), None), TlsMaterial::SelfSigned);
        assert_eq!(
            TlsMaterial::from_paths(Some("c".into()), Some("k".into())),
            TlsMaterial::Files { cert_path: "c".into(), key_path: "k".into() }
        );
    }
}
