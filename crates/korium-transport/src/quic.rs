//! QUIC/TLS 1.3 transport for the Korium DHT.
//!
//! Every node runs a single [`quinn`] endpoint in both roles: it listens
//! for inbound connections and initiates outbound ones. Each RPC opens a
//! fresh connection and bidirectional stream scoped to that one exchange;
//! the stream carries one length-prefixed request and, for request verbs,
//! one length-prefixed response.
//!
//! Nodes use self-signed TLS certificates; peer authentication happens at
//! the DHT layer through signed values and ids, not at the TLS layer. The
//! ALPN protocol identifier is `korium/1`.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, ServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::task::JoinHandle;

use crate::channel::{InboundHandler, RpcTransport};
use crate::wire::MAX_PAYLOAD_SIZE;
use crate::{Result, TransportError};

/// ALPN protocol identifier for Korium protocol version 1.
pub const ALPN_KORIUM_V1: &[u8] = b"korium/1";

/// Default QUIC idle timeout in milliseconds.
pub const DEFAULT_IDLE_TIMEOUT_MS: u32 = 30_000;

/// Upper bound on a framed message, envelope overhead included.
const MAX_FRAME_SIZE: usize = MAX_PAYLOAD_SIZE + 4096;

/// Configuration for the QUIC transport.
#[derive(Clone)]
pub struct QuicConfig {
    /// Local address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum idle timeout in milliseconds.
    pub idle_timeout_ms: u32,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

/// A QUIC transport bound to a local UDP socket.
pub struct QuicTransport {
    endpoint: Endpoint,
    local_addr: SocketAddr,
}

impl QuicTransport {
    /// Bind the endpoint and start listening.
    ///
    /// Failure here is fatal for the node: without a listening socket it
    /// cannot join the network.
    pub fn start_listening(config: QuicConfig) -> Result<Self> {
        let server_config = build_server_config(config.idle_timeout_ms)?;
        let client_config = build_client_config()?;

        let mut endpoint = Endpoint::server(server_config, config.bind_addr)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        endpoint.set_default_client_config(client_config);

        let local_addr = endpoint
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;

        tracing::info!(%local_addr, "QUIC transport listening");

        Ok(Self {
            endpoint,
            local_addr,
        })
    }

    /// The local socket address this transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Close the endpoint; in-flight RPCs terminate with errors.
    pub fn stop_listening(&self) {
        self.endpoint.close(quinn::VarInt::from_u32(0), b"leaving");
    }

    /// Spawn the accept loop, dispatching each inbound stream to `handler`.
    ///
    /// The returned task runs until [`stop_listening`](Self::stop_listening)
    /// closes the endpoint.
    pub fn serve(&self, handler: Arc<dyn InboundHandler>) -> JoinHandle<()> {
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    match incoming.await {
                        Ok(connection) => serve_connection(connection, handler).await,
                        Err(e) => tracing::debug!(error = %e, "inbound connection failed"),
                    }
                });
            }
            tracing::debug!("QUIC accept loop stopped");
        })
    }

    /// Open a one-shot connection and stream to `addr`.
    async fn open_stream(&self, addr: SocketAddr) -> Result<(Connection, SendStream, RecvStream)> {
        let connecting = self
            .endpoint
            .connect(addr, "korium-node")
            .map_err(|e| match e {
                quinn::ConnectError::InvalidRemoteAddress(_) => {
                    TransportError::InvalidAddress(addr.to_string())
                }
                quinn::ConnectError::EndpointStopping => TransportError::NoSocket,
                other => TransportError::Connect(other.to_string()),
            })?;
        let connection = connecting
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok((connection, send, recv))
    }
}

#[async_trait::async_trait]
impl RpcTransport for QuicTransport {
    async fn request(
        &self,
        to: SocketAddr,
        payload: Vec<u8>,
        timeout: std::time::Duration,
    ) -> Result<Vec<u8>> {
        let exchange = async {
            let (_connection, mut send, mut recv) = self.open_stream(to).await?;
            send_framed(&mut send, &payload).await?;
            send.finish()
                .map_err(|e| TransportError::Io(e.to_string()))?;
            recv_framed(&mut recv, MAX_FRAME_SIZE).await
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    async fn notify(&self, to: SocketAddr, payload: Vec<u8>) -> Result<()> {
        let (_connection, mut send, _recv) = self.open_stream(to).await?;
        send_framed(&mut send, &payload).await?;
        send.finish()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Serve streams on one inbound connection until the peer closes it.
async fn serve_connection(connection: Connection, handler: Arc<dyn InboundHandler>) {
    let remote = connection.remote_address();
    loop {
        match connection.accept_bi().await {
            Ok((mut send, mut recv)) => {
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    match recv_framed(&mut recv, MAX_FRAME_SIZE).await {
                        Ok(request) => {
                            if let Some(response) = handler.handle(request, remote).await {
                                if let Err(e) = send_framed(&mut send, &response).await {
                                    tracing::debug!(error = %e, %remote, "response write failed");
                                }
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, %remote, "request read failed"),
                    }
                });
            }
            Err(quinn::ConnectionError::ApplicationClosed(_))
            | Err(quinn::ConnectionError::LocallyClosed) => break,
            Err(e) => {
                tracing::debug!(error = %e, %remote, "connection error");
                break;
            }
        }
    }
}

/// Write one length-prefixed message: `[length:4 LE][data:length]`.
async fn send_framed(stream: &mut SendStream, data: &[u8]) -> Result<()> {
    let len = u32::try_from(data.len()).map_err(|_| {
        TransportError::ProtocolViolation("message too large for 4-byte length prefix".to_string())
    })?;
    stream
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    stream
        .write_all(data)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(())
}

/// Read one length-prefixed message: `[length:4 LE][data:length]`.
async fn recv_framed(stream: &mut RecvStream, max_size: usize) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    let len = u32::from_le_bytes(len_buf) as usize;

    if len > max_size {
        return Err(TransportError::ProtocolViolation(format!(
            "message length {len} exceeds maximum {max_size}"
        )));
    }

    let mut buf = vec![0u8; len];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    Ok(buf)
}

// ---------------------------------------------------------------------------
// TLS / certificate helpers
// ---------------------------------------------------------------------------

/// Generate a self-signed TLS certificate and private key for QUIC.
fn generate_self_signed_cert() -> Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let key_pair = rcgen::KeyPair::generate_for(&rcgen::PKCS_ED25519)
        .map_err(|e| TransportError::SetOption(format!("key generation failed: {e}")))?;

    let params = rcgen::CertificateParams::new(vec!["korium-node".to_string()])
        .map_err(|e| TransportError::SetOption(format!("cert params failed: {e}")))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| TransportError::SetOption(format!("self-signed cert failed: {e}")))?;

    let cert_der = CertificateDer::from(cert.der().to_vec());
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    Ok((cert_der, key_der))
}

/// Build a Quinn [`ServerConfig`] with self-signed TLS and the Korium ALPN.
fn build_server_config(idle_timeout_ms: u32) -> Result<ServerConfig> {
    let (cert_der, key_der) = generate_self_signed_cert()?;

    let provider = rustls::crypto::ring::default_provider();
    let mut tls_config = rustls::ServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::SetOption(format!("server TLS version config failed: {e}")))?
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .map_err(|e| TransportError::SetOption(format!("server TLS config failed: {e}")))?;

    tls_config.alpn_protocols = vec![ALPN_KORIUM_V1.to_vec()];

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(
        quinn::IdleTimeout::try_from(std::time::Duration::from_millis(u64::from(idle_timeout_ms)))
            .map_err(|e| TransportError::SetOption(format!("idle timeout config failed: {e}")))?,
    ));

    let mut server_config = ServerConfig::with_crypto(Arc::new(
        quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
            .map_err(|e| TransportError::SetOption(format!("QUIC server crypto failed: {e}")))?,
    ));
    server_config.transport_config(Arc::new(transport));

    Ok(server_config)
}

/// Build a Quinn [`ClientConfig`] that accepts any server certificate.
///
/// TLS provides transport encryption only; identity is established by the
/// DHT's signed values, so self-signed peer certificates are accepted.
fn build_client_config() -> Result<ClientConfig> {
    let provider = rustls::crypto::ring::default_provider();
    let mut tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TransportError::SetOption(format!("client TLS version config failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(SkipServerVerification))
        .with_no_client_auth();

    tls_config.alpn_protocols = vec![ALPN_KORIUM_V1.to_vec()];

    let client_config = ClientConfig::new(Arc::new(
        quinn::crypto::rustls::QuicClientConfig::try_from(tls_config)
            .map_err(|e| TransportError::SetOption(format!("QUIC client crypto failed: {e}")))?,
    ));

    Ok(client_config)
}

/// TLS certificate verifier that accepts any server certificate.
#[derive(Debug)]
struct SkipServerVerification;

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpn_value() {
        assert_eq!(ALPN_KORIUM_V1, b"korium/1");
    }

    #[test]
    fn test_default_config() {
        let config = QuicConfig::default();
        assert_eq!(config.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT_MS);
        assert_eq!(config.bind_addr.port(), 0);
    }

    #[test]
    fn test_generate_self_signed_cert() {
        let (cert, key) = generate_self_signed_cert().expect("cert generation");
        assert!(!cert.is_empty());
        match &key {
            PrivateKeyDer::Pkcs8(k) => assert!(!k.secret_pkcs8_der().is_empty()),
            _ => unreachable!("expected PKCS8 key"),
        }
    }

    #[test]
    fn test_build_server_config_succeeds() {
        assert!(build_server_config(DEFAULT_IDLE_TIMEOUT_MS).is_ok());
    }

    #[test]
    fn test_build_client_config_succeeds() {
        assert!(build_client_config().is_ok());
    }
}
