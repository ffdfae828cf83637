//! QUIC transport.
//!
//! [`QuicTransport`] opens one long-lived bidirectional stream per
//! connection. Frames travel back to back in both directions: a frame's own
//! header carries its length, so the stream needs no extra delimiting and
//! frames arrive in the order they were pushed.
//!
//! The first exchange on the stream is the handshake: the client sends
//! `Hello{version, userId}` and the server must answer `HelloReply` (or
//! `Goodbye` to refuse) within `connect_timeout`.

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use bytes::BytesMut;
use parley_core::ConnectionError;
use parley_proto::{
    Frame, Payload, UserId,
    payloads::session::{Hello, PROTOCOL_VERSION},
};
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use rustls::{
    DigitallySignedStruct, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::WebPkiSupportedAlgorithms,
    pki_types::{CertificateDer, ServerName, UnixTime},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{Channel, Transport};

/// QUIC transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server address
    pub server_addr: SocketAddr,
    /// Name the server certificate must be valid for
    pub server_name: String,
    /// ALPN protocol; must match the server
    pub alpn: Vec<u8>,
    /// Bound on QUIC handshake plus Hello/HelloReply
    pub connect_timeout: Duration,
    /// Connection closes after this long without traffic
    pub idle_timeout: Duration,
    /// Trusted roots for server certificate verification
    pub root_certificates: Vec<CertificateDer<'static>>,
    /// Skip certificate chain and name checks. Development only.
    pub accept_invalid_certs: bool,
    /// Bearer token sent in `Hello`
    pub auth_token: Option<String>,
    /// Frames buffered per direction before backpressure
    pub channel_capacity: usize,
}

impl TransportConfig {
    /// Local development preset: `localhost`, any certificate accepted.
    pub fn development(server_addr: SocketAddr) -> Self {
        Self {
            server_addr,
            server_name: "localhost".to_string(),
            alpn: b"parley".to_vec(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            root_certificates: Vec::new(),
            accept_invalid_certs: true,
            auth_token: None,
            channel_capacity: 256,
        }
    }
}

/// [`Transport`] over QUIC.
pub struct QuicTransport {
    config: TransportConfig,
    endpoint: Endpoint,
}

impl QuicTransport {
    /// Bind a client endpoint.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Transport` if the TLS configuration is invalid or
    ///   the local socket cannot be bound
    pub fn new(config: TransportConfig) -> Result<Self, ConnectionError> {
        let bind: SocketAddr = if config.server_addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };

        let mut endpoint = Endpoint::client(bind)?;
        endpoint.set_default_client_config(client_config(&config)?);
        Ok(Self { config, endpoint })
    }

    async fn handshake(&self, identity: UserId) -> Result<Channel, ConnectionError> {
        let connection = self
            .endpoint
            .connect(self.config.server_addr, &self.config.server_name)
            .map_err(|e| ConnectionError::Transport(format!("connect failed: {e}")))?
            .await
            .map_err(|e| ConnectionError::Transport(format!("connection failed: {e}")))?;

        let (mut send, mut recv) = connection
            .open_bi()
            .await
            .map_err(|e| ConnectionError::Transport(format!("stream open failed: {e}")))?;

        let hello = Payload::Hello(Hello {
            version: PROTOCOL_VERSION,
            user_id: identity,
            auth_token: self.config.auth_token.clone(),
        });
        write_frame(&mut send, &hello.into_frame()?).await?;

        let reply = read_frame(&mut recv)
            .await?
            .ok_or_else(|| ConnectionError::Rejected("server closed stream during handshake".to_string()))?;
        match Payload::from_frame(&reply)? {
            Payload::HelloReply(reply) => debug!(session_id = reply.session_id, "handshake complete"),
            Payload::Goodbye(goodbye) => return Err(ConnectionError::Rejected(goodbye.reason)),
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "expected hello_reply, got {}",
                    other.opcode().event_name()
                )));
            },
        }

        let (to_server_tx, to_server_rx) = mpsc::channel(self.config.channel_capacity);
        let (from_server_tx, from_server_rx) = mpsc::channel(self.config.channel_capacity);
        let task = tokio::spawn(run_connection(connection, send, recv, to_server_rx, from_server_tx));

        Ok(Channel::with_task(to_server_tx, from_server_rx, task.abort_handle()))
    }
}

impl Transport for QuicTransport {
    async fn connect(&self, identity: UserId) -> Result<Channel, ConnectionError> {
        let timeout = self.config.connect_timeout;
        tokio::time::timeout(timeout, self.handshake(identity))
            .await
            .map_err(|_| ConnectionError::Timeout { elapsed: timeout })?
    }
}

/// Pump frames between the channel queues and the QUIC stream until either
/// side stops.
async fn run_connection(
    connection: quinn::Connection,
    mut send: SendStream,
    mut recv: RecvStream,
    mut to_server: mpsc::Receiver<Frame>,
    from_server: mpsc::Sender<Frame>,
) {
    let inbound = async {
        loop {
            match read_frame(&mut recv).await {
                Ok(Some(frame)) => {
                    if from_server.send(frame).await.is_err() {
                        break;
                    }
                },
                Ok(None) => {
                    debug!("server finished stream");
                    break;
                },
                Err(error) => {
                    warn!(%error, "inbound stream failed");
                    break;
                },
            }
        }
    };

    let outbound = async {
        while let Some(frame) = to_server.recv().await {
            if let Err(error) = write_frame(&mut send, &frame).await {
                warn!(%error, "outbound stream failed");
                break;
            }
        }
        // Queue closed: session dropped the channel
        if let Err(error) = send.finish() {
            debug!(%error, "stream already closed");
        }
    };

    tokio::select! {
        () = inbound => {},
        () = outbound => {},
    }
    connection.close(quinn::VarInt::from_u32(0), b"client closed");
}

/// Read one frame. `None` if the stream ended cleanly between frames.
async fn read_frame(recv: &mut RecvStream) -> Result<Option<Frame>, ConnectionError> {
    let mut header = [0u8; Frame::HEADER_SIZE];
    match recv.read_exact(&mut header).await {
        Ok(()) => {},
        Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(e) => return Err(ConnectionError::Transport(format!("header read failed: {e}"))),
    }

    let payload_len = Frame::payload_len(&header)?;
    let mut buf = BytesMut::zeroed(Frame::HEADER_SIZE + payload_len);
    buf[..Frame::HEADER_SIZE].copy_from_slice(&header);
    recv.read_exact(&mut buf[Frame::HEADER_SIZE..])
        .await
        .map_err(|e| ConnectionError::Transport(format!("payload read failed: {e}")))?;

    Ok(Some(Frame::decode(&buf)?))
}

async fn write_frame(send: &mut SendStream, frame: &Frame) -> Result<(), ConnectionError> {
    let mut buf = Vec::with_capacity(Frame::HEADER_SIZE + frame.payload.len());
    frame.encode(&mut buf)?;
    send.write_all(&buf).await.map_err(|e| ConnectionError::Transport(format!("write failed: {e}")))
}

fn client_config(config: &TransportConfig) -> Result<ClientConfig, ConnectionError> {
    let mut crypto = if config.accept_invalid_certs {
        let algorithms = rustls::crypto::ring::default_provider().signature_verification_algorithms;
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AnyServerCert { algorithms }))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        for certificate in &config.root_certificates {
            roots
                .add(certificate.clone())
                .map_err(|e| ConnectionError::Transport(format!("invalid root certificate: {e}")))?;
        }
        rustls::ClientConfig::builder().with_root_certificates(roots).with_no_client_auth()
    };
    crypto.alpn_protocols = vec![config.alpn.clone()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| ConnectionError::Transport(format!("invalid TLS config: {e}")))?;
    let mut client = ClientConfig::new(Arc::new(quic_crypto));

    let idle = config
        .idle_timeout
        .try_into()
        .map_err(|e| ConnectionError::Transport(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    client.transport_config(Arc::new(transport));

    Ok(client)
}

/// Accepts any certificate chain and name, but still checks that the
/// handshake is signed by the presented certificate.
#[derive(Debug)]
struct AnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
