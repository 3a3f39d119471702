//! Mutually authenticated WebSocket channel to the control endpoint.
//!
//! The stack is TCP, then rustls with a client certificate, then a WebSocket
//! upgrade. Everything before the upgrade completes shares one deadline.
//! Afterwards reads block until a frame or a fault arrives.

use std::{
    fs,
    io::{self, BufReader},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    sync::{mpsc, Arc},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use rustls::{pki_types::ServerName, ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use rustls_pemfile::{certs, private_key};
use thiserror::Error;
use tungstenite::{
    client::IntoClientRequest, handshake::HandshakeError, protocol::Message, WebSocket,
};

use crate::config::{ChannelConfig, ClientCertPath};

/// TLS session over a plain TCP socket
pub type SecureStream = StreamOwned<ClientConnection, TcpStream>;

const DEFAULT_WSS_PORT: u16 = 443;

/// Faults reported by the channel
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The peer closed the connection
    #[error("connection closed by peer")]
    Closed,

    /// Connect, TLS handshake or WebSocket upgrade exceeded the deadline
    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    /// The endpoint URL or server name cannot be used
    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// One inbound frame as seen by the session loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text payload, expected to carry a request envelope
    Text(String),
    /// Binary payload of the given length
    Binary(usize),
    /// Ping, pong or raw frame; answered by the WebSocket layer
    Control,
}

/// Message-oriented duplex connection
pub trait Channel {
    /// Block until the next frame arrives or the connection faults
    fn receive(&mut self) -> Result<Frame, ChannelError>;

    /// Send one text frame
    fn send(&mut self, text: String) -> Result<(), ChannelError>;
}

/// Install the process-wide rustls crypto provider if none is set yet
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Build the TLS client configuration from the CA and client identity files
pub fn load_tls_config(cert_path: &ClientCertPath) -> Result<Arc<ClientConfig>> {
    install_crypto_provider();

    tracing::info!("Loading client credentials:");
    tracing::info!("  - Client cert: {:?}", cert_path.cert_path);
    tracing::info!("  - Client key: {:?}", cert_path.key_path);
    tracing::info!("  - CA cert: {:?}", cert_path.ca_path);

    let cert_pem = fs::read(&cert_path.cert_path).with_context(|| {
        format!(
            "Failed to read client certificate from {:?}",
            cert_path.cert_path
        )
    })?;

    let key_pem = fs::read(&cert_path.key_path).with_context(|| {
        format!(
            "Failed to read client private key from {:?}",
            cert_path.key_path
        )
    })?;

    let ca_pem = fs::read(&cert_path.ca_path)
        .with_context(|| format!("Failed to read CA certificate from {:?}", cert_path.ca_path))?;

    let cert_chain = certs(&mut BufReader::new(&*cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse client certificate PEM data")?;

    if cert_chain.is_empty() {
        return Err(anyhow!(
            "No client certificate found in {:?}",
            cert_path.cert_path
        ));
    }

    let private_key = private_key(&mut BufReader::new(&*key_pem))
        .context("Failed to parse client private key PEM data")?
        .ok_or_else(|| anyhow!("No private key found in {:?}", cert_path.key_path))?;

    let mut root_store = RootCertStore::empty();
    let ca_certs = certs(&mut BufReader::new(&*ca_pem))
        .collect::<Result<Vec<_>, _>>()
        .context("Failed to parse CA certificate PEM data")?;

    root_store.add_parsable_certificates(ca_certs);

    if root_store.is_empty() {
        return Err(anyhow!(
            "No valid CA certificates found in {:?}. Please check the CA certificate file.",
            cert_path.ca_path
        ));
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_client_auth_cert(cert_chain, private_key)
        .context("Failed to build TLS client configuration")?;

    Ok(Arc::new(tls_config))
}

/// WebSocket connection running over [`SecureStream`]
pub struct SecureChannel {
    socket:   WebSocket<SecureStream>,
    endpoint: String,
}

impl SecureChannel {
    /// Dial the endpoint and complete the TLS and WebSocket handshakes
    pub fn connect(
        config: &ChannelConfig,
        tls_config: Arc<ClientConfig>,
    ) -> Result<Self, ChannelError> {
        let timeout = config.handshake_timeout;
        let deadline = Instant::now() + timeout;

        let request = config.url.as_str().into_client_request()?;
        let uri = request.uri();
        if uri.scheme_str() != Some("wss") {
            return Err(ChannelError::Endpoint(format!(
                "{} is not a wss:// URL",
                config.url
            )));
        }
        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .ok_or_else(|| ChannelError::Endpoint(format!("{} has no host", config.url)))?;
        let port = uri.port_u16().unwrap_or(DEFAULT_WSS_PORT);

        let expected_name = config.server_name.clone().unwrap_or_else(|| host.clone());
        let server_name = ServerName::try_from(expected_name.clone()).map_err(|_| {
            ChannelError::Endpoint(format!("invalid server name {expected_name:?}"))
        })?;

        tracing::info!(
            "Connecting to {} (expecting certificate for {})",
            config.url,
            expected_name
        );

        let addrs = resolve(&host, port, deadline, timeout)?;
        let sock = connect_tcp(&addrs, deadline, timeout)?;
        sock.set_nodelay(true)?;

        tracing::debug!("Socket connected, establishing TLS...");
        set_deadline(&sock, deadline, timeout)?;
        let tls_conn = ClientConnection::new(tls_config, server_name)?;
        let mut tls = StreamOwned::new(tls_conn, sock);
        complete_handshake(&mut tls).map_err(|e| handshake_fault(e, timeout))?;

        tracing::debug!("TLS established, upgrading to WebSocket...");
        set_deadline(&tls.sock, deadline, timeout)?;
        let (socket, response) = match tungstenite::client(request, tls) {
            Ok(pair) => pair,
            Err(HandshakeError::Interrupted(_)) => {
                return Err(ChannelError::HandshakeTimeout(timeout))
            }
            Err(HandshakeError::Failure(e)) => return Err(handshake_fault(e.into(), timeout)),
        };

        let sock = &socket.get_ref().sock;
        sock.set_read_timeout(None)?;
        sock.set_write_timeout(None)?;

        tracing::info!(
            "✓ Secure connection established (HTTP {})",
            response.status()
        );

        Ok(Self {
            socket,
            endpoint: config.url.clone(),
        })
    }

    /// URL this channel was opened against
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Channel for SecureChannel {
    fn receive(&mut self) -> Result<Frame, ChannelError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Frame::Text(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => Ok(Frame::Binary(bytes.len())),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(Frame::Control),
            Ok(Message::Close(frame)) => {
                tracing::debug!("Received close frame: {:?}", frame);
                Err(ChannelError::Closed)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Err(ChannelError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send(&mut self, text: String) -> Result<(), ChannelError> {
        self.socket.send(Message::text(text))?;
        Ok(())
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        tracing::debug!("Closing connection to {}", self.endpoint);
        // Also flushes the reply to a close the peer started.
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

fn remaining(deadline: Instant, timeout: Duration) -> Result<Duration, ChannelError> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|left| !left.is_zero())
        .ok_or(ChannelError::HandshakeTimeout(timeout))
}

fn set_deadline(
    sock: &TcpStream,
    deadline: Instant,
    timeout: Duration,
) -> Result<(), ChannelError> {
    let left = remaining(deadline, timeout)?;
    sock.set_read_timeout(Some(left))?;
    sock.set_write_timeout(Some(left))?;
    Ok(())
}

/// Resolve on a helper thread so a stalled resolver cannot outlive the deadline
fn resolve(
    host: &str,
    port: u16,
    deadline: Instant,
    timeout: Duration,
) -> Result<Vec<SocketAddr>, ChannelError> {
    let left = remaining(deadline, timeout)?;
    let (tx, rx) = mpsc::channel();
    let target = (host.to_string(), port);
    thread::spawn(move || {
        let resolved = target
            .to_socket_addrs()
            .map(|addrs| addrs.collect::<Vec<_>>());
        let _ = tx.send(resolved);
    });

    match rx.recv_timeout(left) {
        Ok(resolved) => Ok(resolved?),
        Err(_) => Err(ChannelError::HandshakeTimeout(timeout)),
    }
}

fn connect_tcp(
    addrs: &[SocketAddr],
    deadline: Instant,
    timeout: Duration,
) -> Result<TcpStream, ChannelError> {
    let mut last_err = None;
    for addr in addrs {
        let left = remaining(deadline, timeout)?;
        match TcpStream::connect_timeout(addr, left) {
            Ok(sock) => return Ok(sock),
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) => Err(handshake_fault(e.into(), timeout)),
        None => Err(ChannelError::Endpoint("host resolved to no addresses".to_string())),
    }
}

/// Drive the TLS handshake to completion on a blocking socket
fn complete_handshake(tls: &mut SecureStream) -> Result<(), ChannelError> {
    while tls.conn.is_handshaking() {
        if tls.conn.wants_write() {
            tls.conn.write_tls(&mut tls.sock)?;
            continue;
        }
        if tls.conn.wants_read() {
            if tls.conn.read_tls(&mut tls.sock)? == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection during the TLS handshake",
                )
                .into());
            }
            if let Err(e) = tls.conn.process_new_packets() {
                // Flush the alert so the peer learns why.
                let _ = tls.conn.write_tls(&mut tls.sock);
                return Err(e.into());
            }
        }
    }
    Ok(())
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn handshake_fault(err: ChannelError, timeout: Duration) -> ChannelError {
    match err {
        ChannelError::Io(e) if is_timeout(&e) => ChannelError::HandshakeTimeout(timeout),
        ChannelError::WebSocket(tungstenite::Error::Io(e)) if is_timeout(&e) => {
            ChannelError::HandshakeTimeout(timeout)
        }
        other => other,
    }
}
