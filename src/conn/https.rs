//! HTTPS connection: deadline-bounded connect, then a TLS handshake on the
//! same deadlined socket.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use rustls::pki_types::ServerName;

use crate::conn::{Protocol, TlsConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Operation, Result};
use crate::factory::{classify_io, SocketFactory};
use crate::net::AddressParser;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// A TLS connection for an HTTPS client.
///
/// Keeps its own deadline, independent of any [`HttpConnection`]
/// deadline, so the two protocols can run with different limits.
///
/// [`HttpConnection`]: crate::conn::HttpConnection
pub struct HttpsConnection {
    host: String,
    port: u16,
    deadline: Deadline,
    tls: TlsConfig,
    factory: SocketFactory,
    stream: Option<Box<TlsStream>>,
}

impl std::fmt::Debug for HttpsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpsConnection")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("deadline", &self.deadline)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl HttpsConnection {
    pub fn new(host: impl Into<String>, port: u16, tls: TlsConfig) -> Self {
        HttpsConnection {
            host: host.into(),
            port,
            deadline: Deadline::UNSET,
            tls,
            factory: SocketFactory::new(),
            stream: None,
        }
    }

    /// Build from a `host[:port]` target, defaulting to port 443.
    pub fn from_target(target: &str, tls: TlsConfig) -> Result<Self> {
        let parsed = AddressParser::parse(target, Some(Protocol::Https.default_port()))?;
        let port = parsed.port.unwrap_or(Protocol::Https.default_port());
        Ok(Self::new(parsed.host, port, tls))
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_factory(mut self, factory: SocketFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Connect and complete the TLS handshake.
    ///
    /// # Errors
    /// [`Error::HttpsTimeout`] when either the connect or the handshake
    /// exceeds the deadline; [`Error::Handshake`] for other handshake
    /// failures; the last socket error when no candidate connects.
    pub fn open(&mut self) -> Result<()> {
        self.close();

        let mut sock = self
            .factory
            .connect(Protocol::Https, &self.host, self.port, self.deadline)?;

        let server_name = ServerName::try_from(self.host.clone())
            .map_err(|e| Error::TlsMaterial(format!("invalid server name {:?}: {}", self.host, e)))?;
        let mut tls = rustls::ClientConnection::new(self.tls.client_config.clone(), server_name)?;

        while tls.is_handshaking() {
            if let Err(err) = tls.complete_io(&mut sock) {
                return Err(self.handshake_error(err));
            }
        }

        tracing::debug!(
            host = %self.host,
            port = self.port,
            deadline = %self.deadline,
            version = ?tls.protocol_version(),
            "https connection open"
        );
        self.stream = Some(Box::new(rustls::StreamOwned::new(tls, sock)));
        Ok(())
    }

    fn handshake_error(&self, err: io::Error) -> Error {
        match classify_io(
            err,
            Protocol::Https,
            &self.host,
            self.port,
            self.deadline,
            Operation::Handshake,
        ) {
            Error::Socket(crate::net::Error::Io(source)) => Error::Handshake {
                host: self.host.clone(),
                source,
            },
            other => other,
        }
    }

    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.conn.send_close_notify();
            // Best effort; the peer may already be gone.
            while stream.conn.wants_write() {
                match stream.conn.write_tls(&mut stream.sock) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            tracing::debug!(host = %self.host, port = self.port, "https connection closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// The underlying TCP socket, below the TLS layer.
    pub fn tcp_stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref().map(|s| &s.sock)
    }

    pub fn tls_stream_mut(&mut self) -> Result<&mut TlsStream> {
        self.stream.as_deref_mut().ok_or(Error::NotConnected)
    }

    fn io_stream(&mut self) -> io::Result<&mut TlsStream> {
        self.stream
            .as_deref_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Drop for HttpsConnection {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for HttpsConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io_stream()?.read(buf)
    }
}

impl Write for HttpsConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io_stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io_stream()?.flush()
    }
}
