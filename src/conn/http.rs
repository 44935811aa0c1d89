//! Plain HTTP connection with a connect deadline

use std::io::{self, Read, Write};
use std::net::TcpStream;

use crate::conn::Protocol;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::factory::SocketFactory;
use crate::net::AddressParser;

/// A TCP connection for an HTTP client.
///
/// [`open`](Self::open) resolves the host and connects under the
/// connection's deadline; the deadline then stays on the socket as its
/// read/write timeout. The socket is owned here: the protocol layer uses it
/// through [`stream_mut`](Self::stream_mut) or the `Read`/`Write` impls,
/// and it is closed by [`close`](Self::close), a later `open`, or drop.
#[derive(Debug)]
pub struct HttpConnection {
    host: String,
    port: u16,
    deadline: Deadline,
    factory: SocketFactory,
    sock: Option<TcpStream>,
}

impl HttpConnection {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        HttpConnection {
            host: host.into(),
            port,
            deadline: Deadline::UNSET,
            factory: SocketFactory::new(),
            sock: None,
        }
    }

    /// Build from a `host[:port]` target, defaulting to port 80.
    pub fn from_target(target: &str) -> Result<Self> {
        let parsed = AddressParser::parse(target, Some(Protocol::Http.default_port()))?;
        let port = parsed.port.unwrap_or(Protocol::Http.default_port());
        Ok(Self::new(parsed.host, port))
    }

    /// Set the deadline used by every later `open`.
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

    /// Connect a fresh socket.
    ///
    /// A socket from an earlier `open` is closed first and never reused.
    ///
    /// # Errors
    /// [`Error::HttpTimeout`] when the last candidate ran out of time, or
    /// the last candidate's socket error otherwise.
    pub fn open(&mut self) -> Result<()> {
        self.close();

        let sock = self
            .factory
            .connect(Protocol::Http, &self.host, self.port, self.deadline)?;
        tracing::debug!(host = %self.host, port = self.port, deadline = %self.deadline, "http connection open");
        self.sock = Some(sock);
        Ok(())
    }

    pub fn close(&mut self) {
        if self.sock.take().is_some() {
            tracing::debug!(host = %self.host, port = self.port, "http connection closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.sock.is_some()
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        self.sock.as_ref()
    }

    pub fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.sock.as_mut().ok_or(Error::NotConnected)
    }

    fn io_stream(&mut self) -> io::Result<&mut TcpStream> {
        self.sock
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Read for HttpConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io_stream()?.read(buf)
    }
}

impl Write for HttpConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io_stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.io_stream()?.flush()
    }
}
