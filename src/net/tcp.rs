//! TCP primitives with deadline support
//!
//! Every blocking step a connection performs goes through here: connect
//! (bounded by a non-blocking connect plus `poll`), accept (bounded by
//! `poll` on the listener) and stream I/O (bounded by
//! `SO_RCVTIMEO`/`SO_SNDTIMEO`). A `None` timeout leaves the socket fully
//! blocking.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use socket2::{SockAddr as Socket2Addr, Socket};

use super::{Error, Result, SockAddr};

/// Whether an I/O error is what a socket reports when its timeout expires.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
        || matches!(err.raw_os_error(), Some(libc::ETIMEDOUT) | Some(libc::EAGAIN))
}

/// Extension trait for TcpStream with additional utilities
pub trait TcpExt {
    /// Bound every later read and write by `timeout`; `None` blocks forever.
    fn apply_deadline(&self, timeout: Option<Duration>) -> Result<()>;

    /// Get local socket address as SockAddr
    fn local_sockaddr(&self) -> Result<SockAddr>;

    /// Get peer socket address as SockAddr
    fn peer_sockaddr(&self) -> Result<SockAddr>;
}

impl TcpExt for TcpStream {
    fn apply_deadline(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_read_timeout(timeout).map_err(Error::from)?;
        self.set_write_timeout(timeout).map_err(Error::from)
    }

    fn local_sockaddr(&self) -> Result<SockAddr> {
        let addr = self.local_addr().map_err(Error::from)?;
        Ok(SockAddr::from_std(addr))
    }

    fn peer_sockaddr(&self) -> Result<SockAddr> {
        let addr = self.peer_addr().map_err(Error::from)?;
        Ok(SockAddr::from_std(addr))
    }
}

/// TCP connection builder with timeout support
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    timeout: Option<Duration>,
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnector {
    /// Create a new TCP connector with default settings
    pub fn new() -> Self {
        TcpConnector {
            timeout: None,
            nodelay: true,
        }
    }

    /// Set connection timeout
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set TCP_NODELAY option
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Connect to one candidate.
    ///
    /// The timeout is put in place before the connect starts, and once
    /// connected it stays on the stream as its read/write timeout.
    pub fn connect(&self, addr: &SockAddr) -> Result<TcpStream> {
        let socket = Socket::new(addr.domain(), addr.socket_type(), Some(addr.protocol()))
            .map_err(Error::from)?;

        socket.set_nodelay(self.nodelay).map_err(Error::from)?;

        let target = Socket2Addr::from(addr.to_std());
        if let Some(timeout) = self.timeout {
            socket.set_nonblocking(true).map_err(Error::from)?;

            match socket.connect(&target) {
                Ok(()) => {}
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.raw_os_error() == Some(libc::EINPROGRESS) =>
                {
                    wait_for(socket.as_raw_fd(), libc::POLLOUT, timeout)?;

                    if let Some(err) = socket.take_error().map_err(Error::from)? {
                        return Err(Error::from(err));
                    }
                }
                Err(e) => return Err(Error::from(e)),
            }

            socket.set_nonblocking(false).map_err(Error::from)?;
        } else {
            socket.connect(&target).map_err(Error::from)?;
        }

        let stream: TcpStream = socket.into();
        stream.apply_deadline(self.timeout)?;
        Ok(stream)
    }
}

/// TCP listener builder
#[derive(Debug, Clone, Copy)]
pub struct TcpListenerBuilder {
    reuseaddr: bool,
    backlog: i32,
}

impl Default for TcpListenerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpListenerBuilder {
    /// Create a new TCP listener builder with default settings
    pub fn new() -> Self {
        TcpListenerBuilder {
            reuseaddr: true,
            backlog: 1,
        }
    }

    /// Set SO_REUSEADDR option (default: true)
    pub fn reuseaddr(mut self, reuse: bool) -> Self {
        self.reuseaddr = reuse;
        self
    }

    /// Set listen backlog (default: 1, one data connection per listener)
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Bind and listen on an address
    pub fn bind(&self, addr: &SockAddr) -> Result<TcpListener> {
        let socket = Socket::new(addr.domain(), addr.socket_type(), Some(addr.protocol()))
            .map_err(Error::from)?;

        socket.set_reuse_address(self.reuseaddr).map_err(Error::from)?;

        if addr.is_ipv6() {
            socket.set_only_v6(true).map_err(Error::from)?;
        }

        socket
            .bind(&Socket2Addr::from(addr.to_std()))
            .map_err(Error::from)?;
        socket.listen(self.backlog).map_err(Error::from)?;

        Ok(socket.into())
    }
}

/// Accept one connection, waiting at most `timeout` for it to arrive.
///
/// The accepted stream inherits `timeout` as its read/write timeout.
pub fn accept_with_deadline(
    listener: &TcpListener,
    timeout: Option<Duration>,
) -> Result<(TcpStream, SocketAddr)> {
    if let Some(timeout) = timeout {
        wait_for(listener.as_raw_fd(), libc::POLLIN, timeout)?;
    }

    let (stream, peer) = listener.accept().map_err(Error::from)?;
    // accept(2) does not hand the listener's flags to the new socket on
    // every platform
    stream.set_nonblocking(false).map_err(Error::from)?;
    stream.apply_deadline(timeout)?;
    Ok((stream, peer))
}

/// Wait until `fd` reports one of `events`, or fail with `Error::Timeout`.
///
/// A poll interrupted by a signal is restarted with the time that is left.
fn wait_for(fd: RawFd, events: libc::c_short, timeout: Duration) -> Result<()> {
    let expires = Instant::now() + timeout;
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        let remaining = expires.saturating_duration_since(Instant::now());
        // Sub-millisecond deadlines must still wait, not poll once and fail.
        let timeout_ms = remaining.as_millis().clamp(1, i32::MAX as u128) as i32;
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };

        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                if Instant::now() >= expires {
                    return Err(Error::Timeout);
                }
                continue;
            }
            return Err(Error::Io(err));
        }

        if ret == 0 {
            return Err(Error::Timeout);
        }

        return Ok(());
    }
}
