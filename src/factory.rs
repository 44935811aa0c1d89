//! Deadline-bounded socket factory
//!
//! Every socket a connection opens comes from a [`SocketFactory`]. The
//! factory resolves the target, walks the candidates strictly in resolver
//! order and returns the first one that connects. When none does, the
//! failure of the *last* candidate decides what the caller sees: an
//! expired deadline becomes the protocol's timeout error, anything else is
//! returned as the original socket error.
//!
//! # Data Flow
//! ```text
//! connect(protocol, host, port, deadline)
//!     → Resolve::resolve (ordered candidates)
//!     → Dialer::connect per candidate (deadline set before connect)
//!     → first success wins, otherwise classify the last failure
//! ```

use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use crate::conn::Protocol;
use crate::deadline::Deadline;
use crate::error::{Error, Operation, Result};
use crate::net::resolver::{Resolve, SystemResolver};
use crate::net::{self, accept_with_deadline, SockAddr, TcpConnector, TcpListenerBuilder};

/// Opens sockets for one candidate address.
///
/// Implementations must apply the deadline before any blocking call and
/// report an expired deadline as an error for which
/// [`net::Error::is_timeout`] holds.
pub trait Dialer: Send + Sync {
    /// Connect a stream socket to `addr`.
    fn connect(&self, addr: &SockAddr, deadline: Deadline) -> net::Result<TcpStream>;

    /// Bind a listening socket on `addr`.
    fn listen(&self, addr: &SockAddr, deadline: Deadline) -> net::Result<TcpListener>;

    /// Accept one inbound connection on `listener`.
    fn accept(
        &self,
        listener: &TcpListener,
        deadline: Deadline,
    ) -> net::Result<(TcpStream, SocketAddr)> {
        accept_with_deadline(listener, deadline.duration())
    }
}

/// Dialer using the operating system's TCP stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDialer {
    connector: TcpConnector,
    listener: TcpListenerBuilder,
}

impl Dialer for SystemDialer {
    fn connect(&self, addr: &SockAddr, deadline: Deadline) -> net::Result<TcpStream> {
        self.connector.timeout(deadline.duration()).connect(addr)
    }

    fn listen(&self, addr: &SockAddr, _deadline: Deadline) -> net::Result<TcpListener> {
        // bind(2) and listen(2) return without waiting on the network; the
        // deadline takes effect in accept.
        self.listener.bind(addr)
    }
}

/// Resolves targets and produces deadline-bounded sockets.
#[derive(Clone)]
pub struct SocketFactory {
    resolver: Arc<dyn Resolve>,
    dialer: Arc<dyn Dialer>,
}

impl fmt::Debug for SocketFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketFactory").finish_non_exhaustive()
    }
}

impl Default for SocketFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketFactory {
    /// Factory backed by the system resolver and TCP stack
    pub fn new() -> Self {
        SocketFactory {
            resolver: Arc::new(SystemResolver),
            dialer: Arc::new(SystemDialer::default()),
        }
    }

    /// Replace the resolver
    pub fn with_resolver(mut self, resolver: impl Resolve + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Replace the dialer
    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    /// Resolve `host:port` and connect to the first reachable candidate.
    pub fn connect(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
        deadline: Deadline,
    ) -> Result<TcpStream> {
        let candidates = self.resolver.resolve(host, port)?;
        self.connect_candidates(protocol, host, port, candidates, deadline, Operation::Connect)
    }

    /// Connect to an already known address, e.g. an FTP passive endpoint.
    pub fn connect_addr(
        &self,
        protocol: Protocol,
        host: &str,
        addr: SockAddr,
        deadline: Deadline,
        operation: Operation,
    ) -> Result<TcpStream> {
        self.connect_candidates(protocol, host, addr.port(), vec![addr], deadline, operation)
    }

    /// Try `candidates` in order; the last failure decides the error.
    pub fn connect_candidates(
        &self,
        protocol: Protocol,
        host: &str,
        port: u16,
        candidates: Vec<SockAddr>,
        deadline: Deadline,
        operation: Operation,
    ) -> Result<TcpStream> {
        let mut last_err: Option<net::Error> = None;

        for candidate in candidates {
            tracing::debug!(%protocol, host, port, %candidate, %deadline, "connect");

            match self.dialer.connect(&candidate, deadline) {
                Ok(stream) => return Ok(stream),
                Err(err) if classified_timeout(&err, deadline) => {
                    tracing::debug!(%protocol, host, port, %candidate, "connect timeout");
                    last_err = Some(err);
                }
                Err(err) => {
                    tracing::debug!(%protocol, host, port, %candidate, error = %err, "general connect fail");
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(err) if classified_timeout(&err, deadline) => {
                tracing::warn!(%protocol, host, port, %deadline, "all candidates timed out");
                Err(Error::timeout(protocol, host, port, operation, err.into_io()))
            }
            Some(err) => {
                tracing::warn!(%protocol, host, port, error = %err, "all candidates failed");
                Err(Error::Socket(err))
            }
            None => Err(Error::Socket(net::Error::ResolutionFailed(
                "getaddrinfo returns an empty list".to_string(),
            ))),
        }
    }

    /// Bind a listening socket for a server callback.
    pub fn listen(
        &self,
        protocol: Protocol,
        host: &str,
        addr: SockAddr,
        deadline: Deadline,
    ) -> Result<TcpListener> {
        self.dialer
            .listen(&addr, deadline)
            .map_err(|err| classify(err, protocol, host, addr.port(), deadline, Operation::Bind))
    }

    /// Accept the server's callback on `listener`.
    pub fn accept(
        &self,
        protocol: Protocol,
        host: &str,
        listener: &TcpListener,
        deadline: Deadline,
    ) -> Result<TcpStream> {
        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
        self.dialer
            .accept(listener, deadline)
            .map(|(stream, _peer)| stream)
            .map_err(|err| classify(err, protocol, host, port, deadline, Operation::Accept))
    }
}

/// A timeout only counts as a deadline expiry when a deadline was set.
fn classified_timeout(err: &net::Error, deadline: Deadline) -> bool {
    deadline.is_set() && err.is_timeout()
}

/// Map a socket-level failure to the protocol's error.
pub(crate) fn classify(
    err: net::Error,
    protocol: Protocol,
    host: &str,
    port: u16,
    deadline: Deadline,
    operation: Operation,
) -> Error {
    if classified_timeout(&err, deadline) {
        Error::timeout(protocol, host, port, operation, err.into_io())
    } else {
        Error::Socket(err)
    }
}

/// Map an I/O failure on an established stream to the protocol's error.
pub(crate) fn classify_io(
    err: std::io::Error,
    protocol: Protocol,
    host: &str,
    port: u16,
    deadline: Deadline,
    operation: Operation,
) -> Error {
    classify(net::Error::Io(err), protocol, host, port, deadline, operation)
}


#[cfg(test)]
mod tests {
    use super::testing::{Outcome, ScriptedDialer};
    use super::*;
    use std::net::Ipv4Addr;
    use tracing_test::traced_test;

    fn candidate(last_octet: u8, port: u16) -> SockAddr {
        SockAddr::new_v4(Ipv4Addr::new(192, 0, 2, last_octet), port)
    }

    fn deadline() -> Deadline {
        Deadline::from_secs_f64(1.0).unwrap()
    }

    fn live_listener() -> (TcpListener, SockAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = SockAddr::from_std(listener.local_addr().unwrap());
        (listener, addr)
    }

    #[test]
    fn test_falls_through_refused_candidates() {
        let (_listener, live) = live_listener();
        let dialer = ScriptedDialer::new()
            .on(candidate(1, live.port()), Outcome::Refuse)
            .on(candidate(2, live.port()), Outcome::Refuse);
        let factory = SocketFactory::new()
            .with_resolver(vec![candidate(1, 0), candidate(2, 0), live])
            .with_dialer(dialer.clone());

        let stream = factory
            .connect(Protocol::Http, "dual.example", live.port(), deadline())
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), live.to_std());
        assert_eq!(dialer.attempts().len(), 3);
    }

    #[test]
    fn test_stops_at_first_success() {
        let (_listener, live) = live_listener();
        let dialer = ScriptedDialer::new().on(candidate(9, live.port()), Outcome::Timeout);
        let factory = SocketFactory::new()
            .with_resolver(vec![live, candidate(9, 0)])
            .with_dialer(dialer.clone());

        factory
            .connect(Protocol::Http, "localhost", live.port(), deadline())
            .unwrap();
        assert_eq!(dialer.attempts(), vec![live]);
    }

    #[test]
    fn test_last_timeout_wins() {
        let dialer = ScriptedDialer::new()
            .on(candidate(1, 80), Outcome::Refuse)
            .on(candidate(2, 80), Outcome::Timeout);
        let factory = SocketFactory::new()
            .with_resolver(vec![candidate(1, 0), candidate(2, 0)])
            .with_dialer(dialer);

        let err = factory
            .connect(Protocol::Http, "example.com", 80, deadline())
            .unwrap_err();
        let details = err.timeout_details().expect("timeout error");
        assert!(matches!(err, Error::HttpTimeout(_)));
        assert_eq!(details.host, "example.com");
        assert_eq!(details.port, 80);
        assert_eq!(details.operation, Operation::Connect);
    }

    #[test]
    fn test_last_socket_error_wins() {
        let dialer = ScriptedDialer::new()
            .on(candidate(1, 80), Outcome::Timeout)
            .on(candidate(2, 80), Outcome::Refuse);
        let factory = SocketFactory::new()
            .with_resolver(vec![candidate(1, 0), candidate(2, 0)])
            .with_dialer(dialer);

        let err = factory
            .connect(Protocol::Http, "example.com", 80, deadline())
            .unwrap_err();
        match err {
            Error::Socket(net::Error::Io(io)) => {
                assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused)
            }
            other => panic!("expected refused socket error, got {other:?}"),
        }
    }

    #[test]
    fn test_timeout_kind_follows_protocol() {
        let dialer = ScriptedDialer::new().on(candidate(1, 21), Outcome::Timeout);
        let factory = SocketFactory::new()
            .with_resolver(vec![candidate(1, 0)])
            .with_dialer(dialer);

        let err = factory
            .connect(Protocol::Ftp, "ftp.example", 21, deadline())
            .unwrap_err();
        assert!(matches!(err, Error::FtpTimeout(_)));
    }

    #[test]
    fn test_unset_deadline_does_not_classify() {
        let dialer = ScriptedDialer::new().on(candidate(1, 80), Outcome::Timeout);
        let factory = SocketFactory::new()
            .with_resolver(vec![candidate(1, 0)])
            .with_dialer(dialer);

        let err = factory
            .connect(Protocol::Http, "example.com", 80, Deadline::UNSET)
            .unwrap_err();
        assert!(!err.is_timeout());
        assert!(matches!(err, Error::Socket(net::Error::Timeout)));
    }

    #[test]
    fn test_no_candidates() {
        let factory = SocketFactory::new().with_resolver(Vec::<SockAddr>::new());

        let err = factory
            .connect(Protocol::Http, "nowhere.example", 80, deadline())
            .unwrap_err();
        assert!(matches!(err, Error::Socket(net::Error::ResolutionFailed(_))));
    }

    #[test]
    fn test_listen_timeout_is_classified() {
        let factory = SocketFactory::new().with_dialer(ScriptedDialer::new().listen_times_out());

        let err = factory
            .listen(
                Protocol::Ftp,
                "ftp.example",
                SockAddr::new_v4(Ipv4Addr::LOCALHOST, 0),
                deadline(),
            )
            .unwrap_err();
        assert_eq!(err.timeout_details().unwrap().operation, Operation::Bind);
    }

    #[test]
    #[traced_test]
    fn test_candidate_outcomes_are_logged() {
        let dialer = ScriptedDialer::new()
            .on(candidate(1, 80), Outcome::Timeout)
            .on(candidate(2, 80), Outcome::Refuse);
        let factory = SocketFactory::new()
            .with_resolver(vec![candidate(1, 0), candidate(2, 0)])
            .with_dialer(dialer);

        let _ = factory.connect(Protocol::Http, "example.com", 80, deadline());
        assert!(logs_contain("connect timeout"));
        assert!(logs_contain("general connect fail"));
        assert!(logs_contain("all candidates failed"));
    }
}
