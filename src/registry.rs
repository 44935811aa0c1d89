//! Per-scheme connection handlers
//!
//! A [`Registry`] decides, for each of `http`, `https` and `ftp`, which
//! implementation hands out connections:
//!
//! - [`Handler::Standard`]: plain blocking sockets; no default deadline.
//! - [`Handler::Timeout`]: deadline-aware connections. A connection's own
//!   deadline wins, otherwise the protocol's default recorded at install
//!   time applies.
//! - [`Handler::Custom`]: a caller-supplied [`ConnectionFactory`].
//!
//! Each connection copies its deadline when it is built. Installing or
//! resetting later never touches connections that already exist.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use url::{Host, Url};

use crate::conn::{Connection, FtpConnection, HttpConnection, HttpsConnection, Protocol, TlsConfig};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::factory::SocketFactory;

/// Caller-supplied source of connections for one scheme.
pub trait ConnectionFactory: Send + Sync {
    /// Name shown in diagnostics and conflict errors.
    fn name(&self) -> &str;

    /// Whether this factory's connections already enforce deadlines.
    fn enforces_deadlines(&self) -> bool {
        false
    }

    fn connection(&self, host: &str, port: u16) -> Result<Connection>;
}

/// Implementation registered for a scheme.
#[derive(Clone)]
pub enum Handler {
    Standard,
    Timeout,
    Custom(Arc<dyn ConnectionFactory>),
}

impl Handler {
    pub fn name(&self) -> &str {
        match self {
            Handler::Standard => "standard",
            Handler::Timeout => "timeout",
            Handler::Custom(factory) => factory.name(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Handler::Timeout)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Standard => f.write_str("Standard"),
            Handler::Timeout => f.write_str("Timeout"),
            Handler::Custom(factory) => f.debug_tuple("Custom").field(&factory.name()).finish(),
        }
    }
}

#[derive(Debug)]
struct State {
    handlers: HashMap<Protocol, Handler>,
    defaults: HashMap<Protocol, Deadline>,
}

impl State {
    fn standard() -> Self {
        State {
            handlers: Protocol::ALL
                .into_iter()
                .map(|p| (p, Handler::Standard))
                .collect(),
            defaults: HashMap::new(),
        }
    }

    fn handler(&self, protocol: Protocol) -> Handler {
        self.handlers
            .get(&protocol)
            .cloned()
            .unwrap_or(Handler::Standard)
    }

    fn default_deadline(&self, protocol: Protocol) -> Deadline {
        self.defaults.get(&protocol).copied().unwrap_or_default()
    }
}

/// Handler table plus per-protocol default deadlines.
#[derive(Debug)]
pub struct Registry {
    state: RwLock<State>,
    factory: SocketFactory,
    tls: Option<TlsConfig>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry with the standard handler for every scheme
    pub fn new() -> Self {
        Registry {
            state: RwLock::new(State::standard()),
            factory: SocketFactory::new(),
            tls: None,
        }
    }

    /// Socket factory given to every built-in connection
    pub fn with_factory(mut self, factory: SocketFactory) -> Self {
        self.factory = factory;
        self
    }

    /// TLS configuration for HTTPS connections; Mozilla roots when unset
    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// The process-wide registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    pub fn install_http_timeout(&self, deadline: Deadline) -> Result<()> {
        self.install(Protocol::Http, deadline)
    }

    pub fn install_https_timeout(&self, deadline: Deadline) -> Result<()> {
        self.install(Protocol::Https, deadline)
    }

    pub fn install_ftp_timeout(&self, deadline: Deadline) -> Result<()> {
        self.install(Protocol::Ftp, deadline)
    }

    /// Switch `protocol` to the timeout handler with `deadline` as default.
    ///
    /// # Errors
    /// [`Error::NativeDeadline`] when a custom handler already enforces
    /// deadlines, [`Error::ConflictingHandler`] for any other custom
    /// handler. The registry is left unchanged on error.
    pub fn install(&self, protocol: Protocol, deadline: Deadline) -> Result<()> {
        let mut state = self.state.write();

        if let Handler::Custom(factory) = state.handler(protocol) {
            let scheme = protocol.scheme().to_string();
            let name = factory.name().to_string();
            return Err(if factory.enforces_deadlines() {
                Error::NativeDeadline { scheme, name }
            } else {
                Error::ConflictingHandler { scheme, name }
            });
        }

        state.handlers.insert(protocol, Handler::Timeout);
        state.defaults.insert(protocol, deadline);
        tracing::debug!(%protocol, %deadline, "timeout handler installed");
        Ok(())
    }

    /// Restore the standard handler for every scheme and unset all defaults.
    pub fn reset(&self) {
        *self.state.write() = State::standard();
        tracing::debug!("connection handlers reset");
    }

    /// Register a custom factory for `scheme`, replacing whatever was there.
    pub fn register(&self, scheme: &str, factory: Arc<dyn ConnectionFactory>) -> Result<()> {
        let protocol =
            Protocol::from_scheme(scheme).ok_or_else(|| Error::UnknownScheme(scheme.to_string()))?;
        tracing::debug!(%protocol, name = factory.name(), "custom handler registered");

        let mut state = self.state.write();
        state.handlers.insert(protocol, Handler::Custom(factory));
        state.defaults.remove(&protocol);
        Ok(())
    }

    /// Current handler per protocol, in [`Protocol::ALL`] order.
    pub fn handlers(&self) -> Vec<(Protocol, Handler)> {
        let state = self.state.read();
        Protocol::ALL
            .into_iter()
            .map(|p| (p, state.handler(p)))
            .collect()
    }

    pub fn handler(&self, protocol: Protocol) -> Handler {
        self.state.read().handler(protocol)
    }

    /// Default deadline for new connections of `protocol`.
    pub fn default_deadline(&self, protocol: Protocol) -> Deadline {
        self.state.read().default_deadline(protocol)
    }

    /// Build an unopened connection for `url` through its scheme's handler.
    pub fn connection(&self, url: &Url) -> Result<Connection> {
        self.connection_with_deadline(url, Deadline::UNSET)
    }

    /// Like [`connection`](Self::connection), with a deadline for this
    /// connection alone.
    ///
    /// A set `explicit` deadline wins; an unset one falls back to the
    /// protocol's installed default. Custom handlers pick their own.
    pub fn connection_with_deadline(&self, url: &Url, explicit: Deadline) -> Result<Connection> {
        let protocol = Protocol::from_scheme(url.scheme())
            .ok_or_else(|| Error::UnknownScheme(url.scheme().to_string()))?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(Error::Url(url::ParseError::EmptyHost)),
        };
        let port = url.port_or_known_default().unwrap_or(protocol.default_port());

        // Snapshot under the lock; building the connection happens outside it.
        let (handler, deadline) = {
            let state = self.state.read();
            (state.handler(protocol), state.default_deadline(protocol))
        };
        let deadline = match handler {
            Handler::Custom(factory) => return factory.connection(&host, port),
            Handler::Standard => explicit,
            Handler::Timeout => explicit.or(deadline),
        };

        let conn: Connection = match protocol {
            Protocol::Http => HttpConnection::new(host, port)
                .with_deadline(deadline)
                .with_factory(self.factory.clone())
                .into(),
            Protocol::Https => HttpsConnection::new(host, port, self.tls_config()?)
                .with_deadline(deadline)
                .with_factory(self.factory.clone())
                .into(),
            Protocol::Ftp => FtpConnection::new(host, port)
                .with_deadline(deadline)
                .with_factory(self.factory.clone())
                .into(),
        };
        Ok(conn)
    }

    /// Build and open a connection for `url`.
    pub fn open(&self, url: &Url) -> Result<Connection> {
        self.open_with_deadline(url, Deadline::UNSET)
    }

    /// Build and open a connection for `url` with its own deadline.
    pub fn open_with_deadline(&self, url: &Url, explicit: Deadline) -> Result<Connection> {
        let mut conn = self.connection_with_deadline(url, explicit)?;
        conn.open()?;
        Ok(conn)
    }

    fn tls_config(&self) -> Result<TlsConfig> {
        match &self.tls {
            Some(tls) => Ok(tls.clone()),
            None => TlsConfig::with_webpki_roots(),
        }
    }
}
