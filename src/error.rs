//! Error types
//!
//! Timeouts get one variant per protocol so callers can match on
//! "this HTTPS connect ran out of time" without inspecting socket error
//! codes. Every other socket failure is passed through untouched in
//! [`Error::Socket`].

use std::fmt;
use std::io;

use crate::conn::Protocol;
use crate::net;

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// The blocking step during which a deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Control or plain connection connect
    Connect,
    /// TLS handshake on a connected socket
    Handshake,
    /// Waiting for a protocol reply on the control channel
    Reply,
    /// Sending a command on the control channel
    Command,
    /// Passive-mode data channel connect
    DataConnect,
    /// Active-mode listener bind
    Bind,
    /// Active-mode accept of the server's data connection
    Accept,
    /// Reading or writing a data channel
    Transfer,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Connect => "connect",
            Operation::Handshake => "handshake",
            Operation::Reply => "reply",
            Operation::Command => "command",
            Operation::DataConnect => "data connect",
            Operation::Bind => "bind",
            Operation::Accept => "accept",
            Operation::Transfer => "transfer",
        })
    }
}

/// Details of an expired deadline.
#[derive(Debug, thiserror::Error)]
#[error("{operation} to {host}:{port} timed out")]
pub struct TimeoutError {
    pub protocol: Protocol,
    pub host: String,
    pub port: u16,
    pub operation: Operation,
    #[source]
    pub source: io::Error,
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP connection timeout: {0}")]
    HttpTimeout(TimeoutError),

    #[error("HTTPS connection timeout: {0}")]
    HttpsTimeout(TimeoutError),

    #[error("FTP connection timeout: {0}")]
    FtpTimeout(TimeoutError),

    #[error(transparent)]
    Socket(#[from] net::Error),

    #[error("TLS handshake with {host} failed: {source}")]
    Handshake {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid TLS material: {0}")]
    TlsMaterial(String),

    #[error("FTP error reply {code}: {message}")]
    FtpReply { code: u16, message: String },

    #[error("Unexpected FTP response: {0}")]
    FtpProtocol(String),

    #[error("No connection handler registered for scheme {0:?}")]
    UnknownScheme(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Handler {name:?} for {scheme:?} already enforces deadlines")]
    NativeDeadline { scheme: String, name: String },

    #[error("Handler {name:?} is registered for {scheme:?}; refusing to replace it")]
    ConflictingHandler { scheme: String, name: String },

    #[error("Invalid deadline: {0} seconds")]
    InvalidDeadline(f64),

    #[error("Connection is not open")]
    NotConnected,

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Cannot read configuration {path}: {source}")]
    ConfigFile {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Build the timeout variant matching `protocol`.
    pub fn timeout(
        protocol: Protocol,
        host: &str,
        port: u16,
        operation: Operation,
        source: io::Error,
    ) -> Self {
        let inner = TimeoutError {
            protocol,
            host: host.to_string(),
            port,
            operation,
            source,
        };
        match protocol {
            Protocol::Http => Error::HttpTimeout(inner),
            Protocol::Https => Error::HttpsTimeout(inner),
            Protocol::Ftp => Error::FtpTimeout(inner),
        }
    }

    /// Whether a deadline expired, for any protocol.
    pub fn is_timeout(&self) -> bool {
        self.timeout_details().is_some()
    }

    pub fn timeout_details(&self) -> Option<&TimeoutError> {
        match self {
            Error::HttpTimeout(t) | Error::HttpsTimeout(t) | Error::FtpTimeout(t) => Some(t),
            _ => None,
        }
    }

    /// Protocol whose deadline expired.
    pub fn timeout_protocol(&self) -> Option<Protocol> {
        self.timeout_details().map(|t| t.protocol)
    }

    /// Whether this is a `4xx` FTP reply.
    pub fn is_ftp_transient(&self) -> bool {
        matches!(self, Error::FtpReply { code, .. } if (400..500).contains(code))
    }

    /// Whether this is a `5xx` FTP reply.
    pub fn is_ftp_permanent(&self) -> bool {
        matches!(self, Error::FtpReply { code, .. } if (500..600).contains(code))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Socket(net::Error::Io(err))
    }
}
