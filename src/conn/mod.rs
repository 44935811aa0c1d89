//! Deadline-aware connections
//!
//! One connection type per protocol, all built on [`SocketFactory`]:
//!
//! ```text
//! HttpConnection   → factory connect
//! HttpsConnection  → factory connect → TLS handshake (same deadline)
//! FtpConnection    → factory connect → welcome reply
//!                  → per transfer: PASV + data connect, or PORT + accept
//! ```
//!
//! [`Connection`] is the tagged variant a registry hands to protocol
//! clients. Each connection captures its deadline when it is built, so
//! changing a registry default never affects a connection in flight.
//!
//! [`SocketFactory`]: crate::factory::SocketFactory

pub mod ftp;
pub mod http;
pub mod https;
pub mod tls;

use std::fmt;

pub use ftp::{DataChannel, FtpConnection, Reply, TransferMode};
pub use http::HttpConnection;
pub use https::HttpsConnection;
pub use tls::TlsConfig;

use crate::deadline::Deadline;
use crate::error::Result;

/// Protocol a connection speaks, and the family its timeout error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Ftp,
}

impl Protocol {
    pub const ALL: [Protocol; 3] = [Protocol::Http, Protocol::Https, Protocol::Ftp];

    /// URL scheme handled by this protocol
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Ftp => "ftp",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Ftp => 21,
        }
    }

    pub fn from_scheme(scheme: &str) -> Option<Protocol> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.scheme().eq_ignore_ascii_case(scheme))
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Ftp => "FTP",
        })
    }
}

/// A connection of any supported protocol.
#[derive(Debug)]
pub enum Connection {
    Plain(HttpConnection),
    Secure(HttpsConnection),
    FtpControl(FtpConnection),
}

impl Connection {
    /// Establish a fresh socket, dropping any previous one.
    ///
    /// For FTP this connects the control channel and reads the welcome
    /// reply.
    pub fn open(&mut self) -> Result<()> {
        match self {
            Connection::Plain(conn) => conn.open(),
            Connection::Secure(conn) => conn.open(),
            Connection::FtpControl(conn) => conn.connect().map(|_welcome| ()),
        }
    }

    pub fn close(&mut self) {
        match self {
            Connection::Plain(conn) => conn.close(),
            Connection::Secure(conn) => conn.close(),
            Connection::FtpControl(conn) => conn.close(),
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Connection::Plain(conn) => conn.is_open(),
            Connection::Secure(conn) => conn.is_open(),
            Connection::FtpControl(conn) => conn.is_open(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Connection::Plain(_) => Protocol::Http,
            Connection::Secure(_) => Protocol::Https,
            Connection::FtpControl(_) => Protocol::Ftp,
        }
    }

    pub fn deadline(&self) -> Deadline {
        match self {
            Connection::Plain(conn) => conn.deadline(),
            Connection::Secure(conn) => conn.deadline(),
            Connection::FtpControl(conn) => conn.deadline(),
        }
    }

    pub fn host(&self) -> &str {
        match self {
            Connection::Plain(conn) => conn.host(),
            Connection::Secure(conn) => conn.host(),
            Connection::FtpControl(conn) => conn.host(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Connection::Plain(conn) => conn.port(),
            Connection::Secure(conn) => conn.port(),
            Connection::FtpControl(conn) => conn.port(),
        }
    }
}

impl From<HttpConnection> for Connection {
    fn from(conn: HttpConnection) -> Self {
        Connection::Plain(conn)
    }
}

impl From<HttpsConnection> for Connection {
    fn from(conn: HttpsConnection) -> Self {
        Connection::Secure(conn)
    }
}

impl From<FtpConnection> for Connection {
    fn from(conn: FtpConnection) -> Self {
        Connection::FtpControl(conn)
    }
}
