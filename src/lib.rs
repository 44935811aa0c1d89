//! Per-connection deadlines for HTTP, HTTPS and FTP clients
//!
//! Every socket a connection opens (connect, TLS handshake, FTP data
//! channel, FTP callback listener) is bounded by the connection's
//! [`Deadline`]. An expired deadline is reported as a protocol-specific
//! error ([`Error::HttpTimeout`], [`Error::HttpsTimeout`],
//! [`Error::FtpTimeout`]); any other socket failure comes back unchanged.
//!
//! # Example
//! ```no_run
//! use timeout_conn::{Registry, Deadline};
//!
//! timeout_conn::set_http_timeout(10.0)?;
//! timeout_conn::set_https_timeout(5.0)?;
//!
//! let url = url::Url::parse("https://example.com/")?;
//! let conn = Registry::global().open(&url)?;
//! assert_eq!(conn.deadline(), Deadline::from_secs_f64(5.0)?);
//!
//! timeout_conn::reset();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod conn;
pub mod deadline;
pub mod error;
pub mod factory;
pub mod net;
pub mod registry;

pub use config::TimeoutConfig;
pub use conn::{Connection, FtpConnection, HttpConnection, HttpsConnection, Protocol, TlsConfig};
pub use deadline::Deadline;
pub use error::{Error, Operation, Result, TimeoutError};
pub use factory::{Dialer, SocketFactory, SystemDialer};
pub use registry::{ConnectionFactory, Handler, Registry};

/// Install the HTTP timeout handler on the global registry.
pub fn set_http_timeout(secs: f64) -> Result<()> {
    Registry::global().install_http_timeout(Deadline::from_secs_f64(secs)?)
}

/// Install the HTTPS timeout handler on the global registry.
pub fn set_https_timeout(secs: f64) -> Result<()> {
    Registry::global().install_https_timeout(Deadline::from_secs_f64(secs)?)
}

/// Install the FTP timeout handler on the global registry.
pub fn set_ftp_timeout(secs: f64) -> Result<()> {
    Registry::global().install_ftp_timeout(Deadline::from_secs_f64(secs)?)
}

/// Restore standard handlers on the global registry.
pub fn reset() {
    Registry::global().reset()
}
