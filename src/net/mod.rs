//! Socket-level building blocks
//!
//! Address handling, `host:port` parsing and resolution, and the TCP
//! primitives that apply a deadline to connect, accept and subsequent I/O.
//! Nothing in here knows about protocols; classification of a timeout into
//! an HTTP, HTTPS or FTP error happens one layer up.

pub mod addr;
pub mod resolver;
pub mod tcp;

pub use addr::SockAddr;
pub use resolver::{AddressParser, ResolveIter};
pub use tcp::{accept_with_deadline, is_timeout, TcpConnector, TcpExt, TcpListenerBuilder};

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network operation errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Address resolution failed: {0}")]
    ResolutionFailed(String),

    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Whether this error means a deadline expired.
    ///
    /// `Io` errors count when their kind is `TimedOut` or `WouldBlock`, the
    /// two kinds a socket with `SO_RCVTIMEO`/`SO_SNDTIMEO` reports.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Io(e) => is_timeout(e),
            _ => false,
        }
    }

    /// Lower this error into an `io::Error`, keeping its kind where possible.
    pub fn into_io(self) -> std::io::Error {
        use std::io::{Error as IoError, ErrorKind};

        match self {
            Error::Io(e) => e,
            Error::Timeout => IoError::new(ErrorKind::TimedOut, "operation timed out"),
            Error::InvalidAddress(msg) => IoError::new(ErrorKind::InvalidInput, msg),
            Error::ResolutionFailed(msg) => IoError::new(ErrorKind::NotFound, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, ErrorKind};

    #[test]
    fn test_timeout_detection() {
        assert!(Error::Timeout.is_timeout());
        assert!(Error::Io(io::Error::from(ErrorKind::TimedOut)).is_timeout());
        assert!(Error::Io(io::Error::from(ErrorKind::WouldBlock)).is_timeout());
        assert!(!Error::Io(io::Error::from(ErrorKind::ConnectionRefused)).is_timeout());
        assert!(!Error::ResolutionFailed("nope".into()).is_timeout());
    }

    #[test]
    fn test_into_io_keeps_kind() {
        assert_eq!(Error::Timeout.into_io().kind(), ErrorKind::TimedOut);
        let refused = Error::Io(io::Error::from(ErrorKind::ConnectionRefused));
        assert_eq!(refused.into_io().kind(), ErrorKind::ConnectionRefused);
    }
}
