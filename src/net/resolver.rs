//! Target parsing and name resolution
//!
//! Connections accept a target in the forms a protocol client passes
//! around and resolve it into ordered stream-socket candidates.
//!
//! Supported target formats:
//! - "localhost" - "localhost:80"
//! - "127.0.0.1" - "127.0.0.1:80"
//! - "[::1]"     - "[::1]:80"
//! - "::1"       (IPv6 literal without port)
//!
//! A target without a port, or with an empty one ("host:"), takes the
//! protocol's default port.

use std::net::ToSocketAddrs;

use super::{Error, Result, SockAddr};

/// Parsed `host[:port]` components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAddress {
    /// The host part (IP address or hostname), brackets removed
    pub host: String,
    /// The port, when one was given or a default applied
    pub port: Option<u16>,
}

/// Address parser for `host[:port]` targets
pub struct AddressParser;

impl AddressParser {
    /// Parse a target string into host and port components
    ///
    /// # Examples
    /// ```
    /// use timeout_conn::net::resolver::AddressParser;
    ///
    /// let parsed = AddressParser::parse("localhost:8080", None).unwrap();
    /// assert_eq!(parsed.host, "localhost");
    /// assert_eq!(parsed.port, Some(8080));
    /// ```
    pub fn parse(addr: &str, default_port: Option<u16>) -> Result<ParsedAddress> {
        let (host, port) = Self::split_address(addr)?;

        let port = match port {
            Some(port_str) => Some(Self::parse_port(port_str)?),
            None => default_port,
        };

        Ok(ParsedAddress {
            host: host.to_string(),
            port,
        })
    }

    /// Split a target into host and port parts
    fn split_address(addr: &str) -> Result<(&str, Option<&str>)> {
        let addr = addr.trim();

        if addr.is_empty() {
            return Err(Error::InvalidAddress("Empty address".to_string()));
        }

        // [::1]:80 or [::1]
        if let Some(rest) = addr.strip_prefix('[') {
            let close_bracket = rest
                .find(']')
                .ok_or_else(|| Error::InvalidAddress("IPv6 address lacks ']'".to_string()))?;

            let host = &rest[..close_bracket];
            let tail = &rest[close_bracket + 1..];

            if tail.is_empty() {
                return Ok((host, None));
            }

            let port = tail.strip_prefix(':').ok_or_else(|| {
                Error::InvalidAddress("IPv6 address has wrong port separator".to_string())
            })?;

            return Ok((host, if port.is_empty() { None } else { Some(port) }));
        }

        if let Some(colon_pos) = addr.rfind(':') {
            // More than one colon without brackets is a bare IPv6 literal
            if addr[..colon_pos].contains(':') {
                return Ok((addr, None));
            }

            let host = &addr[..colon_pos];
            let port = &addr[colon_pos + 1..];
            if host.is_empty() {
                return Err(Error::InvalidAddress(format!("Missing host in {:?}", addr)));
            }
            return Ok((host, if port.is_empty() { None } else { Some(port) }));
        }

        Ok((addr, None))
    }

    fn parse_port(port_str: &str) -> Result<u16> {
        port_str
            .parse::<u16>()
            .map_err(|_| Error::InvalidAddress(format!("nonnumeric port: {:?}", port_str)))
    }
}

/// Iterator over resolved socket addresses, in resolver order
#[derive(Debug, Clone)]
pub struct ResolveIter {
    addresses: std::vec::IntoIter<SockAddr>,
}

impl ResolveIter {
    /// Resolve a `host[:port]` target
    ///
    /// # Examples
    /// ```
    /// use timeout_conn::net::resolver::ResolveIter;
    ///
    /// let addrs: Vec<_> = ResolveIter::resolve("127.0.0.1:8080", None)
    ///     .unwrap()
    ///     .collect();
    /// assert_eq!(addrs.len(), 1);
    /// ```
    pub fn resolve(addr: &str, default_port: Option<u16>) -> Result<Self> {
        let parsed = AddressParser::parse(addr, default_port)?;
        let port = parsed
            .port
            .ok_or_else(|| Error::InvalidAddress(format!("No port for {:?}", addr)))?;
        Self::resolve_host(&parsed.host, port)
    }

    /// Resolve a host name or IP literal with an explicit port.
    ///
    /// An empty answer is reported as `ResolutionFailed` so callers never
    /// have to special-case an exhausted iterator.
    pub fn resolve_host(host: &str, port: u16) -> Result<Self> {
        let addresses: Vec<SockAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::ResolutionFailed(format!("{}: {}", host, e)))?
            .map(SockAddr::from_std)
            .collect();

        if addresses.is_empty() {
            return Err(Error::ResolutionFailed(
                "getaddrinfo returns an empty list".to_string(),
            ));
        }

        Ok(ResolveIter {
            addresses: addresses.into_iter(),
        })
    }
}

impl Iterator for ResolveIter {
    type Item = SockAddr;

    fn next(&mut self) -> Option<Self::Item> {
        self.addresses.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.addresses.size_hint()
    }
}

/// Source of connection candidates.
///
/// The socket factory resolves through this seam so tests and embedders
/// can supply a fixed candidate list.
pub trait Resolve: Send + Sync {
    /// Resolve `host:port` into ordered stream-socket candidates.
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SockAddr>>;
}

/// Resolver backed by the operating system's `getaddrinfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> Result<Vec<SockAddr>> {
        Ok(ResolveIter::resolve_host(host, port)?.collect())
    }
}

impl Resolve for Vec<SockAddr> {
    fn resolve(&self, _host: &str, port: u16) -> Result<Vec<SockAddr>> {
        Ok(self
            .iter()
            .map(|addr| SockAddr::new(addr.ip(), if addr.port() == 0 { port } else { addr.port() }))
            .collect())
    }
}
