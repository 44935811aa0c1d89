//! Resolved socket addresses
//!
//! A [`SockAddr`] is one candidate produced by name resolution. The factory
//! tries candidates in the order the resolver returned them, so this type
//! carries everything needed to open a socket for the candidate: its
//! family (as a `socket2::Domain`) and the address itself. Candidates are
//! always stream/TCP sockets.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use socket2::{Domain, Protocol, Type};

/// An IPv4 or IPv6 stream socket candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockAddr {
    /// IPv4 socket address
    V4(SocketAddrV4),
    /// IPv6 socket address
    V6(SocketAddrV6),
}

impl SockAddr {
    /// Create a new IPv4 socket address
    pub fn new_v4(ip: Ipv4Addr, port: u16) -> Self {
        SockAddr::V4(SocketAddrV4::new(ip, port))
    }

    /// Create a new IPv6 socket address
    pub fn new_v6(ip: Ipv6Addr, port: u16) -> Self {
        SockAddr::V6(SocketAddrV6::new(ip, port, 0, 0))
    }

    /// Create from an IP address and port
    pub fn new(ip: IpAddr, port: u16) -> Self {
        match ip {
            IpAddr::V4(v4) => SockAddr::new_v4(v4, port),
            IpAddr::V6(v6) => SockAddr::new_v6(v6, port),
        }
    }

    /// Create from a standard library SocketAddr
    pub fn from_std(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => SockAddr::V4(v4),
            SocketAddr::V6(v6) => SockAddr::V6(v6),
        }
    }

    /// Convert to a standard library SocketAddr
    pub fn to_std(&self) -> SocketAddr {
        match self {
            SockAddr::V4(v4) => SocketAddr::V4(*v4),
            SockAddr::V6(v6) => SocketAddr::V6(*v6),
        }
    }

    /// Socket domain to open for this candidate
    pub fn domain(&self) -> Domain {
        match self {
            SockAddr::V4(_) => Domain::IPV4,
            SockAddr::V6(_) => Domain::IPV6,
        }
    }

    /// Socket type of every candidate
    pub fn socket_type(&self) -> Type {
        Type::STREAM
    }

    /// Transport protocol of every candidate
    pub fn protocol(&self) -> Protocol {
        Protocol::TCP
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            SockAddr::V4(v4) => v4.port(),
            SockAddr::V6(v6) => v6.port(),
        }
    }

    /// Get the IP address
    pub fn ip(&self) -> IpAddr {
        match self {
            SockAddr::V4(v4) => IpAddr::V4(*v4.ip()),
            SockAddr::V6(v6) => IpAddr::V6(*v6.ip()),
        }
    }

    /// Check if this is an IPv4 address
    pub fn is_ipv4(&self) -> bool {
        matches!(self, SockAddr::V4(_))
    }

    /// Check if this is an IPv6 address
    pub fn is_ipv6(&self) -> bool {
        matches!(self, SockAddr::V6(_))
    }

    /// The IPv4 address this candidate reaches, unwrapping `::ffff:a.b.c.d`.
    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        match self {
            SockAddr::V4(v4) => Some(*v4.ip()),
            SockAddr::V6(v6) => v6.ip().to_ipv4_mapped(),
        }
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockAddr::V4(v4) => write!(f, "{}", v4),
            SockAddr::V6(v6) => write!(f, "{}", v6),
        }
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(addr: SocketAddr) -> Self {
        SockAddr::from_std(addr)
    }
}

impl From<SockAddr> for SocketAddr {
    fn from(addr: SockAddr) -> Self {
        addr.to_std()
    }
}

impl From<SocketAddrV4> for SockAddr {
    fn from(addr: SocketAddrV4) -> Self {
        SockAddr::V4(addr)
    }
}

impl From<SocketAddrV6> for SockAddr {
    fn from(addr: SocketAddrV6) -> Self {
        SockAddr::V6(addr)
    }
}
