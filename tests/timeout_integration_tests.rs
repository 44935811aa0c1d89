//! Integration tests for deadline-aware connections
//!
//! These tests drive the public API against loopback servers.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use timeout_conn::net::{self, SockAddr};
use timeout_conn::{
    Connection, Deadline, Dialer, Error, FtpConnection, HttpsConnection, Operation, Protocol,
    Registry, SocketFactory, SystemDialer, TimeoutConfig, TlsConfig,
};
use url::Url;

/// Dialer that stalls on a chosen address until the deadline runs out.
struct StallingDialer {
    stall_on: SockAddr,
}

impl Dialer for StallingDialer {
    fn connect(&self, addr: &SockAddr, deadline: Deadline) -> net::Result<TcpStream> {
        if *addr == self.stall_on {
            std::thread::sleep(deadline.duration().unwrap_or(Duration::from_secs(1)));
            return Err(net::Error::Timeout);
        }
        SystemDialer::default().connect(addr, deadline)
    }

    fn listen(&self, addr: &SockAddr, deadline: Deadline) -> net::Result<TcpListener> {
        SystemDialer::default().listen(addr, deadline)
    }
}

fn loopback_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind listener");
    let port = listener.local_addr().expect("Failed to get local address").port();
    (listener, port)
}

/// A loopback port with nothing listening on it.
fn refused_addr() -> SockAddr {
    let (listener, port) = loopback_listener();
    drop(listener);
    SockAddr::from_std(SocketAddr::from(([127, 0, 0, 1], port)))
}

fn url(s: &str) -> Url {
    Url::parse(s).expect("Failed to parse URL")
}

#[test]
fn test_global_install_and_reset() {
    let (listener, port) = loopback_listener();

    let server_handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("Failed to accept connection");
        let mut buf = [0u8; 32];
        let n = stream.read(&mut buf).expect("Failed to read from client");
        stream.write_all(&buf[..n]).expect("Failed to write to client");
    });

    timeout_conn::set_http_timeout(10.0).expect("Failed to install HTTP timeout");
    timeout_conn::set_https_timeout(5.0).expect("Failed to install HTTPS timeout");
    assert!(timeout_conn::set_ftp_timeout(0.0).is_err());

    let registry = Registry::global();
    assert_eq!(
        registry.default_deadline(Protocol::Http),
        Deadline::from_secs_f64(10.0).unwrap()
    );
    assert_eq!(
        registry.default_deadline(Protocol::Https),
        Deadline::from_secs_f64(5.0).unwrap()
    );

    let mut conn = match registry
        .open(&url(&format!("http://127.0.0.1:{}/", port)))
        .expect("Failed to open connection")
    {
        Connection::Plain(conn) => conn,
        other => panic!("expected plain connection, got {other:?}"),
    };
    assert_eq!(
        conn.stream().unwrap().read_timeout().unwrap(),
        Some(Duration::from_secs(10))
    );

    conn.write_all(b"ping").expect("Failed to write to server");
    let mut buf = [0u8; 4];
    conn.read_exact(&mut buf).expect("Failed to read from server");
    assert_eq!(&buf, b"ping");
    server_handle.join().expect("Server thread panicked");

    timeout_conn::reset();
    assert!(registry.handlers().iter().all(|(_, h)| !h.is_timeout()));
    // The open connection keeps the deadline it was built with.
    assert_eq!(conn.deadline(), Deadline::from_secs_f64(10.0).unwrap());
}

#[test]
fn test_last_candidate_success() {
    let (listener, port) = loopback_listener();
    let live = SockAddr::from_std(listener.local_addr().unwrap());
    let candidates = vec![refused_addr(), refused_addr(), refused_addr(), live];

    let registry =
        Registry::new().with_factory(SocketFactory::new().with_resolver(candidates));
    registry
        .install_http_timeout(Deadline::from_secs_f64(5.0).unwrap())
        .unwrap();

    let conn = registry
        .open(&url(&format!("http://dual.example:{}/", port)))
        .expect("Failed to reach the last candidate");
    let (_server, peer) = listener.accept().expect("Failed to accept connection");
    match conn {
        Connection::Plain(conn) => {
            assert_eq!(conn.stream().unwrap().local_addr().unwrap(), peer);
        }
        other => panic!("expected plain connection, got {other:?}"),
    }
}

#[test]
fn test_all_candidates_refused() {
    let candidates = vec![refused_addr(), refused_addr()];
    let registry =
        Registry::new().with_factory(SocketFactory::new().with_resolver(candidates));
    registry
        .install_http_timeout(Deadline::from_secs_f64(5.0).unwrap())
        .unwrap();

    let err = registry.open(&url("http://dual.example/")).unwrap_err();
    assert!(!err.is_timeout());
    match err {
        Error::Socket(net::Error::Io(io)) => {
            assert_eq!(io.kind(), std::io::ErrorKind::ConnectionRefused)
        }
        other => panic!("expected refused socket error, got {other:?}"),
    }
}

#[test]
fn test_connect_times_out_near_deadline() {
    let stall_on = SockAddr::from_std(SocketAddr::from(([192, 0, 2, 1], 80)));
    let factory = SocketFactory::new()
        .with_resolver(vec![stall_on])
        .with_dialer(StallingDialer { stall_on });
    let registry = Registry::new().with_factory(factory);
    registry
        .install_http_timeout(Deadline::from_secs_f64(0.3).unwrap())
        .unwrap();

    let start = Instant::now();
    let err = registry.open(&url("http://fake.com/")).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, Error::HttpTimeout(_)), "got {err:?}");
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_secs(3));
}

#[test]
fn test_concurrent_connections() {
    let (listener, port) = loopback_listener();

    let server_handle = std::thread::spawn(move || {
        for _ in 0..5 {
            let (mut stream, _) = listener.accept().expect("Failed to accept connection");
            let mut buf = [0u8; 10];
            let n = stream.read(&mut buf).expect("Failed to read");
            stream.write_all(&buf[..n]).expect("Failed to write");
        }
    });

    let registry = Arc::new(Registry::new());
    registry
        .install_http_timeout(Deadline::from_secs_f64(5.0).unwrap())
        .unwrap();

    let mut handles = vec![];
    for i in 0..5 {
        let registry = Arc::clone(&registry);
        handles.push(std::thread::spawn(move || {
            let mut conn = registry
                .open(&url(&format!("http://127.0.0.1:{}/", port)))
                .expect("Failed to connect");
            let Connection::Plain(ref mut http) = conn else {
                panic!("expected plain connection");
            };

            let message = format!("Client-{}", i);
            http.write_all(message.as_bytes()).expect("Failed to write");
            let mut buf = [0u8; 10];
            let n = http.read(&mut buf).expect("Failed to read");
            assert_eq!(String::from_utf8_lossy(&buf[..n]), message);
        }));
    }

    for handle in handles {
        handle.join().expect("Client thread panicked");
    }
    server_handle.join().expect("Server thread panicked");
}

#[test]
fn test_https_handshake_stall() {
    // Completes TCP through the backlog, never speaks TLS.
    let (listener, port) = loopback_listener();
    let tls = TlsConfig::with_webpki_roots().expect("Failed to build TLS config");
    let mut conn = HttpsConnection::new("localhost", port, tls)
        .with_deadline(Deadline::from_secs_f64(0.3).unwrap())
        .with_factory(SocketFactory::new().with_resolver(vec![SockAddr::from_std(
            listener.local_addr().unwrap(),
        )]));

    let start = Instant::now();
    let err = conn.open().unwrap_err();
    assert!(matches!(err, Error::HttpsTimeout(_)), "got {err:?}");
    assert_eq!(err.timeout_details().unwrap().operation, Operation::Handshake);
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_ftp_through_registry() {
    let (listener, port) = loopback_listener();

    let server_handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().expect("Failed to accept connection");
        let mut control = BufReader::new(stream);
        control
            .get_mut()
            .write_all(b"220 Mock FTP ready\r\n")
            .expect("Failed to send welcome");

        let mut line = String::new();
        control.read_line(&mut line).expect("Failed to read command");
        assert_eq!(line, "NOOP\r\n");
        control
            .get_mut()
            .write_all(b"200 NOOP ok\r\n")
            .expect("Failed to send reply");

        // Hold the control connection until the client hangs up.
        let _ = control.read_line(&mut line);
    });

    let registry = Registry::new();
    TimeoutConfig {
        ftp: Some(2.0),
        ..Default::default()
    }
    .apply(&registry)
    .expect("Failed to apply configuration");

    let conn = registry
        .open(&url(&format!("ftp://127.0.0.1:{}/", port)))
        .expect("Failed to open FTP connection");
    let Connection::FtpControl(mut ftp) = conn else {
        panic!("expected FTP connection");
    };
    assert_eq!(ftp.deadline(), Deadline::from_secs_f64(2.0).unwrap());
    assert_eq!(ftp.send_command("NOOP").unwrap().code, 200);
    ftp.close();

    server_handle.join().expect("Server thread panicked");
}

#[test]
fn test_ftp_silent_server() {
    let (listener, port) = loopback_listener();
    let mut ftp = FtpConnection::new("127.0.0.1", port)
        .with_deadline(Deadline::from_secs_f64(0.3).unwrap());

    let err = ftp.connect().unwrap_err();
    assert!(matches!(err, Error::FtpTimeout(_)), "got {err:?}");
    assert_eq!(err.timeout_details().unwrap().operation, Operation::Reply);
    drop(listener);
}
