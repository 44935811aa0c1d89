//! FTP control connection with deadlines on every socket it opens
//!
//! FTP uses a control channel plus one data channel per transfer. A hang
//! can happen on any of them, so the connection's deadline covers:
//!
//! ```text
//! connect()            control connect, welcome reply
//! send_command()       command write, reply read
//! make_pasv()          PASV/EPSV exchange
//! make_port()          listener bind, PORT/EPRT exchange
//! transfer_command()   passive: data connect to the server's address
//!                      active:  accept of the server's callback
//! ```
//!
//! Every expiry surfaces as [`Error::FtpTimeout`]; the
//! [`Operation`](crate::error::Operation) in the error says which step it
//! was.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};

use crate::conn::Protocol;
use crate::deadline::Deadline;
use crate::error::{Error, Operation, Result};
use crate::factory::{classify_io, SocketFactory};
use crate::net::{AddressParser, SockAddr, TcpExt};

/// Longest reply line accepted from a server, terminator included.
const MAX_LINE: usize = 8192;

/// How data channels are established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Client connects to an address the server announces (PASV/EPSV).
    Passive,
    /// Server connects back to a listener the client binds (PORT/EPRT).
    Active,
}

/// A complete, possibly multi-line, server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// Reply text with line breaks preserved.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_intermediate(&self) -> bool {
        (300..400).contains(&self.code)
    }

    fn into_error(self) -> Error {
        Error::FtpReply {
            code: self.code,
            message: self.text(),
        }
    }
}

/// Data connection for one transfer.
///
/// Carries the control connection's deadline as its read/write timeout.
#[derive(Debug)]
pub struct DataChannel {
    stream: TcpStream,
    mode: TransferMode,
    size: Option<u64>,
}

impl DataChannel {
    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Transfer size announced in the `150` reply, if any.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn into_stream(self) -> TcpStream {
        self.stream
    }
}

impl Read for DataChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for DataChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// An FTP control connection.
#[derive(Debug)]
pub struct FtpConnection {
    host: String,
    port: u16,
    deadline: Deadline,
    factory: SocketFactory,
    mode: TransferMode,
    control: Option<BufReader<TcpStream>>,
}

impl FtpConnection {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        FtpConnection {
            host: host.into(),
            port,
            deadline: Deadline::UNSET,
            factory: SocketFactory::new(),
            mode: TransferMode::Passive,
            control: None,
        }
    }

    /// Build from a `host[:port]` target, defaulting to port 21.
    pub fn from_target(target: &str) -> Result<Self> {
        let parsed = AddressParser::parse(target, Some(Protocol::Ftp.default_port()))?;
        let port = parsed.port.unwrap_or(Protocol::Ftp.default_port());
        Ok(Self::new(parsed.host, port))
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_factory(mut self, factory: SocketFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Passive mode is on by default.
    pub fn set_passive(&mut self, passive: bool) {
        self.mode = if passive {
            TransferMode::Passive
        } else {
            TransferMode::Active
        };
    }

    pub fn is_open(&self) -> bool {
        self.control.is_some()
    }

    /// Connect the control channel and read the welcome reply.
    ///
    /// Any earlier control socket is closed first.
    pub fn connect(&mut self) -> Result<Reply> {
        self.close();

        let sock = self
            .factory
            .connect(Protocol::Ftp, &self.host, self.port, self.deadline)?;
        self.control = Some(BufReader::new(sock));

        let welcome = match self.read_reply() {
            Ok(reply) => reply,
            Err(err) => {
                self.close();
                return Err(err);
            }
        };
        tracing::debug!(host = %self.host, port = self.port, deadline = %self.deadline, code = welcome.code, "ftp control open");
        Ok(welcome)
    }

    /// Log in, sending `PASS` only when the server asks for it.
    pub fn login(&mut self, user: &str, password: &str) -> Result<Reply> {
        let mut reply = self.send_command(&format!("USER {}", user))?;
        if reply.is_intermediate() {
            reply = self.send_command(&format!("PASS {}", password))?;
        }
        if !reply.is_completion() {
            return Err(Error::FtpProtocol(format!(
                "login not completed: {} {}",
                reply.code,
                reply.text()
            )));
        }
        Ok(reply)
    }

    /// Send a command and return the reply; `4xx`/`5xx` replies are errors.
    pub fn send_command(&mut self, cmd: &str) -> Result<Reply> {
        self.put_line(cmd)?;
        self.read_reply()
    }

    /// Send a command that must complete with a `2xx` reply.
    pub fn void_command(&mut self, cmd: &str) -> Result<Reply> {
        let reply = self.send_command(cmd)?;
        expect_completion(reply)
    }

    /// Read a reply that must be `2xx`, e.g. after a transfer.
    pub fn void_response(&mut self) -> Result<Reply> {
        let reply = self.read_reply()?;
        expect_completion(reply)
    }

    /// Ask the server for a passive data address.
    ///
    /// Uses `PASV` over IPv4 and `EPSV` over IPv6; an `EPSV` reply only
    /// carries a port, so the control connection's peer address is used.
    pub fn make_pasv(&mut self) -> Result<SockAddr> {
        let peer = self.control_stream()?.peer_sockaddr()?;

        if peer.ipv4().is_some() {
            let reply = self.send_command("PASV")?;
            if reply.code != 227 {
                return Err(unexpected(&reply));
            }
            parse_227(&reply.text())
        } else {
            let reply = self.send_command("EPSV")?;
            if reply.code != 229 {
                return Err(unexpected(&reply));
            }
            let port = parse_229(&reply.text())?;
            Ok(SockAddr::new(peer.ip(), port))
        }
    }

    /// Bind a listener for an active-mode data connection and announce it.
    pub fn make_port(&mut self) -> Result<TcpListener> {
        let local = self.control_stream()?.local_sockaddr()?;
        let bind_addr = SockAddr::new(local.ip(), 0);

        let listener = self
            .factory
            .listen(Protocol::Ftp, &self.host, bind_addr, self.deadline)?;
        let announced = SockAddr::from_std(listener.local_addr()?);

        let cmd = match announced.ipv4() {
            Some(ip) => port_command(ip, announced.port()),
            None => format!("EPRT |2|{}|{}|", announced.ip(), announced.port()),
        };
        self.void_command(&cmd)?;
        Ok(listener)
    }

    /// Start a transfer command and return its data channel.
    ///
    /// `rest` sends a `REST` offset first. The reply to `cmd` must be
    /// preliminary (`1xx`).
    pub fn transfer_command(&mut self, cmd: &str, rest: Option<u64>) -> Result<DataChannel> {
        let (stream, reply) = match self.mode {
            TransferMode::Passive => {
                let addr = self.make_pasv()?;
                let stream = self.factory.connect_addr(
                    Protocol::Ftp,
                    &self.host,
                    addr,
                    self.deadline,
                    Operation::DataConnect,
                )?;
                let reply = self.start_transfer(cmd, rest)?;
                (stream, reply)
            }
            TransferMode::Active => {
                let listener = self.make_port()?;
                let reply = self.start_transfer(cmd, rest)?;
                let stream =
                    self.factory
                        .accept(Protocol::Ftp, &self.host, &listener, self.deadline)?;
                (stream, reply)
            }
        };

        let size = if reply.code == 150 {
            parse_150(&reply.text())
        } else {
            None
        };

        Ok(DataChannel {
            stream,
            mode: self.mode,
            size,
        })
    }

    /// Retrieve in binary mode, copying the data channel into `out`.
    pub fn retrieve(&mut self, cmd: &str, out: &mut impl Write) -> Result<u64> {
        self.void_command("TYPE I")?;
        let mut chan = self.transfer_command(cmd, None)?;
        let copied = io::copy(&mut chan, out).map_err(|e| self.classify(e, Operation::Transfer))?;
        drop(chan);
        self.void_response()?;
        Ok(copied)
    }

    /// Store in binary mode, copying `input` into the data channel.
    pub fn store(&mut self, cmd: &str, input: &mut impl Read) -> Result<u64> {
        self.void_command("TYPE I")?;
        let mut chan = self.transfer_command(cmd, None)?;
        let copied = io::copy(input, &mut chan).map_err(|e| self.classify(e, Operation::Transfer))?;
        drop(chan);
        self.void_response()?;
        Ok(copied)
    }

    /// Say goodbye and close the control connection.
    pub fn quit(&mut self) -> Result<Reply> {
        let reply = self.void_command("QUIT");
        self.close();
        reply
    }

    pub fn close(&mut self) {
        if self.control.take().is_some() {
            tracing::debug!(host = %self.host, port = self.port, "ftp control closed");
        }
    }

    fn start_transfer(&mut self, cmd: &str, rest: Option<u64>) -> Result<Reply> {
        if let Some(offset) = rest {
            let reply = self.send_command(&format!("REST {}", offset))?;
            if !reply.is_intermediate() {
                return Err(unexpected(&reply));
            }
        }

        let mut reply = self.send_command(cmd)?;
        // Some servers answer 2xx before the preliminary reply.
        if reply.is_completion() {
            reply = self.read_reply()?;
        }
        if !reply.is_preliminary() {
            return Err(unexpected(&reply));
        }
        Ok(reply)
    }

    fn control_stream(&self) -> Result<&TcpStream> {
        self.control
            .as_ref()
            .map(BufReader::get_ref)
            .ok_or(Error::NotConnected)
    }

    fn put_line(&mut self, cmd: &str) -> Result<()> {
        if cmd.contains(['\r', '\n']) {
            return Err(Error::FtpProtocol(
                "an illegal newline character should not be contained".to_string(),
            ));
        }
        tracing::debug!(host = %self.host, cmd = %mask_password(cmd), "ftp command");

        let line = format!("{}\r\n", cmd);
        let control = self.control.as_mut().ok_or(Error::NotConnected)?;
        let written = control.get_mut().write_all(line.as_bytes());
        written.map_err(|e| self.classify(e, Operation::Command))
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let first = self.read_line()?;
        let code = reply_code(&first)?;
        let mut lines = vec![first];

        if lines[0].as_bytes().get(3) == Some(&b'-') {
            loop {
                let line = self.read_line()?;
                let done = ends_reply(&line, code);
                lines.push(line);
                if done {
                    break;
                }
            }
        }

        let reply = Reply { code, lines };
        tracing::debug!(host = %self.host, code = reply.code, "ftp reply");

        if reply.code >= 400 {
            return Err(reply.into_error());
        }
        Ok(reply)
    }

    fn read_line(&mut self) -> Result<String> {
        let control = self.control.as_mut().ok_or(Error::NotConnected)?;
        let mut line = String::new();
        let read = control
            .by_ref()
            .take(MAX_LINE as u64 + 1)
            .read_line(&mut line);

        match read {
            Ok(0) => Err(Error::from(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "control connection closed",
            ))),
            Ok(n) if n > MAX_LINE => Err(Error::FtpProtocol("reply line too long".to_string())),
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\r', '\n']).len();
                line.truncate(trimmed);
                Ok(line)
            }
            Err(err) => Err(self.classify(err, Operation::Reply)),
        }
    }

    fn classify(&self, err: io::Error, operation: Operation) -> Error {
        classify_io(err, Protocol::Ftp, &self.host, self.port, self.deadline, operation)
    }
}

/// Whether `line` is the last line of a multi-line reply with `code`:
/// the same code, not followed by `-`.
fn ends_reply(line: &str, code: u16) -> bool {
    line.get(..3).and_then(|c| c.parse::<u16>().ok()) == Some(code)
        && line.as_bytes().get(3) != Some(&b'-')
}

fn expect_completion(reply: Reply) -> Result<Reply> {
    if reply.is_completion() {
        Ok(reply)
    } else {
        Err(unexpected(&reply))
    }
}

fn unexpected(reply: &Reply) -> Error {
    Error::FtpProtocol(format!("{} {}", reply.code, reply.text()))
}

fn reply_code(line: &str) -> Result<u16> {
    line.get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| Error::FtpProtocol(format!("malformed reply {:?}", line)))
}

fn mask_password(cmd: &str) -> String {
    match cmd.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("PASS ") => "PASS ****".to_string(),
        _ => cmd.to_string(),
    }
}

fn port_command(ip: Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = ip.octets();
    format!("PORT {},{},{},{},{},{}", a, b, c, d, port >> 8, port & 0xff)
}

/// Address from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_227(text: &str) -> Result<SockAddr> {
    text.get(3..)
        .unwrap_or_default()
        .split(|c: char| !(c.is_ascii_digit() || c == ','))
        .find_map(|token| {
            let numbers: Vec<u8> = token
                .split(',')
                .map(|n| n.parse::<u8>())
                .collect::<std::result::Result<_, _>>()
                .ok()?;
            match numbers[..] {
                [a, b, c, d, p1, p2] => Some(SockAddr::new_v4(
                    Ipv4Addr::new(a, b, c, d),
                    u16::from(p1) << 8 | u16::from(p2),
                )),
                _ => None,
            }
        })
        .ok_or_else(|| Error::FtpProtocol(format!("bad 227 reply: {:?}", text)))
}

/// Port from a `229 Entering Extended Passive Mode (|||port|)` reply.
fn parse_229(text: &str) -> Result<u16> {
    let bad = || Error::FtpProtocol(format!("bad 229 reply: {:?}", text));

    let open = text.find('(').ok_or_else(bad)?;
    let close = text[open..].find(')').ok_or_else(bad)? + open;
    let inner = &text[open + 1..close];

    let delim = inner.chars().next().ok_or_else(bad)?;
    let parts: Vec<&str> = inner.split(delim).collect();
    match parts[..] {
        ["", "", "", port, ""] => port.parse().map_err(|_| bad()),
        _ => Err(bad()),
    }
}

/// Size from a `150 ... (N bytes)` reply.
fn parse_150(text: &str) -> Option<u64> {
    let lower = text.to_ascii_lowercase();
    let end = lower.rfind(" bytes)")?;
    let open = lower[..end].rfind('(')?;
    lower[open + 1..end].trim().parse().ok()
}
