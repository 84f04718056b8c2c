//! Socket abstraction used by the remote backend, and its TCP implementation.
//!
//! [`GameSocket`] exposes exactly the primitives the connect state machine and
//! the stream reassembler need: non-blocking connect, pending-error and
//! writability checks, a "bytes available" query, and plain read/write.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tracing::debug;

use crate::reassembly::READ_CHUNK;

/// The socket operations a remote session relies on.
pub trait GameSocket {
    /// Start connecting to `host:port`. In non-blocking mode this normally
    /// returns an "in progress" error; see [`is_connect_in_progress`].
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Take the pending socket error, if any (`SO_ERROR`).
    fn take_error(&mut self) -> io::Result<Option<io::Error>>;

    /// Whether an outstanding connect has completed. Call after
    /// [`take_error`](Self::take_error) has reported no failure.
    fn poll_connected(&mut self) -> io::Result<bool>;

    /// Whether a read would not block. For a stream socket with zero bytes
    /// available this signals an orderly close by the peer.
    fn poll_readable(&mut self) -> io::Result<bool>;

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Switch between blocking and non-blocking mode.
    fn set_blocking(&mut self, blocking: bool) -> io::Result<()>;

    /// Read into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write from `buf`, returning how much was written.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Release the socket. Further calls fail with `NotConnected`.
    fn close(&mut self);
}

/// Whether a connect error only means the connection is still being established.
pub fn is_connect_in_progress(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EINPROGRESS)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// TCP options applied to every outgoing connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Interval between keepalive probes. Default: 10s.
    pub keepalive_interval: Duration,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

/// [`GameSocket`] over a real TCP stream.
///
/// The stream is created on [`GameSocket::connect`]. Availability and
/// readability are answered with a non-blocking `peek`, so they never stall
/// even after the socket has been switched to blocking mode.
pub struct TcpSocket {
    stream: Option<TcpStream>,
    blocking: bool,
    config: SocketConfig,
    peek_buf: Box<[u8]>,
}

impl Default for TcpSocket {
    fn default() -> Self {
        Self::new(SocketConfig::default())
    }
}

impl TcpSocket {
    /// Create an unconnected socket with the given options.
    pub fn new(config: SocketConfig) -> Self {
        Self {
            stream: None,
            blocking: true,
            config,
            peek_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }

    fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
        if let Ok(ip) = host.parse() {
            return Ok(SocketAddr::new(ip, port));
        }
        (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address found for {host}"),
            )
        })
    }

    fn configure(&self, socket: &Socket) -> io::Result<()> {
        socket.set_nodelay(self.config.tcp_nodelay)?;
        if self.config.keepalive_enabled {
            let keepalive = TcpKeepalive::new()
                .with_time(self.config.keepalive_idle)
                .with_interval(self.config.keepalive_interval);
            SockRef::from(socket).set_tcp_keepalive(&keepalive)?;
        }
        Ok(())
    }

    /// `Some(n)` bytes ready (0 = peer closed), or `None` if a read would block.
    fn peek_nonblocking(&mut self, len: usize) -> io::Result<Option<usize>> {
        let blocking = self.blocking;
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        if blocking {
            stream.set_nonblocking(true)?;
        }
        let result = stream.peek(&mut self.peek_buf[..len]);
        if blocking {
            stream.set_nonblocking(false)?;
        }

        match result {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl GameSocket for TcpSocket {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let addr = Self::resolve(host, port)?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        self.configure(&socket)?;
        socket.set_nonblocking(!self.blocking)?;

        debug!(%addr, blocking = self.blocking, "connecting");
        let result = socket.connect(&addr.into());
        self.stream = Some(socket.into());
        result
    }

    fn take_error(&mut self) -> io::Result<Option<io::Error>> {
        self.stream()?.take_error()
    }

    // A non-blocking connect has completed once the peer address is known.
    fn poll_connected(&mut self) -> io::Result<bool> {
        match self.stream()?.peer_addr() {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn poll_readable(&mut self) -> io::Result<bool> {
        Ok(self.peek_nonblocking(1)?.is_some())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.peek_nonblocking(READ_CHUNK)?.unwrap_or(0))
    }

    fn set_blocking(&mut self, blocking: bool) -> io::Result<()> {
        self.blocking = blocking;
        if let Some(stream) = &self.stream {
            stream.set_nonblocking(!blocking)?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.stream()?;
        stream.read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self.stream()?;
        stream.write(buf)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
