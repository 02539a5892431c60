//! TCP transport. Addresses take the form `"host:port"`, or `":port"` to bind every interface.
//!
//! Connections are tuned for frame streaming: Nagle's algorithm is disabled and the send buffer
//! is sized for a burst of video frames, so the outbound-queue watermark, not the kernel's
//! default buffering, is what bounds latency.

use std::io;
use std::net;
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::stream::{self, StreamRecv, StreamSend};
use crate::transport::{Connection, Listener, RecvStatus, SendMode, SendStatus};

/// Send-buffer size requested on every connection; roughly a dozen QVGA frames.
const SEND_BUFFER_SIZE: usize = 128 * 1024;

/// Split `"host:port"`; an empty host means every interface.
pub(crate) fn parse_address(address: &str) -> Result<(&str, u16), TransportError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))?;
    Ok((if host.is_empty() { "0.0.0.0" } else { host }, port))
}

fn resolve(address: &str) -> Result<net::SocketAddr, TransportError> {
    use std::net::ToSocketAddrs;

    let (host, port) = parse_address(address)?;
    (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))?
        .next()
        .ok_or_else(|| TransportError::InvalidAddress(address.to_string()))
}

/// Bind a non-blocking listening socket with `SO_REUSEADDR`.
pub(crate) fn bind_listener(address: &str) -> Result<net::TcpListener, TransportError> {
    let addr = resolve(address)?;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(16)?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Apply the per-connection socket options: non-blocking, `TCP_NODELAY`, enlarged send buffer.
pub(crate) fn configure(stream: &net::TcpStream) -> io::Result<()> {
    stream.set_nonblocking(true)?;
    stream.set_nodelay(true)?;
    socket2::SockRef::from(stream).set_send_buffer_size(SEND_BUFFER_SIZE)?;
    Ok(())
}

/// A listening TCP endpoint.
pub struct TcpListener {
    socket: Option<net::TcpListener>,
}

impl TcpListener {
    /// Open a non-blocking listener on `"host:port"` or `":port"`.
    pub fn listen(address: &str) -> Result<Self, TransportError> {
        let socket = bind_listener(address)?;
        info!(address, "tcp transport listening");
        Ok(Self {
            socket: Some(socket),
        })
    }
}

impl Listener for TcpListener {
    fn accept(&mut self) -> Option<Box<dyn Connection>> {
        let socket = self.socket.as_ref()?;
        match socket.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = configure(&stream) {
                    warn!(error = %e, "failed to configure accepted tcp socket");
                    return None;
                }
                debug!(%peer, "accepted tcp connection");
                Some(Box::new(TcpConnection::new(stream)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "tcp accept failed");
                None
            }
        }
    }

    fn close(&mut self) {
        self.socket = None;
    }

    fn is_listening(&self) -> bool {
        self.socket.is_some()
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }
}

/// One TCP connection.
pub struct TcpConnection {
    stream: net::TcpStream,
    open: bool,
}

impl TcpConnection {
    pub(crate) fn new(stream: net::TcpStream) -> Self {
        Self { stream, open: true }
    }
}

impl Connection for TcpConnection {
    fn send(&mut self, data: &[u8], mode: SendMode) -> SendStatus {
        if !self.open {
            return SendStatus::Closed;
        }
        match stream::send_all(&mut self.stream, data, mode) {
            StreamSend::Sent => SendStatus::Sent,
            StreamSend::Dropped => SendStatus::Dropped,
            StreamSend::Failed => {
                self.close();
                SendStatus::Closed
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> RecvStatus {
        if !self.open {
            return RecvStatus::Closed;
        }
        match stream::recv_some(&mut self.stream, buf) {
            StreamRecv::Received(n) => RecvStatus::Received(n),
            StreamRecv::WouldBlock => RecvStatus::WouldBlock,
            StreamRecv::Eof | StreamRecv::Failed => {
                self.close();
                RecvStatus::Closed
            }
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            let _ = self.stream.shutdown(net::Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        self.open.then(|| self.stream.as_raw_fd())
    }
}

/// Open an outbound connection to `"host:port"` and apply the streaming socket options.
pub fn connect(address: &str) -> Result<TcpConnection, TransportError> {
    let addr = resolve(address)?;
    let stream = net::TcpStream::connect(addr)?;
    configure(&stream)?;
    debug!(%addr, "tcp connection established");
    Ok(TcpConnection::new(stream))
}
