//! Unix stream socket transport for same-host producers. Addresses are filesystem paths.

use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::stream::{self, StreamRecv, StreamSend};
use crate::transport::{Connection, Listener, RecvStatus, SendMode, SendStatus};

/// A listening Unix stream socket.
pub struct UnixListener {
    socket: Option<net::UnixListener>,
    path: PathBuf,
}

impl UnixListener {
    /// Create the stream endpoint at `path`, removing any stale socket file first.
    pub fn listen<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            let _ = fs::remove_file(&path);
        }
        let socket = net::UnixListener::bind(&path)?;
        socket.set_nonblocking(true)?;
        info!(path = %path.display(), "unix transport listening");
        Ok(Self {
            socket: Some(socket),
            path,
        })
    }
}

impl Listener for UnixListener {
    fn accept(&mut self) -> Option<Box<dyn Connection>> {
        let socket = self.socket.as_ref()?;
        match socket.accept() {
            Ok((stream, _)) => {
                if let Err(e) = stream.set_nonblocking(true) {
                    warn!(error = %e, "failed to configure accepted unix socket");
                    return None;
                }
                debug!("accepted unix connection");
                Some(Box::new(UnixConnection::new(stream)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "unix accept failed");
                None
            }
        }
    }

    fn close(&mut self) {
        if self.socket.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn is_listening(&self) -> bool {
        self.socket.is_some()
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(|s| s.as_raw_fd())
    }
}

/// One Unix stream connection.
pub struct UnixConnection {
    stream: net::UnixStream,
    open: bool,
}

impl UnixConnection {
    pub(crate) fn new(stream: net::UnixStream) -> Self {
        Self { stream, open: true }
    }
}

impl Connection for UnixConnection {
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
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn readiness_fd(&self) -> Option<RawFd> {
        self.open.then(|| self.stream.as_raw_fd())
    }
}

/// Attach to the stream endpoint at `path`.
pub fn connect<P: AsRef<Path>>(path: P) -> Result<UnixConnection, TransportError> {
    let stream = net::UnixStream::connect(&path)?;
    stream.set_nonblocking(true)?;
    debug!(path = %path.as_ref().display(), "unix connection established");
    Ok(UnixConnection::new(stream))
}
