//! Transport abstractions and their three implementations: Unix stream sockets, TCP, and
//! server-side WebSocket over TCP.
//!
//! A [`Listener`] accepts [`Connection`]s; both expose a raw readiness descriptor so the relay
//! can sleep on many sockets at once. All I/O is non-blocking; the send path takes a
//! [`SendMode`] deciding what happens when the peer cannot keep up.

pub mod tcp;
pub mod unix;
pub mod websocket;

pub(crate) mod poll;
pub(crate) mod stream;

use std::os::unix::io::RawFd;

/// Reliability hint passed to [`Connection::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendMode {
    /// Deliver the whole buffer or close the connection trying. The transport may wait up to
    /// [`RELIABLE_SEND_WAIT_MS`](crate::RELIABLE_SEND_WAIT_MS) for writability; past that the
    /// connection is closed rather than stalled further.
    Reliable,
    /// Drop the whole buffer when the peer's outbound queue holds more than
    /// [`SEND_QUEUE_LIMIT`](crate::SEND_QUEUE_LIMIT) bytes, or when the first byte would block.
    /// Either every byte is handed over or none are.
    TimeSensitive,
}

/// Outcome of a [`Connection::send`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// Every byte was handed to the transport.
    Sent,
    /// Nothing was transmitted; a time-sensitive buffer was dropped whole.
    Dropped,
    /// A fatal error occurred and the connection is now closed.
    Closed,
}

/// Outcome of a [`Connection::recv`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvStatus {
    /// This many bytes were written into the front of the buffer.
    Received(usize),
    /// No data available right now; try again after the next readiness wait.
    WouldBlock,
    /// The peer closed, or a fatal error occurred; the connection is now closed.
    Closed,
}

/// A bidirectional, non-blocking byte-stream connection.
pub trait Connection: Send {
    /// Send `data` under the given reliability hint. Partial sends are never left behind: the
    /// buffer is delivered whole, dropped whole, or the connection is closed.
    fn send(&mut self, data: &[u8], mode: SendMode) -> SendStatus;

    /// Read available bytes into `buf` without blocking.
    fn recv(&mut self, buf: &mut [u8]) -> RecvStatus;

    /// Close the connection. Idempotent.
    fn close(&mut self);

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;

    /// Raw descriptor for readiness polling; `None` once closed.
    fn readiness_fd(&self) -> Option<RawFd>;
}

/// A non-blocking listening endpoint producing [`Connection`]s.
pub trait Listener: Send {
    /// Accept one pending connection, or `None` when none is waiting.
    fn accept(&mut self) -> Option<Box<dyn Connection>>;

    /// Stop listening and release the socket. Idempotent.
    fn close(&mut self);

    /// Whether the listener is still accepting.
    fn is_listening(&self) -> bool;

    /// Raw descriptor for readiness polling; `None` once closed.
    fn readiness_fd(&self) -> Option<RawFd>;
}
