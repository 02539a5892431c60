//! Error types for the wire codecs and the transport constructors.

use std::io;

use thiserror::Error;

/// Errors produced by the pure wire codecs and the packet record loop.
///
/// Intentionally minimal: only the variants the parsers actually produce. Handshake rejections
/// are not errors at this level; they travel as [`HandshakeResult`](crate::protocol::handshake::HandshakeResult)
/// values because a rejection must still be serialized back to the peer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer bytes were supplied than the minimal frame requires. Recoverable: wait for more
    /// bytes on the accumulator.
    #[error("truncated input: need {expected} bytes, have {actual}")]
    Truncated {
        /// Minimal number of bytes the frame requires.
        expected: usize,
        /// Number of bytes actually supplied.
        actual: usize,
    },

    /// The packet type byte is outside the known set.
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    /// A header announced a payload larger than the configured ceiling.
    #[error("packet length {0} exceeds the {1} byte ceiling")]
    OversizedPacket(u32, usize),

    /// The two buffers handed to the delta helpers differ in length.
    #[error("delta length mismatch: {0} vs {1}")]
    DeltaLengthMismatch(usize, usize),
}

/// Errors surfaced synchronously when opening a listener or an outbound connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The address string could not be parsed for this transport.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The underlying socket operation failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}
