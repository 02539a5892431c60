//! The client side of the protocol: a polling endpoint for producers and native viewers.
//!
//! A [`Client`] wraps any outbound [`Connection`], sends its hello immediately, and resolves the
//! relay's reply on subsequent [`step`](Client::step) calls. Once connected it parses inbound
//! packets with the same record loop the relay uses, so chunked delivery and back-to-back
//! records behave identically on both ends of the wire.

use std::os::unix::io::RawFd;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::protocol::handshake::{self, ERROR_MAGIC, OK_SIZE};
use crate::protocol::{
    AudioChunkPacket, InputEventPacket, PacketHeader, PacketType, VideoFramePacket, HEADER_SIZE,
};
use crate::transport::{Connection, RecvStatus, SendMode, SendStatus};
use crate::{MAX_PACKET_SIZE, PROTOCOL_VERSION, RECV_CHUNK_SIZE};

/// An event produced by [`Client::step`].
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The relay accepted the handshake.
    Connected {
        /// Negotiated capability mask.
        capabilities: u16,
    },
    /// The relay rejected the handshake; the connection is closed and no further events follow.
    Rejected {
        /// Reason string from the relay's `ERROR` reply.
        reason: String,
    },
    /// The connection went away. Always the last event.
    Disconnected,
    /// A video frame arrived.
    VideoFrame {
        /// Header flags; bit [`FLAG_DELTA`](crate::protocol::FLAG_DELTA) marks a delta payload.
        flags: u8,
        /// The frame.
        frame: VideoFramePacket,
    },
    /// An audio chunk arrived.
    AudioChunk {
        /// The chunk.
        chunk: AudioChunkPacket,
    },
    /// An input event arrived.
    InputEvent {
        /// The event.
        event: InputEventPacket,
    },
    /// Opaque configuration bytes arrived.
    Config {
        /// The payload.
        data: Vec<u8>,
    },
}

/// A polling protocol endpoint over any transport connection.
pub struct Client {
    conn: Box<dyn Connection>,
    recv_buf: BytesMut,
    capabilities: u16,
    connected: bool,
    finished: bool,
    next_sequence: u16,
}

impl Client {
    /// Wrap `conn` and immediately send a hello requesting `capabilities`.
    pub fn new(mut conn: Box<dyn Connection>, capabilities: u16) -> Self {
        let hello = handshake::create_hello(PROTOCOL_VERSION, capabilities);
        if !matches!(conn.send(&hello, SendMode::Reliable), SendStatus::Sent) {
            warn!("failed to send hello");
        }
        Self {
            conn,
            recv_buf: BytesMut::new(),
            capabilities: 0,
            connected: false,
            finished: false,
            next_sequence: 0,
        }
    }

    /// Negotiated capability mask; 0 until [`Event::Connected`] has been produced.
    pub fn capabilities(&self) -> u16 {
        self.capabilities
    }

    /// Whether the handshake completed and the connection is still up.
    pub fn is_connected(&self) -> bool {
        self.connected && self.conn.is_open()
    }

    /// Raw descriptor for readiness polling; `None` once closed.
    pub fn readiness_fd(&self) -> Option<RawFd> {
        self.conn.readiness_fd()
    }

    /// Close the connection. The next [`step`](Self::step) produces [`Event::Disconnected`].
    pub fn close(&mut self) {
        self.conn.close();
    }

    /// Drain the connection and produce every pending event.
    pub fn step(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        if self.conn.is_open() {
            let mut chunk = [0u8; RECV_CHUNK_SIZE];
            loop {
                match self.conn.recv(&mut chunk) {
                    RecvStatus::Received(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                    RecvStatus::WouldBlock => break,
                    RecvStatus::Closed => break,
                }
            }
        }

        if !self.connected && !self.finished {
            self.resolve_handshake(&mut events);
        }
        if self.connected {
            self.parse_packets(&mut events);
        }

        if !self.finished && !self.conn.is_open() {
            self.finished = true;
            events.push(Event::Disconnected);
        }
        events
    }

    /// Send a video frame; dropped rather than queued when the relay is congested. Returns
    /// whether every byte was handed to the transport.
    pub fn send_video_frame(&mut self, flags: u8, frame: &VideoFramePacket) -> bool {
        self.send_packet(PacketType::VideoFrame, flags, &frame.encode(), SendMode::TimeSensitive)
    }

    /// Send an audio chunk reliably.
    pub fn send_audio_chunk(&mut self, chunk: &AudioChunkPacket) -> bool {
        self.send_packet(PacketType::AudioChunk, 0, &chunk.encode(), SendMode::Reliable)
    }

    /// Send an input event reliably.
    pub fn send_input_event(&mut self, event: &InputEventPacket) -> bool {
        self.send_packet(PacketType::InputEvent, 0, &event.encode(), SendMode::Reliable)
    }

    /// Send opaque configuration bytes reliably.
    pub fn send_config(&mut self, data: &[u8]) -> bool {
        self.send_packet(PacketType::Config, 0, data, SendMode::Reliable)
    }

    fn send_packet(&mut self, ty: PacketType, flags: u8, payload: &[u8], mode: SendMode) -> bool {
        if !self.is_connected() {
            return false;
        }

        let header = PacketHeader {
            ty,
            flags,
            sequence: self.next_sequence,
            length: payload.len() as u32,
        };
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let mut packet = Vec::with_capacity(HEADER_SIZE + payload.len());
        packet.extend_from_slice(&header.encode());
        packet.extend_from_slice(payload);

        matches!(self.conn.send(&packet, mode), SendStatus::Sent)
    }

    fn resolve_handshake(&mut self, events: &mut Vec<Event>) {
        if self.recv_buf.is_empty() {
            return;
        }

        if is_prefix(&self.recv_buf, b"OK") {
            if self.recv_buf.len() < OK_SIZE {
                return;
            }
            let result = handshake::process_response(&self.recv_buf[..OK_SIZE]);
            self.recv_buf.advance(OK_SIZE);
            self.capabilities = result.capabilities;
            self.connected = true;
            debug!(capabilities = result.capabilities, "connected");
            events.push(Event::Connected {
                capabilities: result.capabilities,
            });
        } else if is_prefix(&self.recv_buf, ERROR_MAGIC) {
            // The reply runs to its NUL terminator; wait for it.
            let Some(nul) = self.recv_buf.iter().position(|&b| b == 0) else {
                return;
            };
            let result = handshake::process_response(&self.recv_buf[..nul + 1]);
            self.recv_buf.advance(nul + 1);
            self.reject(result.error.unwrap_or_else(|| "Unknown error".to_string()), events);
        } else {
            self.reject("Invalid response format".to_string(), events);
        }
    }

    fn reject(&mut self, reason: String, events: &mut Vec<Event>) {
        warn!(reason = %reason, "handshake rejected");
        self.conn.close();
        self.finished = true;
        events.push(Event::Rejected { reason });
    }

    fn parse_packets(&mut self, events: &mut Vec<Event>) {
        while self.recv_buf.len() >= HEADER_SIZE {
            let header = match PacketHeader::decode(&self.recv_buf[..]) {
                Ok(header) => header,
                Err(e) => {
                    warn!(error = %e, "unparseable packet header");
                    self.conn.close();
                    return;
                }
            };

            if header.length as usize > MAX_PACKET_SIZE {
                warn!(length = header.length, "oversized packet");
                self.conn.close();
                return;
            }

            let record_len = HEADER_SIZE + header.length as usize;
            if self.recv_buf.len() < record_len {
                break;
            }

            let payload = &self.recv_buf[HEADER_SIZE..record_len];
            let event = match header.ty {
                PacketType::VideoFrame => VideoFramePacket::decode(payload).map(|frame| {
                    Some(Event::VideoFrame {
                        flags: header.flags,
                        frame,
                    })
                }),
                PacketType::AudioChunk => {
                    AudioChunkPacket::decode(payload).map(|chunk| Some(Event::AudioChunk { chunk }))
                }
                PacketType::InputEvent => {
                    InputEventPacket::decode(payload).map(|event| Some(Event::InputEvent { event }))
                }
                PacketType::Config => Ok(Some(Event::Config {
                    data: payload.to_vec(),
                })),
                PacketType::DebugInfo => Ok(None),
            };

            match event {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "malformed packet payload");
                    self.conn.close();
                    return;
                }
            }
            self.recv_buf.advance(record_len);
        }
    }
}

/// Whether `data` could still become `pattern`, i.e. they are equal on their common prefix.
fn is_prefix(data: &[u8], pattern: &[u8]) -> bool {
    let n = data.len().min(pattern.len());
    data[..n] == pattern[..n]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching() {
        assert!(is_prefix(b"O", b"OK"));
        assert!(is_prefix(b"OK", b"OK"));
        assert!(is_prefix(b"OK\x00\x01", b"OK"));
        assert!(is_prefix(b"ERR", ERROR_MAGIC));
        assert!(!is_prefix(b"EX", ERROR_MAGIC));
        assert!(!is_prefix(b"X", b"OK"));
    }
}
