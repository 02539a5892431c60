//! Per-connection state: the receive accumulator, the handshake step, and the packet record
//! loop.

use std::os::unix::io::RawFd;

use bytes::{Buf, BytesMut};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::protocol::handshake::{self, HELLO_SIZE};
use crate::protocol::{
    AudioChunkPacket, InputEventPacket, PacketHeader, PacketType, VideoFramePacket, HEADER_SIZE,
};
use crate::relay::ClientId;
use crate::transport::{Connection, RecvStatus, SendMode, SendStatus};
use crate::{MAX_PACKET_SIZE, RECV_CHUNK_SIZE};

/// Something a session produced during a drain, delivered to the callback sink by the relay.
pub(crate) enum SessionEvent {
    Connected { capabilities: u16 },
    VideoFrame { flags: u8, frame: VideoFramePacket },
    AudioChunk { chunk: AudioChunkPacket },
    InputEvent { event: InputEventPacket },
    Config { data: Vec<u8> },
}

/// One accepted connection. Owns its transport exclusively; the relay owns the session.
pub(crate) struct Session {
    id: ClientId,
    conn: Box<dyn Connection>,
    recv_buf: BytesMut,
    capabilities: u16,
    handshake_complete: bool,
    next_sequence: u16,
}

impl Session {
    pub(crate) fn new(id: ClientId, conn: Box<dyn Connection>) -> Self {
        Self {
            id,
            conn,
            recv_buf: BytesMut::new(),
            capabilities: 0,
            handshake_complete: false,
            next_sequence: 0,
        }
    }

    pub(crate) fn id(&self) -> ClientId {
        self.id
    }

    pub(crate) fn capabilities(&self) -> u16 {
        self.capabilities
    }

    pub(crate) fn handshake_complete(&self) -> bool {
        self.handshake_complete
    }

    pub(crate) fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    pub(crate) fn readiness_fd(&self) -> Option<RawFd> {
        self.conn.readiness_fd()
    }

    pub(crate) fn close(&mut self) {
        self.conn.close();
    }

    /// Assemble header and payload into one buffer and hand it to the transport. A single send
    /// call keeps the packet inside one link-layer frame on transports with frame semantics.
    /// Returns whether every byte was handed over.
    pub(crate) fn send_packet(
        &mut self,
        ty: PacketType,
        flags: u8,
        payload: &[u8],
        mode: SendMode,
    ) -> bool {
        if !self.handshake_complete || !self.conn.is_open() {
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

    /// Read everything the transport has, then consume the accumulator: the handshake first,
    /// complete packet records after.
    pub(crate) fn drain(&mut self, server_caps: u16) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !self.conn.is_open() {
            return events;
        }

        let mut chunk = [0u8; RECV_CHUNK_SIZE];
        loop {
            match self.conn.recv(&mut chunk) {
                RecvStatus::Received(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                RecvStatus::WouldBlock => break,
                RecvStatus::Closed => break,
            }
        }

        if !self.handshake_complete {
            self.try_handshake(server_caps, &mut events);
        }
        if self.handshake_complete {
            self.parse_packets(&mut events);
        }
        events
    }

    fn try_handshake(&mut self, server_caps: u16, events: &mut Vec<SessionEvent>) {
        if self.recv_buf.len() < HELLO_SIZE {
            return;
        }

        let result = handshake::process_hello(&self.recv_buf[..HELLO_SIZE], server_caps);
        if result.accepted {
            let reply = handshake::create_ok(result.version, result.capabilities);
            if !matches!(self.conn.send(&reply, SendMode::Reliable), SendStatus::Sent) {
                self.conn.close();
                return;
            }
            // Exactly the hello is consumed; a pipelined first packet stays for the record loop.
            self.recv_buf.advance(HELLO_SIZE);
            self.capabilities = result.capabilities;
            self.handshake_complete = true;
            debug!(
                id = self.id,
                capabilities = result.capabilities,
                "handshake complete"
            );
            events.push(SessionEvent::Connected {
                capabilities: result.capabilities,
            });
        } else {
            let reason = result.error.as_deref().unwrap_or("Handshake failed");
            let reply = handshake::create_error(reason);
            let _ = self.conn.send(&reply, SendMode::Reliable);
            self.conn.close();
            debug!(id = self.id, reason, "handshake rejected");
        }
    }

    fn parse_packets(&mut self, events: &mut Vec<SessionEvent>) {
        while self.recv_buf.len() >= HEADER_SIZE {
            let header = match PacketHeader::decode(&self.recv_buf[..]) {
                Ok(header) => header,
                Err(e) => {
                    warn!(id = self.id, error = %e, "unparseable packet header");
                    self.conn.close();
                    return;
                }
            };

            if header.length as usize > MAX_PACKET_SIZE {
                warn!(id = self.id, length = header.length, "oversized packet");
                self.conn.close();
                return;
            }

            let record_len = HEADER_SIZE + header.length as usize;
            if self.recv_buf.len() < record_len {
                break;
            }

            let payload = &self.recv_buf[HEADER_SIZE..record_len];
            match decode_packet(header, payload) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    warn!(id = self.id, error = %e, "malformed packet payload");
                    self.conn.close();
                    return;
                }
            }
            self.recv_buf.advance(record_len);
        }
    }
}

/// Decode one complete record into a session event. `Ok(None)` is a packet the relay consumes
/// without a callback (debug info).
fn decode_packet(
    header: PacketHeader,
    payload: &[u8],
) -> Result<Option<SessionEvent>, ProtocolError> {
    let event = match header.ty {
        PacketType::VideoFrame => SessionEvent::VideoFrame {
            flags: header.flags,
            frame: VideoFramePacket::decode(payload)?,
        },
        PacketType::AudioChunk => SessionEvent::AudioChunk {
            chunk: AudioChunkPacket::decode(payload)?,
        },
        PacketType::InputEvent => SessionEvent::InputEvent {
            event: InputEventPacket::decode(payload)?,
        },
        PacketType::Config => SessionEvent::Config {
            data: payload.to_vec(),
        },
        PacketType::DebugInfo => return Ok(None),
    };
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities;
    use crate::PROTOCOL_VERSION;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// An in-memory connection fed by the test, recording everything sent to it.
    struct ScriptedConnection {
        inbound: VecDeque<Vec<u8>>,
        sent: Arc<Mutex<Vec<u8>>>,
        open: bool,
    }

    impl ScriptedConnection {
        fn new() -> Self {
            Self {
                inbound: VecDeque::new(),
                sent: Arc::new(Mutex::new(Vec::new())),
                open: true,
            }
        }

        fn push(&mut self, bytes: &[u8]) {
            self.inbound.push_back(bytes.to_vec());
        }
    }

    impl Connection for ScriptedConnection {
        fn send(&mut self, data: &[u8], _mode: SendMode) -> SendStatus {
            if !self.open {
                return SendStatus::Closed;
            }
            self.sent.lock().unwrap().extend_from_slice(data);
            SendStatus::Sent
        }

        fn recv(&mut self, buf: &mut [u8]) -> RecvStatus {
            if !self.open {
                return RecvStatus::Closed;
            }
            match self.inbound.pop_front() {
                Some(bytes) => {
                    assert!(bytes.len() <= buf.len());
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    RecvStatus::Received(bytes.len())
                }
                None => RecvStatus::WouldBlock,
            }
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn readiness_fd(&self) -> Option<RawFd> {
            None
        }
    }

    fn session_with(bytes_per_read: &[&[u8]]) -> Session {
        let mut conn = ScriptedConnection::new();
        for bytes in bytes_per_read {
            conn.push(bytes);
        }
        Session::new(1, Box::new(conn))
    }

    fn record(ty: PacketType, flags: u8, payload: &[u8]) -> Vec<u8> {
        let header = PacketHeader {
            ty,
            flags,
            sequence: 0,
            length: payload.len() as u32,
        };
        let mut bytes = header.encode().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn pipelined_hello_and_packet_parse_in_one_drain() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, capabilities::ALL);
        let input = record(
            PacketType::InputEvent,
            0,
            &InputEventPacket {
                buttons: 0x0101,
                reserved: 0,
            }
            .encode(),
        );
        let mut combined = hello.to_vec();
        combined.extend_from_slice(&input);

        let mut session = session_with(&[&combined]);
        let events = session.drain(capabilities::ALL);

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            SessionEvent::Connected {
                capabilities: capabilities::ALL
            }
        ));
        assert!(matches!(
            events[1],
            SessionEvent::InputEvent {
                event: InputEventPacket {
                    buttons: 0x0101,
                    ..
                }
            }
        ));
        assert!(session.handshake_complete());
        assert!(session.is_open());
    }

    #[test]
    fn short_hello_waits() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, 0);
        let mut session = session_with(&[&hello[..14]]);
        assert!(session.drain(capabilities::ALL).is_empty());
        assert!(!session.handshake_complete());
        assert!(session.is_open());
    }

    #[test]
    fn rejected_hello_replies_and_closes() {
        let hello = handshake::create_hello(99, 0);
        let mut session = session_with(&[&hello]);
        let events = session.drain(capabilities::ALL);

        assert!(events.is_empty());
        assert!(!session.is_open());
    }

    #[test]
    fn oversized_length_closes() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, 0);
        let header = PacketHeader {
            ty: PacketType::VideoFrame,
            flags: 0,
            sequence: 0,
            length: u32::MAX,
        };
        let mut session = session_with(&[&hello, &header.encode()]);
        let events = session.drain(capabilities::ALL);

        assert_eq!(events.len(), 1); // the Connected event
        assert!(!session.is_open());
    }

    #[test]
    fn unknown_type_closes() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, 0);
        let bogus = [0x09u8, 0, 0, 0, 0, 0, 0, 0];
        let mut session = session_with(&[&hello, &bogus]);
        session.drain(capabilities::ALL);
        assert!(!session.is_open());
    }

    #[test]
    fn malformed_payload_closes() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, 0);
        // A video record whose payload is shorter than its own dimension fields.
        let bad_video = record(PacketType::VideoFrame, 0, &[0x00, 0x01]);
        let mut session = session_with(&[&hello, &bad_video]);
        session.drain(capabilities::ALL);
        assert!(!session.is_open());
    }

    #[test]
    fn debug_info_is_consumed_silently() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, capabilities::ALL);
        let debug = record(PacketType::DebugInfo, 0, b"state dump");
        let input = record(PacketType::InputEvent, 0, &[0, 1, 0, 0]);
        let mut session = session_with(&[&hello, &debug, &input]);
        let events = session.drain(capabilities::ALL);

        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], SessionEvent::InputEvent { .. }));
        assert!(session.is_open());
    }

    #[test]
    fn records_survive_arbitrary_chunking() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, capabilities::ALL);
        let mut stream = hello.to_vec();
        stream.extend_from_slice(&record(
            PacketType::VideoFrame,
            0,
            &VideoFramePacket {
                width: 2,
                height: 2,
                data: vec![1, 2, 3, 4],
            }
            .encode(),
        ));
        stream.extend_from_slice(&record(PacketType::Config, 0, b"cfg"));
        stream.extend_from_slice(&record(PacketType::InputEvent, 0, &[0, 2, 0, 0]));

        // Deliver the whole exchange three bytes at a time.
        let mut session = {
            let mut conn = ScriptedConnection::new();
            for piece in stream.chunks(3) {
                conn.push(piece);
            }
            Session::new(1, Box::new(conn))
        };

        let events = session.drain(capabilities::ALL);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], SessionEvent::Connected { .. }));
        assert!(matches!(events[1], SessionEvent::VideoFrame { .. }));
        assert!(matches!(events[2], SessionEvent::Config { .. }));
        assert!(matches!(events[3], SessionEvent::InputEvent { .. }));
    }

    #[test]
    fn outbound_sequence_increments() {
        let hello = handshake::create_hello(PROTOCOL_VERSION, capabilities::ALL);
        let mut conn = ScriptedConnection::new();
        conn.push(&hello);
        let sent = Arc::clone(&conn.sent);
        let mut session = Session::new(1, Box::new(conn));
        session.drain(capabilities::ALL);

        let payload = VideoFramePacket {
            width: 1,
            height: 1,
            data: vec![0xFF],
        }
        .encode();
        assert!(session.send_packet(PacketType::VideoFrame, 0, &payload, SendMode::Reliable));
        assert!(session.send_packet(PacketType::VideoFrame, 0, &payload, SendMode::Reliable));

        // The connection recorded the 6-byte OK reply, then the two records.
        let sent = sent.lock().unwrap();
        let first = PacketHeader::decode(&sent[6..]).unwrap();
        let second =
            PacketHeader::decode(&sent[6 + HEADER_SIZE + first.length as usize..]).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
    }
}
