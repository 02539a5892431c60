//! The binary wire protocol: packet header, typed payloads, handshake messages, and XOR delta
//! helpers.
//!
//! Every multi-byte integer on the wire is big-endian. The codecs here are pure and stateless;
//! framing against a byte stream is the business of the relay's session loop.

pub mod delta;
pub mod handshake;

use bytes::{Buf, BufMut};

use crate::error::ProtocolError;

/// Number of bytes in a serialized [`PacketHeader`].
pub const HEADER_SIZE: usize = 8;

/// Header flag bit 0: the payload is an XOR difference against the receiver's previously
/// reconstructed frame.
pub const FLAG_DELTA: u8 = 0x01;

/// Header flag bits 1-2, reserved for a compression level. Never set.
pub const FLAG_COMPRESS_1: u8 = 0x02;

/// See [`FLAG_COMPRESS_1`].
pub const FLAG_COMPRESS_2: u8 = 0x04;

/// Capability bits negotiated at handshake.
pub mod capabilities {
    /// The peer understands XOR delta frames.
    pub const DELTA: u16 = 0x01;

    /// The peer accepts audio chunks.
    pub const AUDIO: u16 = 0x02;

    /// The peer accepts debug info packets.
    pub const DEBUG: u16 = 0x04;

    /// Every capability bit this crate defines.
    pub const ALL: u16 = DELTA | AUDIO | DEBUG;
}

/// Identifies the payload carried by a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// A [`VideoFramePacket`].
    VideoFrame = 0x01,
    /// An [`AudioChunkPacket`].
    AudioChunk = 0x02,
    /// An [`InputEventPacket`].
    InputEvent = 0x03,
    /// Opaque configuration bytes.
    Config = 0x04,
    /// Opaque debug payload; relayed peers may ignore it.
    DebugInfo = 0x05,
}

impl PacketType {
    /// Map a wire byte back to a packet type.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::VideoFrame),
            0x02 => Some(PacketType::AudioChunk),
            0x03 => Some(PacketType::InputEvent),
            0x04 => Some(PacketType::Config),
            0x05 => Some(PacketType::DebugInfo),
            _ => None,
        }
    }
}

/// The 8-byte header preceding every packet payload.
///
/// `sequence` increases per sender and carries no cross-type ordering requirement. `length` is
/// the payload length in bytes and is only trusted up to [`MAX_PACKET_SIZE`](crate::MAX_PACKET_SIZE)
/// by the record loop; the codec itself applies no ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload type.
    pub ty: PacketType,
    /// Bitfield; see [`FLAG_DELTA`].
    pub flags: u8,
    /// Wrapping per-sender packet counter.
    pub sequence: u16,
    /// Payload length in bytes.
    pub length: u32,
}

impl PacketHeader {
    /// Serialize into exactly [`HEADER_SIZE`] bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut cursor = &mut bytes[..];
        cursor.put_u8(self.ty as u8);
        cursor.put_u8(self.flags);
        cursor.put_u16(self.sequence);
        cursor.put_u32(self.length);
        bytes
    }

    /// Parse a header from the front of `data`.
    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }
        let ty_byte = data.get_u8();
        let ty = PacketType::from_u8(ty_byte).ok_or(ProtocolError::UnknownType(ty_byte))?;
        Ok(Self {
            ty,
            flags: data.get_u8(),
            sequence: data.get_u16(),
            length: data.get_u32(),
        })
    }
}

/// A video frame or delta frame. Whether `data` holds whole pixels or an XOR difference is
/// signaled out-of-band by [`FLAG_DELTA`] in the packet header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoFramePacket {
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Opaque pixel or delta bytes.
    pub data: Vec<u8>,
}

impl VideoFramePacket {
    /// Serialize as `width`, `height`, then the raw frame bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.data.len());
        bytes.put_u16(self.width);
        bytes.put_u16(self.height);
        bytes.put_slice(&self.data);
        bytes
    }

    /// Parse a payload produced by [`encode`](Self::encode). Everything after the dimensions is
    /// taken verbatim as frame data.
    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::Truncated {
                expected: 4,
                actual: data.len(),
            });
        }
        let width = data.get_u16();
        let height = data.get_u16();
        Ok(Self {
            width,
            height,
            data: data.to_vec(),
        })
    }
}

/// A chunk of interleaved signed 16-bit audio samples.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioChunkPacket {
    /// Samples per second.
    pub sample_rate: u16,
    /// Interleaved channel count.
    pub channels: u8,
    /// Interleaved samples.
    pub samples: Vec<i16>,
}

impl AudioChunkPacket {
    /// Serialize as `sample_rate`, `channels`, then each sample big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(3 + self.samples.len() * 2);
        bytes.put_u16(self.sample_rate);
        bytes.put_u8(self.channels);
        for &sample in &self.samples {
            bytes.put_i16(sample);
        }
        bytes
    }

    /// Parse a payload produced by [`encode`](Self::encode). A trailing odd byte is discarded to
    /// keep the last sample aligned; it is not an error.
    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 3 {
            return Err(ProtocolError::Truncated {
                expected: 3,
                actual: data.len(),
            });
        }
        let sample_rate = data.get_u16();
        let channels = data.get_u8();
        let count = data.remaining() / 2;
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push(data.get_i16());
        }
        Ok(Self {
            sample_rate,
            channels,
            samples,
        })
    }
}

/// A controller state snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEventPacket {
    /// Bitmask of pressed buttons.
    pub buttons: u16,
    /// Reserved; always zero on the wire.
    pub reserved: u16,
}

impl InputEventPacket {
    /// Serialize into 4 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4);
        bytes.put_u16(self.buttons);
        bytes.put_u16(self.reserved);
        bytes
    }

    /// Parse a payload produced by [`encode`](Self::encode).
    pub fn decode(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 4 {
            return Err(ProtocolError::Truncated {
                expected: 4,
                actual: data.len(),
            });
        }
        Ok(Self {
            buttons: data.get_u16(),
            reserved: data.get_u16(),
        })
    }
}
