//! The connection handshake: a fixed-size hello from the client answered by a fixed-size `OK`
//! or a NUL-terminated `ERROR` line.
//!
//! Capabilities negotiate by intersection: the server answers with the bitwise AND of the
//! client's requested bits and its own mask, so unknown client bits drop out silently.

use crate::PROTOCOL_VERSION;

/// Magic prefix of the client hello.
pub const HELLO_MAGIC: &[u8] = b"PERUN_HELLO";

/// Serialized size of a client hello: magic, version, requested capabilities.
pub const HELLO_SIZE: usize = 15;

/// Serialized size of an `OK` reply: magic, version, negotiated capabilities.
pub const OK_SIZE: usize = 6;

/// Magic prefix of an `ERROR` reply.
pub const ERROR_MAGIC: &[u8] = b"ERROR";

/// Outcome of parsing a handshake message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResult {
    /// Whether the message was a well-formed acceptance.
    pub accepted: bool,
    /// Protocol version carried by the message (0 when unreadable).
    pub version: u16,
    /// Negotiated capability mask (0 unless accepted).
    pub capabilities: u16,
    /// Reason for rejection; `None` when accepted.
    pub error: Option<String>,
}

impl HandshakeResult {
    fn rejected(reason: &str, version: u16) -> Self {
        Self {
            accepted: false,
            version,
            capabilities: 0,
            error: Some(reason.to_string()),
        }
    }
}

/// Build the 15-byte client hello.
pub fn create_hello(version: u16, requested: u16) -> [u8; HELLO_SIZE] {
    let mut bytes = [0u8; HELLO_SIZE];
    bytes[..11].copy_from_slice(HELLO_MAGIC);
    bytes[11..13].copy_from_slice(&version.to_be_bytes());
    bytes[13..15].copy_from_slice(&requested.to_be_bytes());
    bytes
}

/// Validate a client hello and negotiate capabilities against `server_caps`.
///
/// Exactly [`HELLO_SIZE`] bytes are inspected; callers must leave any surplus in their
/// accumulator for the packet parser.
pub fn process_hello(data: &[u8], server_caps: u16) -> HandshakeResult {
    if data.len() < HELLO_SIZE {
        return HandshakeResult::rejected("Handshake too short", 0);
    }
    if &data[..11] != HELLO_MAGIC {
        return HandshakeResult::rejected("Invalid magic string", 0);
    }

    let version = u16::from_be_bytes([data[11], data[12]]);
    if version != PROTOCOL_VERSION {
        return HandshakeResult::rejected("Unsupported protocol version", version);
    }

    let requested = u16::from_be_bytes([data[13], data[14]]);
    HandshakeResult {
        accepted: true,
        version,
        capabilities: requested & server_caps,
        error: None,
    }
}

/// Build the 6-byte `OK` reply.
pub fn create_ok(version: u16, negotiated: u16) -> [u8; OK_SIZE] {
    let mut bytes = [0u8; OK_SIZE];
    bytes[..2].copy_from_slice(b"OK");
    bytes[2..4].copy_from_slice(&version.to_be_bytes());
    bytes[4..6].copy_from_slice(&negotiated.to_be_bytes());
    bytes
}

/// Build an `ERROR` reply carrying `reason` and a trailing NUL.
pub fn create_error(reason: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(ERROR_MAGIC.len() + reason.len() + 1);
    bytes.extend_from_slice(ERROR_MAGIC);
    bytes.extend_from_slice(reason.as_bytes());
    bytes.push(0);
    bytes
}

/// Parse the server's reply to a hello (client side).
pub fn process_response(data: &[u8]) -> HandshakeResult {
    if data.len() < 2 {
        return HandshakeResult::rejected("Response too short", 0);
    }

    if data.len() >= OK_SIZE && &data[..2] == b"OK" {
        return HandshakeResult {
            accepted: true,
            version: u16::from_be_bytes([data[2], data[3]]),
            capabilities: u16::from_be_bytes([data[4], data[5]]),
            error: None,
        };
    }

    if data.len() >= ERROR_MAGIC.len() && &data[..ERROR_MAGIC.len()] == ERROR_MAGIC {
        let message = &data[ERROR_MAGIC.len()..];
        let message = match message.iter().position(|&b| b == 0) {
            Some(nul) => &message[..nul],
            None => message,
        };
        let reason = if message.is_empty() {
            "Unknown error".to_string()
        } else {
            String::from_utf8_lossy(message).into_owned()
        };
        return HandshakeResult::rejected(&reason, 0);
    }

    HandshakeResult::rejected("Invalid response format", 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::capabilities;

    #[test]
    fn hello_happy_path_bytes() {
        // The canonical on-wire exchange: hello requesting DELTA|AUDIO against a server
        // advertising everything.
        let hello = create_hello(1, 0x0003);
        assert_eq!(
            hello,
            [
                0x50, 0x45, 0x52, 0x55, 0x4E, 0x5F, 0x48, 0x45, 0x4C, 0x4C, 0x4F, 0x00, 0x01,
                0x00, 0x03
            ]
        );

        let result = process_hello(&hello, capabilities::ALL);
        assert!(result.accepted);
        assert_eq!(result.version, 1);
        assert_eq!(result.capabilities, 0x0003);
        assert_eq!(result.error, None);

        assert_eq!(
            create_ok(result.version, result.capabilities),
            [0x4F, 0x4B, 0x00, 0x01, 0x00, 0x03]
        );
    }

    #[test]
    fn negotiation_is_intersection() {
        for requested in 0..8u16 {
            for server in 0..8u16 {
                let result = process_hello(&create_hello(1, requested), server);
                assert!(result.accepted);
                assert_eq!(result.capabilities, requested & server);
            }
        }
    }

    #[test]
    fn unknown_client_bits_drop_silently() {
        let result = process_hello(&create_hello(1, 0xFFFF), capabilities::ALL);
        assert!(result.accepted);
        assert_eq!(result.capabilities, capabilities::ALL);
    }

    #[test]
    fn hello_too_short() {
        let hello = create_hello(1, 0);
        let result = process_hello(&hello[..14], capabilities::ALL);
        assert!(!result.accepted);
        assert_eq!(result.error.as_deref(), Some("Handshake too short"));
    }

    #[test]
    fn hello_bad_magic() {
        let mut hello = create_hello(1, 0);
        hello[0] = b'X';
        let result = process_hello(&hello, capabilities::ALL);
        assert!(!result.accepted);
        assert_eq!(result.error.as_deref(), Some("Invalid magic string"));
    }

    #[test]
    fn hello_bad_version() {
        let result = process_hello(&create_hello(99, 0x07), capabilities::ALL);
        assert!(!result.accepted);
        assert_eq!(result.version, 99);
        assert_eq!(result.error.as_deref(), Some("Unsupported protocol version"));
    }

    #[test]
    fn response_ok() {
        let result = process_response(&create_ok(1, 0x05));
        assert!(result.accepted);
        assert_eq!(result.version, 1);
        assert_eq!(result.capabilities, 0x05);
    }

    #[test]
    fn response_error_with_nul() {
        let reply = create_error("Unsupported protocol version");
        assert_eq!(&reply[..5], b"ERROR");
        assert_eq!(*reply.last().unwrap(), 0);

        let result = process_response(&reply);
        assert!(!result.accepted);
        assert_eq!(result.error.as_deref(), Some("Unsupported protocol version"));
    }

    #[test]
    fn response_error_without_message() {
        let result = process_response(b"ERROR");
        assert!(!result.accepted);
        assert_eq!(result.error.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn response_garbage() {
        let result = process_response(b"HTTP/1.1 200 OK");
        assert!(!result.accepted);
        assert_eq!(result.error.as_deref(), Some("Invalid response format"));
    }
}
