//! Server-side WebSocket transport (RFC 6455) so browser viewers can join over a plain TCP port.
//!
//! Each accepted connection starts in an HTTP-upgrade phase; once the 101 response is written it
//! switches to frame mode. Inbound data frames are unmasked and their payloads appended to an
//! application buffer, which is what [`Connection::recv`] drains; from the session's point of
//! view a WebSocket connection byte-streams exactly like the other transports. Outgoing sends
//! wrap the whole buffer in a single unmasked binary frame, so one packet never straddles a
//! frame boundary.

use std::io;
use std::net;
use std::os::unix::io::{AsRawFd, RawFd};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Buf, BytesMut};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::stream::{self, StreamRecv, StreamSend};
use crate::transport::{poll, tcp, Connection, Listener, RecvStatus, SendMode, SendStatus};
use crate::{MAX_PACKET_SIZE, SEND_QUEUE_LIMIT};

/// Handshake GUID fixed by RFC 6455 §1.3.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The one request header the upgrade needs. Matched case-sensitively, single space after the
/// colon.
const KEY_HEADER: &str = "Sec-WebSocket-Key: ";

/// Inbound frames announcing a larger payload than this close the connection; no legitimate
/// client frame exceeds one maximum-size relay packet record (with headroom for its header).
const MAX_FRAME_PAYLOAD: usize = MAX_PACKET_SIZE + 64;

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

/// A listening WebSocket endpoint. Accepts like TCP; the upgrade happens lazily on each
/// connection as request bytes arrive.
pub struct WebSocketListener {
    socket: Option<net::TcpListener>,
}

impl WebSocketListener {
    /// Open a non-blocking listener on `"host:port"` or `":port"`.
    pub fn listen(address: &str) -> Result<Self, TransportError> {
        let socket = tcp::bind_listener(address)?;
        info!(address, "websocket transport listening");
        Ok(Self {
            socket: Some(socket),
        })
    }
}

impl Listener for WebSocketListener {
    fn accept(&mut self) -> Option<Box<dyn Connection>> {
        let socket = self.socket.as_ref()?;
        match socket.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = tcp::configure(&stream) {
                    warn!(error = %e, "failed to configure accepted websocket socket");
                    return None;
                }
                debug!(%peer, "accepted websocket connection");
                Some(Box::new(WebSocketConnection::new(stream)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => None,
            Err(e) => {
                warn!(error = %e, "websocket accept failed");
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

/// One WebSocket connection: raw TCP bytes in `sock_buf`, unmasked application payload in
/// `app_buf`.
pub struct WebSocketConnection {
    stream: net::TcpStream,
    open: bool,
    upgraded: bool,
    sock_buf: BytesMut,
    app_buf: BytesMut,
}

impl WebSocketConnection {
    pub(crate) fn new(stream: net::TcpStream) -> Self {
        Self {
            stream,
            open: true,
            upgraded: false,
            sock_buf: BytesMut::new(),
            app_buf: BytesMut::new(),
        }
    }

    /// Try to complete the HTTP upgrade. Returns `false` while the request is still partial;
    /// a malformed request closes the connection without a reply.
    fn try_upgrade(&mut self) -> bool {
        let Some(end) = find_subsequence(&self.sock_buf, b"\r\n\r\n") else {
            return false;
        };

        let accept = match extract_key(&self.sock_buf[..end]) {
            Some(key) => accept_key(key),
            None => {
                debug!("websocket upgrade request without key header");
                self.close();
                return false;
            }
        };

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        if stream::send_all(&mut self.stream, response.as_bytes(), SendMode::Reliable)
            != StreamSend::Sent
        {
            self.close();
            return false;
        }

        // Frame bytes pipelined behind the request stay in the accumulator.
        self.sock_buf.advance(end + 4);
        self.upgraded = true;
        debug!("websocket upgrade complete");
        true
    }

    /// Consume every complete frame in `sock_buf`. Returns `false` when the connection was
    /// closed by a terminal or oversized frame.
    fn drain_frames(&mut self) -> bool {
        loop {
            match parse_frame(&self.sock_buf) {
                FrameStep::NeedMore => return true,
                FrameStep::TooLarge => {
                    warn!("oversized websocket frame");
                    self.close();
                    return false;
                }
                FrameStep::Frame {
                    opcode,
                    payload,
                    consumed,
                } => {
                    self.sock_buf.advance(consumed);
                    match opcode {
                        OP_CONTINUATION | OP_TEXT | OP_BINARY => {
                            self.app_buf.extend_from_slice(&payload);
                        }
                        OP_PING => {
                            let mut pong = encode_frame_header(OP_PONG, payload.len());
                            pong.extend_from_slice(&payload);
                            if stream::send_all(&mut self.stream, &pong, SendMode::Reliable)
                                != StreamSend::Sent
                            {
                                self.close();
                                return false;
                            }
                        }
                        OP_PONG => {}
                        OP_CLOSE => {
                            let reply = encode_frame_header(OP_CLOSE, 0);
                            let _ = stream::send_all(&mut self.stream, &reply, SendMode::Reliable);
                            self.close();
                            return false;
                        }
                        other => {
                            debug!(opcode = other, "reserved websocket opcode");
                            self.close();
                            return false;
                        }
                    }
                }
            }
        }
    }
}

impl Connection for WebSocketConnection {
    fn send(&mut self, data: &[u8], mode: SendMode) -> SendStatus {
        if !self.open {
            return SendStatus::Closed;
        }
        if !self.upgraded {
            debug!("dropping send before websocket upgrade");
            return SendStatus::Dropped;
        }

        // Check the queue before paying for the frame copy.
        if mode == SendMode::TimeSensitive {
            if let Some(depth) = poll::outbound_queue_depth(self.stream.as_raw_fd()) {
                if depth > SEND_QUEUE_LIMIT {
                    return SendStatus::Dropped;
                }
            }
        }

        let mut frame = encode_frame_header(OP_BINARY, data.len());
        frame.extend_from_slice(data);

        match stream::send_all(&mut self.stream, &frame, mode) {
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

        if self.app_buf.is_empty() {
            let mut chunk = [0u8; 4096];
            loop {
                match stream::recv_some(&mut self.stream, &mut chunk) {
                    StreamRecv::Received(n) => self.sock_buf.extend_from_slice(&chunk[..n]),
                    StreamRecv::WouldBlock => break,
                    StreamRecv::Eof | StreamRecv::Failed => {
                        self.close();
                        return RecvStatus::Closed;
                    }
                }
            }

            if !self.upgraded && !self.try_upgrade() {
                return if self.open {
                    RecvStatus::WouldBlock
                } else {
                    RecvStatus::Closed
                };
            }
            if !self.drain_frames() {
                return RecvStatus::Closed;
            }
        }

        if self.app_buf.is_empty() {
            return RecvStatus::WouldBlock;
        }
        let n = buf.len().min(self.app_buf.len());
        buf[..n].copy_from_slice(&self.app_buf[..n]);
        self.app_buf.advance(n);
        RecvStatus::Received(n)
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

/// Compute the `Sec-WebSocket-Accept` value for a client key.
fn accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(WS_GUID.as_bytes());
    BASE64.encode(sha.finalize())
}

/// Pull the `Sec-WebSocket-Key` value out of the raw request head.
fn extract_key(request: &[u8]) -> Option<&str> {
    let text = std::str::from_utf8(request).ok()?;
    let start = text.find(KEY_HEADER)? + KEY_HEADER.len();
    let rest = &text[start..];
    let end = rest.find("\r\n").unwrap_or(rest.len());
    Some(&rest[..end])
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

enum FrameStep {
    /// The buffer does not yet hold a complete frame.
    NeedMore,
    /// A complete frame; `consumed` bytes of the buffer are accounted for.
    Frame {
        opcode: u8,
        payload: Vec<u8>,
        consumed: usize,
    },
    /// The announced payload length exceeds [`MAX_FRAME_PAYLOAD`].
    TooLarge,
}

/// Incremental frame parser. Pure: inspects the front of `buf` and never consumes; the caller
/// advances by `consumed` after acting on the frame, so partial frames survive fragmented reads
/// untouched.
fn parse_frame(buf: &[u8]) -> FrameStep {
    if buf.len() < 2 {
        return FrameStep::NeedMore;
    }

    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & 0x80 != 0;
    let mut payload_len = (buf[1] & 0x7F) as u64;
    let mut header_len = 2usize;

    if payload_len == 126 {
        if buf.len() < 4 {
            return FrameStep::NeedMore;
        }
        payload_len = u16::from_be_bytes([buf[2], buf[3]]) as u64;
        header_len = 4;
    } else if payload_len == 127 {
        if buf.len() < 10 {
            return FrameStep::NeedMore;
        }
        payload_len = u64::from_be_bytes([
            buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8], buf[9],
        ]);
        header_len = 10;
    }

    if payload_len > MAX_FRAME_PAYLOAD as u64 {
        return FrameStep::TooLarge;
    }
    let payload_len = payload_len as usize;

    let mut mask = [0u8; 4];
    if masked {
        if buf.len() < header_len + 4 {
            return FrameStep::NeedMore;
        }
        mask.copy_from_slice(&buf[header_len..header_len + 4]);
        header_len += 4;
    }

    if buf.len() < header_len + payload_len {
        return FrameStep::NeedMore;
    }

    let mut payload = buf[header_len..header_len + payload_len].to_vec();
    if masked {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }
    }

    FrameStep::Frame {
        opcode,
        payload,
        consumed: header_len + payload_len,
    }
}

/// Build a server frame header: FIN set, no mask.
fn encode_frame_header(opcode: u8, payload_len: usize) -> Vec<u8> {
    let mut header = Vec::with_capacity(10 + payload_len);
    header.push(0x80 | opcode);
    if payload_len < 126 {
        header.push(payload_len as u8);
    } else if payload_len < 65536 {
        header.push(126);
        header.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        header.push(127);
        header.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
    header
}
