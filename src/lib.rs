#![warn(missing_docs)]

//! `perun-relay` is a headless relay and gateway for an emulator-streaming platform. An emulator
//! process (the producer) connects over a byte-stream transport and pushes video frames, audio
//! chunks, and configuration; any number of viewer processes (the consumers) connect over possibly
//! different transports, receive that traffic, and send input events back. The relay multiplexes
//! Unix stream sockets, TCP, and WebSocket-over-TCP behind a single binary wire protocol, and
//! keeps end-to-end latency bounded by dropping video frames at peers whose outbound queues are
//! deep.
//!
//! # Running a Relay
//!
//! A relay is created empty, given a callback sink and one or more listeners, and then driven by
//! alternating calls to [`Relay::poll()`] and [`Relay::update()`]. As a non-blocking interface,
//! nothing happens between ticks: `poll()` sleeps until a socket is readable (or the timeout
//! elapses), and `update()` accepts pending connections, drains every session, and fires
//! callbacks.
//!
//! ```no_run
//! use perun_relay::transport::tcp::TcpListener;
//! use perun_relay::transport::websocket::WebSocketListener;
//! use perun_relay::{ClientId, Relay, RelayCallbacks, VideoFramePacket};
//!
//! struct Fanout;
//!
//! impl RelayCallbacks for Fanout {
//!     fn on_video_frame(&mut self, relay: &mut Relay, id: ClientId, flags: u8,
//!                       frame: &VideoFramePacket) {
//!         // Forward the producer's frame to every other peer.
//!         relay.broadcast_video_frame(flags, frame, Some(id));
//!     }
//! }
//!
//! let mut relay = Relay::new();
//! relay.set_callbacks(Box::new(Fanout));
//!
//! relay.add_listener(Box::new(TcpListener::listen(":9100")
//!     .expect("Failed to bind/configure socket")));
//! relay.add_listener(Box::new(WebSocketListener::listen(":9101")
//!     .expect("Failed to bind/configure socket")));
//!
//! relay.start();
//!
//! loop {
//!     relay.poll(10);
//!     relay.update();
//! }
//! ```
//!
//! Callbacks are invoked synchronously by `update()`, on the same thread, in the order packets
//! complete on their connection. Each callback receives `&mut Relay` so that a sink can fan
//! traffic back out without holding any state of its own.
//!
//! # Connecting as a Producer or Viewer
//!
//! The [`Client`] endpoint wraps any outbound [`transport::Connection`], performs the handshake,
//! and turns inbound bytes into [`ClientEvent`]s:
//!
//! ```no_run
//! use perun_relay::protocol::capabilities;
//! use perun_relay::transport::tcp;
//! use perun_relay::{Client, ClientEvent};
//!
//! let conn = tcp::connect("127.0.0.1:9100").expect("Failed to connect");
//! let mut client = Client::new(Box::new(conn), capabilities::ALL);
//!
//! loop {
//!     for event in client.step() {
//!         match event {
//!             ClientEvent::Connected { capabilities } => {
//!                 println!("connected, negotiated {capabilities:#06x}");
//!             }
//!             ClientEvent::VideoFrame { frame, .. } => {
//!                 println!("{}x{} frame", frame.width, frame.height);
//!             }
//!             _ => (),
//!         }
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(5));
//! }
//! ```
//!
//! # Reliability Hints
//!
//! Every send carries a [`transport::SendMode`]. `Reliable` sends either deliver the whole buffer
//! or close the connection after a bounded writability wait; `TimeSensitive` sends drop the whole
//! buffer when the peer's outbound queue already holds more than [`SEND_QUEUE_LIMIT`] bytes.
//! The relay uses `TimeSensitive` for video frames and `Reliable` for everything else, which caps
//! per-peer latency at roughly eight queued frames while audio, input, and configuration never go
//! missing silently.

pub mod client;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod transport;

pub use client::{Client, Event as ClientEvent};
pub use error::{ProtocolError, TransportError};
pub use protocol::{AudioChunkPacket, InputEventPacket, PacketHeader, PacketType, VideoFramePacket};
pub use relay::{ClientId, Relay, RelayCallbacks};

/// The wire protocol version spoken by this crate.
pub const PROTOCOL_VERSION: u16 = 1;

/// Ceiling applied to the length field of inbound packets. A header announcing a larger payload
/// closes the connection.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Size of the read chunk used when draining a connection into its accumulator.
pub const RECV_CHUNK_SIZE: usize = 64 * 1024;

/// Outbound-queue watermark for time-sensitive sends: when the kernel already holds more than
/// this many unsent bytes for a peer, new video frames are dropped at that peer.
pub const SEND_QUEUE_LIMIT: usize = 64 * 1024;

/// Longest writability wait a reliable send will tolerate before closing the connection.
pub const RELIABLE_SEND_WAIT_MS: i32 = 10;
