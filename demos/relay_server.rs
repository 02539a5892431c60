//! A complete relay gateway: one Unix socket for the local emulator, TCP for native viewers,
//! and WebSocket for browsers. Everything a producer pushes is fanned out to its peers.
//!
//! Run with: `cargo run --example relay_server`

use perun_relay::transport::tcp::TcpListener;
use perun_relay::transport::unix::UnixListener;
use perun_relay::transport::websocket::WebSocketListener;
use perun_relay::{
    AudioChunkPacket, ClientId, InputEventPacket, Relay, RelayCallbacks, VideoFramePacket,
};

struct Fanout;

impl RelayCallbacks for Fanout {
    fn on_client_connected(&mut self, _relay: &mut Relay, id: ClientId, capabilities: u16) {
        tracing::info!(id, capabilities = format_args!("{capabilities:#06x}"), "client connected");
    }

    fn on_client_disconnected(&mut self, relay: &mut Relay, id: ClientId) {
        tracing::info!(id, remaining = relay.client_count(), "client disconnected");
    }

    fn on_video_frame(&mut self, relay: &mut Relay, id: ClientId, flags: u8, frame: &VideoFramePacket) {
        relay.broadcast_video_frame(flags, frame, Some(id));
    }

    fn on_audio_chunk(&mut self, relay: &mut Relay, id: ClientId, chunk: &AudioChunkPacket) {
        relay.broadcast_audio_chunk(chunk, Some(id));
    }

    fn on_input_event(&mut self, relay: &mut Relay, id: ClientId, event: &InputEventPacket) {
        relay.broadcast_input_event(event, Some(id));
    }

    fn on_config(&mut self, _relay: &mut Relay, id: ClientId, data: &[u8]) {
        tracing::info!(id, bytes = data.len(), "config received");
    }
}

fn main() {
    tracing_subscriber::fmt().init();

    let mut relay = Relay::new();
    relay.set_callbacks(Box::new(Fanout));

    relay.add_listener(Box::new(
        UnixListener::listen("/tmp/perun-relay.sock").expect("Failed to bind/configure socket"),
    ));
    relay.add_listener(Box::new(
        TcpListener::listen(":9100").expect("Failed to bind/configure socket"),
    ));
    relay.add_listener(Box::new(
        WebSocketListener::listen(":9101").expect("Failed to bind/configure socket"),
    ));

    relay.start();

    loop {
        relay.poll(10);
        relay.update();
    }
}
