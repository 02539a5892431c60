#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use perun_relay::{
    AudioChunkPacket, ClientId, InputEventPacket, Relay, RelayCallbacks, VideoFramePacket,
};

/// Everything a sink saw, in callback order.
#[derive(Clone, Debug, PartialEq)]
pub enum Recorded {
    Connected(ClientId, u16),
    Disconnected(ClientId),
    Video(ClientId, u8, VideoFramePacket),
    Audio(ClientId, AudioChunkPacket),
    Input(ClientId, u16),
    Config(ClientId, Vec<u8>),
}

/// A callback sink that records every event behind a shared handle.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Recorded>>>);

impl Recorder {
    pub fn push(&self, event: Recorded) {
        self.0.lock().unwrap().push(event);
    }

    pub fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut self.0.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<Recorded> {
        self.0.lock().unwrap().clone()
    }
}

impl RelayCallbacks for Recorder {
    fn on_client_connected(&mut self, _relay: &mut Relay, id: ClientId, capabilities: u16) {
        self.push(Recorded::Connected(id, capabilities));
    }

    fn on_client_disconnected(&mut self, _relay: &mut Relay, id: ClientId) {
        self.push(Recorded::Disconnected(id));
    }

    fn on_video_frame(&mut self, _relay: &mut Relay, id: ClientId, flags: u8, frame: &VideoFramePacket) {
        self.push(Recorded::Video(id, flags, frame.clone()));
    }

    fn on_audio_chunk(&mut self, _relay: &mut Relay, id: ClientId, chunk: &AudioChunkPacket) {
        self.push(Recorded::Audio(id, chunk.clone()));
    }

    fn on_input_event(&mut self, _relay: &mut Relay, id: ClientId, event: &InputEventPacket) {
        self.push(Recorded::Input(id, event.buttons));
    }

    fn on_config(&mut self, _relay: &mut Relay, id: ClientId, data: &[u8]) {
        self.push(Recorded::Config(id, data.to_vec()));
    }
}

/// A gateway-shaped sink: records like [`Recorder`] and fans every packet back out to the
/// sender's peers.
#[derive(Clone, Default)]
pub struct Gateway(pub Recorder);

impl RelayCallbacks for Gateway {
    fn on_client_connected(&mut self, _relay: &mut Relay, id: ClientId, capabilities: u16) {
        self.0.push(Recorded::Connected(id, capabilities));
    }

    fn on_client_disconnected(&mut self, _relay: &mut Relay, id: ClientId) {
        self.0.push(Recorded::Disconnected(id));
    }

    fn on_video_frame(&mut self, relay: &mut Relay, id: ClientId, flags: u8, frame: &VideoFramePacket) {
        self.0.push(Recorded::Video(id, flags, frame.clone()));
        relay.broadcast_video_frame(flags, frame, Some(id));
    }

    fn on_audio_chunk(&mut self, relay: &mut Relay, id: ClientId, chunk: &AudioChunkPacket) {
        self.0.push(Recorded::Audio(id, chunk.clone()));
        relay.broadcast_audio_chunk(chunk, Some(id));
    }

    fn on_input_event(&mut self, relay: &mut Relay, id: ClientId, event: &InputEventPacket) {
        self.0.push(Recorded::Input(id, event.buttons));
        relay.broadcast_input_event(event, Some(id));
    }

    fn on_config(&mut self, _relay: &mut Relay, id: ClientId, data: &[u8]) {
        self.0.push(Recorded::Config(id, data.to_vec()));
    }
}

/// Drive the relay for `ticks` short poll/update rounds.
pub fn pump(relay: &mut Relay, ticks: usize) {
    for _ in 0..ticks {
        relay.poll(5);
        relay.update();
    }
}

/// The canonical hello bytes: magic, version 1, requested capabilities.
pub fn hello_bytes(requested: u16) -> Vec<u8> {
    let mut bytes = b"PERUN_HELLO".to_vec();
    bytes.extend_from_slice(&1u16.to_be_bytes());
    bytes.extend_from_slice(&requested.to_be_bytes());
    bytes
}

/// A full packet record: header then payload.
pub fn record(ty: perun_relay::PacketType, flags: u8, payload: &[u8]) -> Vec<u8> {
    let header = perun_relay::PacketHeader {
        ty,
        flags,
        sequence: 0,
        length: payload.len() as u32,
    };
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}
