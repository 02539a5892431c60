//! The relay engine: owns listeners and sessions, drives handshakes and packet parsing, and
//! fans packets out to peers with per-peer admission control.

mod session;

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::protocol::{capabilities, AudioChunkPacket, InputEventPacket, PacketType, VideoFramePacket};
use crate::transport::{poll, Listener, SendMode};

use session::{Session, SessionEvent};

/// Identifier assigned to each accepted connection, starting at 1 and never reused.
pub type ClientId = u32;

/// The callback sink a host registers with [`Relay::set_callbacks`].
///
/// Callbacks run synchronously inside [`Relay::update`] on the relay thread and must not block;
/// a stalled callback delays every peer. Each receives `&mut Relay` so it can call the fanout
/// methods directly. Every method defaults to a no-op.
pub trait RelayCallbacks: Send {
    /// A session completed its handshake.
    fn on_client_connected(&mut self, _relay: &mut Relay, _id: ClientId, _capabilities: u16) {}

    /// A session that had completed its handshake went away. Never fires for connections that
    /// failed or never finished the handshake.
    fn on_client_disconnected(&mut self, _relay: &mut Relay, _id: ClientId) {}

    /// A video frame arrived. `flags` carries [`FLAG_DELTA`](crate::protocol::FLAG_DELTA) when
    /// the payload is an XOR difference.
    fn on_video_frame(
        &mut self,
        _relay: &mut Relay,
        _id: ClientId,
        _flags: u8,
        _frame: &VideoFramePacket,
    ) {
    }

    /// An audio chunk arrived.
    fn on_audio_chunk(&mut self, _relay: &mut Relay, _id: ClientId, _chunk: &AudioChunkPacket) {}

    /// An input event arrived.
    fn on_input_event(&mut self, _relay: &mut Relay, _id: ClientId, _event: &InputEventPacket) {}

    /// Opaque configuration bytes arrived.
    fn on_config(&mut self, _relay: &mut Relay, _id: ClientId, _data: &[u8]) {}
}

/// A polling-based relay multiplexing any number of listeners and sessions on one thread.
///
/// See the [crate docs](crate) for the driving loop.
pub struct Relay {
    listeners: Vec<Box<dyn Listener>>,
    sessions: Vec<Session>,
    callbacks: Option<Box<dyn RelayCallbacks>>,
    next_session_id: ClientId,
    server_capabilities: u16,
    running: bool,
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay {
    /// Create a stopped relay with no listeners, no callback sink, and every capability
    /// advertised.
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            sessions: Vec::new(),
            callbacks: None,
            next_session_id: 1,
            server_capabilities: capabilities::ALL,
            running: false,
        }
    }

    /// Register the callback sink. Without one, parsed packets are dropped.
    pub fn set_callbacks(&mut self, callbacks: Box<dyn RelayCallbacks>) {
        self.callbacks = Some(callbacks);
    }

    /// Override the capability mask offered during handshakes.
    ///
    /// # Panics
    ///
    /// Panics if the relay is running.
    pub fn set_capabilities(&mut self, capabilities: u16) {
        assert!(
            !self.running,
            "capabilities cannot change while the relay is running"
        );
        self.server_capabilities = capabilities;
    }

    /// The capability mask offered during handshakes.
    pub fn capabilities(&self) -> u16 {
        self.server_capabilities
    }

    /// Add an already-listening transport.
    ///
    /// # Panics
    ///
    /// Panics if the relay is running.
    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        assert!(
            !self.running,
            "listeners cannot be added while the relay is running"
        );
        self.listeners.push(listener);
    }

    /// Begin accepting connections. Idempotent; returns `false` when no listeners are
    /// configured.
    pub fn start(&mut self) -> bool {
        if self.running {
            return true;
        }
        if self.listeners.is_empty() {
            warn!("relay started with no listeners");
            return false;
        }
        self.running = true;
        info!(listeners = self.listeners.len(), "relay started");
        true
    }

    /// Close every session, then every listener. Idempotent. Disconnect callbacks fire for
    /// sessions whose handshake had completed.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!("relay stopping");

        let mut sessions = std::mem::take(&mut self.sessions);
        for session in &mut sessions {
            let announced = session.handshake_complete() && session.is_open();
            session.close();
            if announced {
                self.emit_disconnected(session.id());
            }
        }

        for listener in &mut self.listeners {
            listener.close();
        }
        self.running = false;
    }

    /// Whether [`start`](Self::start) has succeeded and [`stop`](Self::stop) has not run.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of sessions, counting those still mid-handshake.
    pub fn client_count(&self) -> usize {
        self.sessions.len()
    }

    /// One tick: accept every pending connection, drain and parse every session, fire
    /// callbacks, and drop sessions whose connection closed.
    pub fn update(&mut self) {
        if !self.running {
            return;
        }

        self.accept_connections();

        let server_caps = self.server_capabilities;
        let mut index = 0;
        while index < self.sessions.len() {
            let events = self.sessions[index].drain(server_caps);
            let id = self.sessions[index].id();
            self.dispatch(id, events);
            index += 1;
        }

        self.compact_sessions();
    }

    /// Sleep until any listener or session is readable, or `timeout_ms` elapses. Returns the
    /// number of ready descriptors. Hosts alternate `poll` with [`update`](Self::update).
    pub fn poll(&mut self, timeout_ms: i32) -> usize {
        if !self.running {
            return 0;
        }

        let mut fds = Vec::with_capacity(self.listeners.len() + self.sessions.len());
        for listener in &self.listeners {
            if let Some(fd) = listener.readiness_fd() {
                fds.push(fd);
            }
        }
        for session in &self.sessions {
            if let Some(fd) = session.readiness_fd() {
                fds.push(fd);
            }
        }

        if fds.is_empty() {
            if timeout_ms > 0 {
                thread::sleep(Duration::from_millis(timeout_ms as u64));
            }
            return 0;
        }
        poll::wait_readable(&fds, timeout_ms)
    }

    /// Send one video frame to one session, dropping it if that peer's queue is deep. Returns
    /// whether every byte was handed to the transport.
    pub fn send_video_frame(&mut self, id: ClientId, flags: u8, frame: &VideoFramePacket) -> bool {
        let payload = frame.encode();
        match self.sessions.iter_mut().find(|s| s.id() == id) {
            Some(session) => {
                session.send_packet(PacketType::VideoFrame, flags, &payload, SendMode::TimeSensitive)
            }
            None => false,
        }
    }

    /// Send a video frame to every handshake-complete session except `exclude`. Slow peers
    /// drop the frame individually; fast peers are unaffected.
    pub fn broadcast_video_frame(
        &mut self,
        flags: u8,
        frame: &VideoFramePacket,
        exclude: Option<ClientId>,
    ) {
        let payload = frame.encode();
        for session in &mut self.sessions {
            if Some(session.id()) == exclude || !session.handshake_complete() {
                continue;
            }
            session.send_packet(PacketType::VideoFrame, flags, &payload, SendMode::TimeSensitive);
        }
    }

    /// Send an audio chunk reliably to every handshake-complete session that negotiated the
    /// AUDIO capability, except `exclude`.
    pub fn broadcast_audio_chunk(&mut self, chunk: &AudioChunkPacket, exclude: Option<ClientId>) {
        let payload = chunk.encode();
        for session in &mut self.sessions {
            if Some(session.id()) == exclude || !session.handshake_complete() {
                continue;
            }
            if session.capabilities() & capabilities::AUDIO == 0 {
                continue;
            }
            session.send_packet(PacketType::AudioChunk, 0, &payload, SendMode::Reliable);
        }
    }

    /// Send an input event reliably to every handshake-complete session except `exclude`.
    pub fn broadcast_input_event(&mut self, event: &InputEventPacket, exclude: Option<ClientId>) {
        let payload = event.encode();
        for session in &mut self.sessions {
            if Some(session.id()) == exclude || !session.handshake_complete() {
                continue;
            }
            session.send_packet(PacketType::InputEvent, 0, &payload, SendMode::Reliable);
        }
    }

    fn accept_connections(&mut self) {
        for listener in &mut self.listeners {
            while let Some(conn) = listener.accept() {
                let id = self.next_session_id;
                self.next_session_id += 1;
                debug!(id, "new connection");
                self.sessions.push(Session::new(id, conn));
            }
        }
    }

    /// Hand events to the sink. The sink is moved out of the relay for the duration so it can
    /// re-enter the relay for fanout.
    fn dispatch(&mut self, id: ClientId, events: Vec<SessionEvent>) {
        if events.is_empty() {
            return;
        }
        let Some(mut callbacks) = self.callbacks.take() else {
            return;
        };

        for event in events {
            match event {
                SessionEvent::Connected { capabilities } => {
                    callbacks.on_client_connected(self, id, capabilities);
                }
                SessionEvent::VideoFrame { flags, frame } => {
                    callbacks.on_video_frame(self, id, flags, &frame);
                }
                SessionEvent::AudioChunk { chunk } => {
                    callbacks.on_audio_chunk(self, id, &chunk);
                }
                SessionEvent::InputEvent { event } => {
                    callbacks.on_input_event(self, id, &event);
                }
                SessionEvent::Config { data } => {
                    callbacks.on_config(self, id, &data);
                }
            }
        }

        if self.callbacks.is_none() {
            self.callbacks = Some(callbacks);
        }
    }

    fn emit_disconnected(&mut self, id: ClientId) {
        debug!(id, "client disconnected");
        let Some(mut callbacks) = self.callbacks.take() else {
            return;
        };
        callbacks.on_client_disconnected(self, id);
        if self.callbacks.is_none() {
            self.callbacks = Some(callbacks);
        }
    }

    fn compact_sessions(&mut self) {
        let mut index = 0;
        while index < self.sessions.len() {
            if self.sessions[index].is_open() {
                index += 1;
                continue;
            }
            let session = self.sessions.remove(index);
            debug!(id = session.id(), "session removed");
            if session.handshake_complete() {
                self.emit_disconnected(session.id());
            }
        }
    }
}
