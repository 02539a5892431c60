//! End-to-end streaming over the Unix socket transport, including delta reconstruction.

mod common;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use common::{Gateway, Recorded};
use perun_relay::protocol::{capabilities, delta, FLAG_DELTA};
use perun_relay::transport::unix::{self, UnixListener};
use perun_relay::{Client, ClientEvent, Relay, VideoFramePacket};

fn socket_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("perun-relay-{name}-{}.sock", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

fn drive_until(
    relay: &mut Relay,
    clients: &mut [&mut Client],
    events: &mut Vec<Vec<ClientEvent>>,
    mut done: impl FnMut(&[Vec<ClientEvent>]) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        relay.poll(5);
        relay.update();
        for (index, client) in clients.iter_mut().enumerate() {
            events[index].extend(client.step());
        }
        if done(events) {
            return;
        }
    }
    panic!("timed out; events so far: {events:?}");
}

#[test]
fn listen_replaces_a_stale_socket_file() {
    let path = socket_path("stale");
    std::fs::write(&path, b"stale").unwrap();

    let listener = UnixListener::listen(&path).expect("Failed to bind/configure socket");
    drop(listener);
}

#[test]
fn delta_frames_reconstruct_across_the_relay() {
    let path = socket_path("delta");
    let gateway = Gateway::default();
    let recorder = gateway.0.clone();
    let mut relay = Relay::new();
    relay.set_callbacks(Box::new(gateway));
    relay.add_listener(Box::new(
        UnixListener::listen(&path).expect("Failed to bind/configure socket"),
    ));
    assert!(relay.start());

    let mut producer = Client::new(
        Box::new(unix::connect(&path).expect("Failed to connect")),
        capabilities::ALL,
    );
    let mut viewer = Client::new(
        Box::new(unix::connect(&path).expect("Failed to connect")),
        capabilities::ALL,
    );

    let mut events = vec![Vec::new(), Vec::new()];
    drive_until(
        &mut relay,
        &mut [&mut producer, &mut viewer],
        &mut events,
        |events| {
            events
                .iter()
                .all(|e| e.iter().any(|e| matches!(e, ClientEvent::Connected { .. })))
        },
    );
    events.iter_mut().for_each(Vec::clear);
    recorder.take();

    // A key frame, then the next frame expressed as an XOR delta against it.
    let key_frame: Vec<u8> = vec![0x00, 0xFF, 0x00, 0xFF];
    let next_frame: Vec<u8> = vec![0x00, 0xFF, 0xFF, 0x00];
    let delta_bytes = delta::compute(&next_frame, &key_frame).unwrap();
    assert_eq!(delta_bytes, vec![0x00, 0x00, 0xFF, 0xFF]);

    assert!(producer.send_config(b"format=mono"));
    assert!(producer.send_video_frame(
        0,
        &VideoFramePacket {
            width: 2,
            height: 2,
            data: key_frame.clone(),
        }
    ));
    assert!(producer.send_video_frame(
        FLAG_DELTA,
        &VideoFramePacket {
            width: 2,
            height: 2,
            data: delta_bytes,
        }
    ));

    drive_until(
        &mut relay,
        &mut [&mut producer, &mut viewer],
        &mut events,
        |events| events[1].len() >= 2,
    );

    // The viewer reassembles the second frame from the delta.
    let mut reconstructed: Option<Vec<u8>> = None;
    for event in &events[1] {
        if let ClientEvent::VideoFrame { flags, frame } = event {
            if flags & FLAG_DELTA == 0 {
                reconstructed = Some(frame.data.clone());
            } else {
                let current = reconstructed.as_mut().expect("delta before key frame");
                delta::apply(current, &frame.data).unwrap();
            }
        }
    }
    assert_eq!(reconstructed, Some(next_frame));

    // The relay-side sink saw the config bytes exactly once.
    let recorded = recorder.take();
    assert_eq!(
        recorded
            .iter()
            .filter(|e| matches!(e, Recorded::Config(_, data) if data.as_slice() == b"format=mono"))
            .count(),
        1
    );
}
