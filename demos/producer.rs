//! A synthetic producer: streams a moving test pattern at ~60 fps, sending every other frame
//! as an XOR delta, and logs any input events viewers send back.
//!
//! Run with: `cargo run --example producer [address]`

use std::time::{Duration, Instant};

use perun_relay::protocol::{capabilities, delta, FLAG_DELTA};
use perun_relay::transport::tcp;
use perun_relay::{Client, ClientEvent, VideoFramePacket};

const WIDTH: u16 = 64;
const HEIGHT: u16 = 48;
const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

fn render(tick: u8) -> Vec<u8> {
    let mut frame = vec![0u8; WIDTH as usize * HEIGHT as usize];
    for (index, pixel) in frame.iter_mut().enumerate() {
        *pixel = (index as u8).wrapping_add(tick);
    }
    frame
}

fn main() {
    tracing_subscriber::fmt().init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9100".to_string());
    let conn = tcp::connect(&address).expect("Failed to connect");
    let mut client = Client::new(Box::new(conn), capabilities::ALL);

    let mut previous: Option<Vec<u8>> = None;
    let mut tick = 0u8;

    'outer: loop {
        let frame_start = Instant::now();

        for event in client.step() {
            match event {
                ClientEvent::Connected { capabilities } => {
                    tracing::info!(capabilities = format_args!("{capabilities:#06x}"), "connected");
                    client.send_config(b"pattern=gradient");
                }
                ClientEvent::Rejected { reason } => {
                    tracing::error!(reason = %reason, "relay rejected us");
                    break 'outer;
                }
                ClientEvent::Disconnected => {
                    tracing::info!("relay went away");
                    break 'outer;
                }
                ClientEvent::InputEvent { event } => {
                    tracing::info!(buttons = format_args!("{:#06x}", event.buttons), "input");
                }
                _ => (),
            }
        }

        if client.is_connected() {
            let current = render(tick);
            tick = tick.wrapping_add(1);

            // Delta-encode every other frame; the viewers negotiated DELTA or they get keys.
            let packet = match &previous {
                Some(last) if tick % 2 == 0 => VideoFramePacket {
                    width: WIDTH,
                    height: HEIGHT,
                    data: delta::compute(&current, last).unwrap(),
                },
                _ => VideoFramePacket {
                    width: WIDTH,
                    height: HEIGHT,
                    data: current.clone(),
                },
            };
            let flags = if tick % 2 == 0 { FLAG_DELTA } else { 0 };
            client.send_video_frame(flags, &packet);
            previous = Some(current);
        }

        let elapsed = frame_start.elapsed();
        if elapsed < FRAME_INTERVAL {
            std::thread::sleep(FRAME_INTERVAL - elapsed);
        }
    }
}
