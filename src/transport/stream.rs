//! Non-blocking send/recv loops shared by every stream transport.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;

use crate::transport::{poll, SendMode};
use crate::{RELIABLE_SEND_WAIT_MS, SEND_QUEUE_LIMIT};

/// Outcome of the shared send loop. Closing on `Failed` is left to the caller, which owns the
/// open flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamSend {
    Sent,
    Dropped,
    Failed,
}

/// Outcome of a single non-blocking read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StreamRecv {
    Received(usize),
    WouldBlock,
    Eof,
    Failed,
}

/// Write all of `data`, honoring the reliability hint.
///
/// `TimeSensitive` drops the buffer before the first byte when the outbound queue is past the
/// watermark or the socket is not writable. Once a prefix is on the wire the remainder must
/// follow (a torn packet would desynchronize the stream), so a mid-buffer stall gets a 1 ms
/// grace wait before the send is declared failed.
pub(crate) fn send_all<S: Write + AsRawFd>(stream: &mut S, data: &[u8], mode: SendMode) -> StreamSend {
    if mode == SendMode::TimeSensitive {
        if let Some(depth) = poll::outbound_queue_depth(stream.as_raw_fd()) {
            if depth > SEND_QUEUE_LIMIT {
                return StreamSend::Dropped;
            }
        }
    }

    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return StreamSend::Failed,
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                let wait_ms = match mode {
                    SendMode::Reliable => RELIABLE_SEND_WAIT_MS,
                    SendMode::TimeSensitive if written == 0 => return StreamSend::Dropped,
                    SendMode::TimeSensitive => 1,
                };
                if !poll::wait_writable(stream.as_raw_fd(), wait_ms) {
                    return StreamSend::Failed;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => return StreamSend::Failed,
        }
    }
    StreamSend::Sent
}

/// One non-blocking read into `buf`.
pub(crate) fn recv_some<S: Read>(stream: &mut S, buf: &mut [u8]) -> StreamRecv {
    match stream.read(buf) {
        Ok(0) => StreamRecv::Eof,
        Ok(n) => StreamRecv::Received(n),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => StreamRecv::WouldBlock,
        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => StreamRecv::WouldBlock,
        Err(_) => StreamRecv::Failed,
    }
}
