//! Readiness helpers shared by the transports and the relay's `poll()`.

use std::os::unix::io::RawFd;

/// Wait until any of `fds` is readable or the timeout elapses. Returns the number of ready
/// descriptors (0 on timeout or error).
pub(crate) fn wait_readable(fds: &[RawFd], timeout_ms: i32) -> usize {
    if fds.is_empty() {
        return 0;
    }

    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let ready = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout_ms) };
    if ready > 0 {
        ready as usize
    } else {
        0
    }
}

/// Wait until `fd` is writable or the timeout elapses.
pub(crate) fn wait_writable(fd: RawFd, timeout_ms: i32) -> bool {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLOUT,
        revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    ready > 0 && pollfd.revents & libc::POLLOUT != 0
}

/// Kernel-reported bytes sitting unsent in the socket's outbound queue, or `None` where that
/// cannot be measured. Callers treat `None` as "send and let would-block decide".
#[cfg(target_os = "linux")]
pub(crate) fn outbound_queue_depth(fd: RawFd) -> Option<usize> {
    let mut pending: libc::c_int = 0;
    let rc = unsafe { libc::ioctl(fd, libc::TIOCOUTQ, &mut pending) };
    if rc == 0 {
        Some(pending.max(0) as usize)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn outbound_queue_depth(_fd: RawFd) -> Option<usize> {
    None
}
