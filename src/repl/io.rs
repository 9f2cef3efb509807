use std::io::{self, ErrorKind};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

/// Outcome of waiting for a descriptor to become readable or writable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    TimedOut,
}

pub(crate) fn should_retry_io_error(err: &io::Error) -> bool {
    err.kind() == ErrorKind::Interrupted || err.kind() == ErrorKind::WouldBlock
}

/// Block in `poll(2)` until `fd` is readable (or hung up) or `timeout` elapses.
///
/// `EINTR` is surfaced as an `Interrupted` error so callers can re-check
/// their shutdown state before waiting again.
pub(crate) fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<Readiness> {
    wait_for_events(fd, libc::POLLIN, timeout)
}

/// Like [`wait_readable`], for room in a pipe's write buffer.
fn wait_writable(fd: RawFd, timeout: Duration) -> io::Result<Readiness> {
    wait_for_events(fd, libc::POLLOUT, timeout)
}

fn wait_for_events(fd: RawFd, events: libc::c_short, timeout: Duration) -> io::Result<Readiness> {
    let mut pollfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // Round up so a sub-millisecond remainder still waits instead of spinning.
    let millis = timeout
        .as_micros()
        .div_ceil(1000)
        .min(libc::c_int::MAX as u128) as libc::c_int;
    // SAFETY: pollfd is a valid, initialized struct and nfds matches its count.
    let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if ready < 0 {
        return Err(io::Error::last_os_error());
    }
    if ready == 0 {
        return Ok(Readiness::TimedOut);
    }
    Ok(Readiness::Ready)
}

/// Single `read(2)` into `buf`; `Ok(0)` means the writer side closed.
pub(crate) fn read_chunk(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf is a valid writable slice of buf.len() bytes.
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Write the entire buffer to the REPL's non-blocking stdin, waiting for
/// pipe space until `deadline`.
///
/// A REPL that stops draining its input yields a `TimedOut` error instead of
/// blocking the caller.
pub(super) fn write_all(fd: RawFd, mut data: &[u8], deadline: Instant) -> io::Result<()> {
    while !data.is_empty() {
        // SAFETY: data points to data.len() initialized bytes.
        let written = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                continue;
            }
            if err.kind() != ErrorKind::WouldBlock {
                return Err(err);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(write_timed_out(data.len()));
            }
            match wait_writable(fd, remaining) {
                Ok(Readiness::Ready) => {}
                Ok(Readiness::TimedOut) => return Err(write_timed_out(data.len())),
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
            continue;
        }
        if written == 0 {
            return Err(io::Error::new(ErrorKind::WriteZero, "write to REPL returned 0"));
        }
        data = data.get(written as usize..).unwrap_or(&[]);
    }
    Ok(())
}

fn write_timed_out(unwritten: usize) -> io::Error {
    io::Error::new(
        ErrorKind::TimedOut,
        format!("REPL stopped reading input ({unwritten} bytes unwritten)"),
    )
}

/// Write `command` and terminate it with a newline unless it already ends in one.
pub(super) fn write_line(fd: RawFd, command: &[u8], timeout: Duration) -> io::Result<()> {
    let deadline = Instant::now() + timeout;
    write_all(fd, command, deadline)?;
    if !command.ends_with(b"\n") {
        write_all(fd, b"\n", deadline)?;
    }
    Ok(())
}

/// Put a descriptor in non-blocking mode.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor.
pub(super) unsafe fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = libc::fcntl(fd, libc::F_GETFL, 0);
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Close a file descriptor while ignoring errors.
///
/// # Safety
///
/// `fd` must be a valid, open file descriptor (or negative to ignore).
pub(super) unsafe fn close_fd(fd: RawFd) {
    if fd >= 0 {
        let _ = libc::close(fd);
    }
}
