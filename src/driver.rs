//! The two-descriptor transfer driver.
//!
//! `splice(2)` and `tee(2)` operate on two descriptors at once, which makes
//! driving them from a poller-mediated runtime delicate: the caller must
//! never park for readiness on one descriptor while holding a reference to
//! the other. A waiter that broke this rule would stall any concurrent
//! close of the held descriptor behind an unrelated wait on a different fd.
//!
//! The driver runs in two alternating rounds:
//!
//! - **Round 1** holds the source as the outer scope. The destination is
//!   entered as an inner scope that issues one transfer syscall and exits
//!   immediately. `EAGAIN` before any read-readiness observation parks the
//!   caller on the source (holding only the source's reference).
//! - **Round 2** swaps the scopes: the destination is outer and may park
//!   for write readiness, the source is the inner one-shot scope.
//!
//! Whichever side was observed not-ready becomes the outer, parkable scope
//! of the next round. The loop ends on the first non-`EAGAIN` outcome: data
//! moved, a zero-byte transfer (end of stream), `EINVAL` on the opening
//! attempt (descriptor pair not splice-compatible), or a fatal errno. Both
//! sides reporting ready without the kernel accepting data restarts the
//! rounds.

use crate::error::Error;
use crate::fd::FdHandle;
use crate::sys;
use std::io;
use std::os::unix::io::RawFd;

/// Largest byte count handed to a single `splice(2)`/`tee(2)` call,
/// bounding the tail latency of one attempt.
pub(crate) const MAX_SPLICE_SIZE: usize = 4 << 20;

/// Transfer syscall selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    /// `splice(2)`: pipe to or from an external descriptor.
    Splice,
    /// `tee(2)`: duplicate between two pipes without consuming.
    Tee,
}

impl Op {
    fn call(self, rfd: RawFd, wfd: RawFd, max: usize) -> io::Result<usize> {
        match self {
            Self::Splice => sys::splice(rfd, wfd, max),
            Self::Tee => sys::tee(rfd, wfd, max),
        }
    }

    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Splice => "splice",
            Self::Tee => "tee",
        }
    }
}

/// Outcome of one driven transfer attempt.
#[derive(Debug)]
pub(crate) enum Drive {
    /// The kernel accepted this many bytes (nonzero).
    Moved(usize),
    /// Zero-byte transfer with no error: the source reached end of stream.
    Eof,
    /// `EINVAL` on the opening attempt: this descriptor pair cannot be
    /// accelerated and the caller should copy in userspace.
    Unsupported,
}

/// Driver failure, keeping track of which side failed so callers can apply
/// their side-specific error policy.
#[derive(Debug)]
pub(crate) enum DriverError {
    /// The source handle failed (closed, or its poller died).
    Src(Error),
    /// The destination handle failed.
    Dst(Error),
    /// The transfer syscall itself failed with a fatal errno.
    Syscall(io::Error),
}

impl DriverError {
    pub(crate) fn into_error(self, op: Op) -> Error {
        match self {
            Self::Src(e) | Self::Dst(e) => e,
            Self::Syscall(e) => Error::syscall(op.name(), e),
        }
    }
}

/// Moves up to `max` bytes from `src` to `dst` with a single successful
/// `op` syscall, parking for readiness under the reference discipline
/// described in the module docs.
pub(crate) fn run(
    op: Op,
    src: &FdHandle,
    dst: &FdHandle,
    max: usize,
) -> Result<Drive, DriverError> {
    debug_assert!(max > 0, "zero-length transfers are handled by callers");
    let mut outcome: Option<Drive> = None;
    let mut fatal: Option<io::Error> = None;

    loop {
        // Round 1: src outer (may park for read readiness), dst inner.
        let mut read_ready = false;
        let mut dst_dead: Option<Error> = None;
        src.with_read_fd(|rfd| {
            let mut wait_read = false;
            let inner = dst.with_write_fd(|wfd| {
                match op.call(rfd, wfd, max) {
                    Ok(0) => outcome = Some(Drive::Eof),
                    Ok(n) => outcome = Some(Drive::Moved(n)),
                    Err(e) => match e.raw_os_error() {
                        Some(libc::EAGAIN) => {
                            if !read_ready {
                                wait_read = true;
                            }
                            // Read-ready but the kernel still refused:
                            // fall through to round 2 and park on dst.
                        }
                        Some(libc::EINVAL) => outcome = Some(Drive::Unsupported),
                        _ => fatal = Some(e),
                    },
                }
                true
            });
            if let Err(e) = inner {
                dst_dead = Some(e);
                return true;
            }
            if wait_read {
                read_ready = true;
                return false; // park for read readiness, holding only src
            }
            true
        })
        .map_err(DriverError::Src)?;
        if let Some(e) = dst_dead.take() {
            return Err(DriverError::Dst(e));
        }
        if let Some(e) = fatal.take() {
            return Err(DriverError::Syscall(e));
        }
        if let Some(out) = outcome.take() {
            return Ok(out);
        }

        // Round 2: dst outer (may park for write readiness), src inner.
        let mut write_ready = false;
        let mut src_dead: Option<Error> = None;
        let mut restart = false;
        dst.with_write_fd(|wfd| {
            let mut wait_write = false;
            let inner = src.with_read_fd(|rfd| {
                match op.call(rfd, wfd, max) {
                    Ok(0) => outcome = Some(Drive::Eof),
                    Ok(n) => outcome = Some(Drive::Moved(n)),
                    Err(e) => match e.raw_os_error() {
                        Some(libc::EAGAIN) => {
                            if write_ready {
                                restart = true;
                            } else {
                                wait_write = true;
                            }
                        }
                        // EINVAL past the opening attempt is fatal.
                        _ => fatal = Some(e),
                    },
                }
                true
            });
            if let Err(e) = inner {
                src_dead = Some(e);
                return true;
            }
            if wait_write {
                write_ready = true;
                return false; // park for write readiness, holding only dst
            }
            true
        })
        .map_err(DriverError::Dst)?;
        if let Some(e) = src_dead.take() {
            return Err(DriverError::Src(e));
        }
        if let Some(e) = fatal.take() {
            return Err(DriverError::Syscall(e));
        }
        if let Some(out) = outcome.take() {
            return Ok(out);
        }
        debug_assert!(restart);
        // Both sides looked ready yet nothing moved; take it from the top
        // with src as the parkable side again.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Pipe;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn splice_moves_bytes_between_pipes() {
        let a = Pipe::new().expect("pipe a");
        let b = Pipe::new().expect("pipe b");
        a.write(b"ping-pong").expect("write");
        let drive = run(Op::Splice, a.read_handle(), b.write_handle(), 64).expect("drive");
        match drive {
            Drive::Moved(n) => assert_eq!(n, 9),
            other => panic!("unexpected outcome: {other:?}"),
        }
        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).expect("read");
        assert_eq!(&buf[..n], b"ping-pong");
    }

    #[test]
    fn zero_byte_splice_reports_eof() {
        let a = Pipe::new().expect("pipe a");
        let b = Pipe::new().expect("pipe b");
        a.close_write().expect("close write");
        let drive = run(Op::Splice, a.read_handle(), b.write_handle(), 64).expect("drive");
        assert!(matches!(drive, Drive::Eof));
    }

    #[test]
    fn tee_leaves_source_readable() {
        let a = Pipe::new().expect("pipe a");
        let b = Pipe::new().expect("pipe b");
        a.write(b"mirror").expect("write");
        let drive = run(Op::Tee, a.read_handle(), b.write_handle(), 64).expect("drive");
        match drive {
            Drive::Moved(n) => assert_eq!(n, 6),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // tee(2) duplicates without consuming: both pipes hold the bytes.
        let mut buf = [0u8; 8];
        let n = a.read(&mut buf).expect("read source");
        assert_eq!(&buf[..n], b"mirror");
        let n = b.read(&mut buf).expect("read mirror");
        assert_eq!(&buf[..n], b"mirror");
    }

    #[test]
    fn driver_parks_until_source_has_data() {
        let a = Arc::new(Pipe::new().expect("pipe a"));
        let b = Pipe::new().expect("pipe b");
        let writer = {
            let a = Arc::clone(&a);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                a.write(b"late").expect("write");
            })
        };
        let drive = run(Op::Splice, a.read_handle(), b.write_handle(), 64).expect("drive");
        match drive {
            Drive::Moved(n) => assert_eq!(n, 4),
            other => panic!("unexpected outcome: {other:?}"),
        }
        writer.join().expect("writer thread");
    }

    #[test]
    fn closed_destination_is_reported_as_dst() {
        let a = Pipe::new().expect("pipe a");
        let b = Pipe::new().expect("pipe b");
        a.write(b"x").expect("write");
        b.close_write().expect("close target write end");
        let err = run(Op::Tee, a.read_handle(), b.write_handle(), 64).unwrap_err();
        assert!(matches!(err, DriverError::Dst(_)), "got {err:?}");
    }
}
