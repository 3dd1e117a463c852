//! End-to-end transfers between two external streams.
//!
//! `splice(2)` cannot move bytes between two non-pipe descriptors, so the
//! transfer composes a transient pipe with two half-transfers on one flow
//! of control: a **drain** (source into the pipe) followed by a **pump**
//! (pipe into the destination), alternating in lock-step. The pump never
//! runs before its drain has placed bytes in the pipe, and it moves exactly
//! the drained count, so the pipe is empty at every phase boundary.

use crate::cap::{SpliceRead, SpliceWrite};
#[cfg(target_os = "linux")]
use crate::driver::{self, Drive};
use crate::error::Error;
use crate::fallback;
#[cfg(target_os = "linux")]
use crate::fallback::HandleReader;
#[cfg(target_os = "linux")]
use crate::fd::FdHandle;
#[cfg(target_os = "linux")]
use crate::pipe::Pipe;

/// Moves bytes from `src` to `dst` through a transient kernel pipe,
/// returning the total byte count.
///
/// Equivalent to draining `src` into a fresh [`Pipe`](crate::Pipe) while
/// pumping that pipe into `dst`, but in lock-step on the calling thread,
/// with no auxiliary worker. When either side is not descriptor-backed, or
/// the kernel rejects the descriptor pair (`EINVAL` on the opening
/// attempt), the remainder is copied in userspace with identical byte
/// semantics. A size-limited source is honored and its limit decremented
/// by the bytes actually moved.
///
/// # Errors
///
/// [`Error`] carrying the failing side and a best-effort count of bytes
/// already delivered to `dst`. Pipe creation failure reports
/// [`ErrorKind::Setup`](crate::ErrorKind) with zero bytes moved.
pub fn transfer<W, R>(dst: &mut W, src: &mut R) -> Result<u64, Error>
where
    W: SpliceWrite + ?Sized,
    R: SpliceRead + ?Sized,
{
    #[cfg(target_os = "linux")]
    {
        if let (Some(rfd), Some(wfd)) = (src.splice_read_fd(), dst.splice_write_fd()) {
            return spliced(dst, src, rfd, wfd);
        }
    }
    fallback::copy(src, dst)
}

#[cfg(target_os = "linux")]
fn spliced<W, R>(
    dst: &mut W,
    src: &mut R,
    rfd: std::os::unix::io::RawFd,
    wfd: std::os::unix::io::RawFd,
) -> Result<u64, Error>
where
    W: SpliceWrite + ?Sized,
    R: SpliceRead + ?Sized,
{
    // Adoption failure means the side is not poller-compatible after all;
    // degrade the same way a missing descriptor does.
    let Ok(src_handle) = FdHandle::adopt(rfd) else {
        return fallback::copy(src, dst);
    };
    let Ok(dst_handle) = FdHandle::adopt(wfd) else {
        drop(src_handle);
        return fallback::copy(src, dst);
    };
    let pipe = Pipe::new().map_err(Error::setup)?;

    let mut moved = 0u64;
    loop {
        let remaining = src.splice_limit().unwrap_or(u64::MAX);
        if remaining == 0 {
            return Ok(moved);
        }
        let max = driver::MAX_SPLICE_SIZE
            .min(usize::try_from(remaining).unwrap_or(driver::MAX_SPLICE_SIZE));

        // Drain: source into the pipe.
        let inpipe = match driver::run(driver::Op::Splice, &src_handle, pipe.write_handle(), max)
        {
            Ok(Drive::Moved(n)) => {
                src.consume_splice_limit(n as u64);
                n
            }
            Ok(Drive::Eof) => return Ok(moved),
            Ok(Drive::Unsupported) => {
                tracing::debug!("source not splice-compatible, copying in userspace");
                // Nothing has entered the pipe on this round; the whole
                // remainder goes through userspace with original flags.
                drop(src_handle);
                drop(dst_handle);
                return fallback::copy(src, dst)
                    .map(|copied| moved + copied)
                    .map_err(|e| e.with_bytes(moved));
            }
            Err(e) => return Err(e.into_error(driver::Op::Splice).with_bytes(moved)),
        };

        // Pump: exactly the drained count, pipe into the destination.
        let mut left = inpipe;
        while left > 0 {
            match driver::run(driver::Op::Splice, pipe.read_handle(), &dst_handle, left) {
                Ok(Drive::Moved(n)) => {
                    moved += n as u64;
                    left -= n;
                }
                Ok(Drive::Eof) => {
                    // Unreachable while we hold the pipe's write end open
                    // with `left` bytes buffered.
                    debug_assert!(false, "pump observed EOF with bytes in the pipe");
                    return Ok(moved);
                }
                Ok(Drive::Unsupported) => {
                    tracing::debug!("destination not splice-compatible, copying in userspace");
                    // The drained bytes are already in the pipe: hand them
                    // to the destination in userspace first, then copy the
                    // rest of the source the same way.
                    drop(dst_handle);
                    let emptied =
                        fallback::copy_n(&mut HandleReader(pipe.read_handle()), dst, left as u64)
                            .map_err(|e| e.with_bytes(moved))?;
                    moved += emptied;
                    drop(src_handle);
                    return fallback::copy(src, dst)
                        .map(|copied| moved + copied)
                        .map_err(|e| e.with_bytes(moved));
                }
                Err(e) => return Err(e.into_error(driver::Op::Splice).with_bytes(moved)),
            }
        }
    }
}
