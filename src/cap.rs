//! Capability detection for splice-eligible streams.
//!
//! Kernel acceleration needs a raw file descriptor on the external side of
//! a transfer. Rather than downcasting at runtime, eligibility is a trait
//! capability queried at call time: a source or sink that reports a
//! descriptor gets the `splice(2)` path, everything else transparently goes
//! through the userspace copy loop with identical byte semantics.
//!
//! [`io::Take`] is recognized as a size-limited source: its remaining limit
//! bounds the transfer and is decremented by the bytes actually moved, so
//! the limiter stays accurate even when the bytes never cross userspace.

use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// A byte source that may expose a raw descriptor for kernel acceleration.
///
/// The default methods describe a plain userspace reader; implementors that
/// are descriptor-backed override [`splice_read_fd`](Self::splice_read_fd).
/// The descriptor must remain open for the duration of any transfer call it
/// is handed to.
pub trait SpliceRead: Read {
    /// Raw descriptor to splice from, when the source is descriptor-backed.
    fn splice_read_fd(&self) -> Option<RawFd> {
        None
    }

    /// Remaining byte limit, when the source is length-capped.
    fn splice_limit(&self) -> Option<u64> {
        None
    }

    /// Records `n` bytes consumed against the limit.
    fn consume_splice_limit(&mut self, _n: u64) {}
}

/// A byte sink that may expose a raw descriptor for kernel acceleration.
pub trait SpliceWrite: Write {
    /// Raw descriptor to splice into, when the sink is descriptor-backed.
    fn splice_write_fd(&self) -> Option<RawFd> {
        None
    }
}

macro_rules! fd_backed {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl SpliceRead for $ty {
                fn splice_read_fd(&self) -> Option<RawFd> {
                    Some(self.as_raw_fd())
                }
            }

            impl SpliceRead for &$ty {
                fn splice_read_fd(&self) -> Option<RawFd> {
                    Some(self.as_raw_fd())
                }
            }

            impl SpliceWrite for $ty {
                fn splice_write_fd(&self) -> Option<RawFd> {
                    Some(self.as_raw_fd())
                }
            }

            impl SpliceWrite for &$ty {
                fn splice_write_fd(&self) -> Option<RawFd> {
                    Some(self.as_raw_fd())
                }
            }
        )+
    };
}

fd_backed!(File, TcpStream, UnixStream);

impl<T: SpliceRead + ?Sized> SpliceRead for &mut T {
    fn splice_read_fd(&self) -> Option<RawFd> {
        (**self).splice_read_fd()
    }

    fn splice_limit(&self) -> Option<u64> {
        (**self).splice_limit()
    }

    fn consume_splice_limit(&mut self, n: u64) {
        (**self).consume_splice_limit(n);
    }
}

impl<T: SpliceRead + ?Sized> SpliceRead for Box<T> {
    fn splice_read_fd(&self) -> Option<RawFd> {
        (**self).splice_read_fd()
    }

    fn splice_limit(&self) -> Option<u64> {
        (**self).splice_limit()
    }

    fn consume_splice_limit(&mut self, n: u64) {
        (**self).consume_splice_limit(n);
    }
}

impl<T: SpliceWrite + ?Sized> SpliceWrite for &mut T {
    fn splice_write_fd(&self) -> Option<RawFd> {
        (**self).splice_write_fd()
    }
}

impl<T: SpliceWrite + ?Sized> SpliceWrite for Box<T> {
    fn splice_write_fd(&self) -> Option<RawFd> {
        (**self).splice_write_fd()
    }
}

impl<R: SpliceRead> SpliceRead for io::Take<R> {
    fn splice_read_fd(&self) -> Option<RawFd> {
        self.get_ref().splice_read_fd()
    }

    fn splice_limit(&self) -> Option<u64> {
        Some(self.limit())
    }

    fn consume_splice_limit(&mut self, n: u64) {
        let left = self.limit().saturating_sub(n);
        self.set_limit(left);
    }
}

// Userspace-only sources and sinks: eligible for transfers, never for the
// kernel path.
impl<T: AsRef<[u8]>> SpliceRead for Cursor<T> {}
impl SpliceRead for &[u8] {}
impl SpliceRead for io::Empty {}
impl SpliceWrite for Vec<u8> {}
impl SpliceWrite for io::Sink {}
