//! The buffered, unidirectional kernel pipe.
//!
//! A [`Pipe`] owns both ends of a kernel pipe pair, each wrapped as a
//! reference-counted descriptor handle. Bytes enter through the write end
//! and leave through the read end; transfers to and from external
//! descriptor-backed streams move inside the kernel via `splice(2)`, and a
//! configured tee target mirrors the read path via `tee(2)` or a userspace
//! writer.

use crate::cap::{SpliceRead, SpliceWrite};
#[cfg(target_os = "linux")]
use crate::driver::{self, Drive, DriverError};
use crate::error::Error;
use crate::fallback::{self, HandleReader, HandleWriter};
use crate::fd::FdHandle;
use crate::sys;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, OnceLock};

/// Where the read path mirrors its bytes.
///
/// The variant is fixed once, before any I/O: either a userspace writer
/// that receives a copy of every byte as it is read, or another pipe's
/// write end fed through `tee(2)` ahead of each consuming read.
enum TeeTarget {
    Writer(Mutex<Box<dyn Write + Send>>),
    Pipe(Arc<FdHandle>),
}

/// A buffered, unidirectional data channel backed by a kernel pipe.
///
/// Both ends are non-blocking and close-on-exec; every potentially-blocking
/// operation parks through a readiness poller instead of blocking in the
/// kernel. Methods take `&self`, so a `Pipe` can be shared across threads
/// (for example one thread draining while another writes); concurrent
/// operations on the *same* end are not synchronized beyond close-safety.
pub struct Pipe {
    read_half: Arc<FdHandle>,
    write_half: Arc<FdHandle>,
    tee: OnceLock<TeeTarget>,
}

impl Pipe {
    /// Creates a new pipe.
    ///
    /// # Errors
    ///
    /// Returns an error when the kernel refuses the pipe or the poller
    /// registration (typically descriptor exhaustion).
    pub fn new() -> io::Result<Self> {
        let (r, w) = sys::pipe()?;
        Ok(Self {
            read_half: Arc::new(FdHandle::from_owned(r)?),
            write_half: Arc::new(FdHandle::from_owned(w)?),
            tee: OnceLock::new(),
        })
    }

    /// Returns the kernel's pipe buffer capacity.
    #[cfg(target_os = "linux")]
    pub fn buffer_size(&self) -> io::Result<usize> {
        self.write_half
            .control(sys::pipe_buffer_size)
            .map_err(io::Error::from)?
    }

    /// Returns the kernel's pipe buffer capacity.
    #[cfg(not(target_os = "linux"))]
    pub fn buffer_size(&self) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "pipe buffer sizing requires Linux",
        ))
    }

    /// Requests a pipe buffer capacity of `size` bytes and returns the
    /// capacity the kernel actually stored, which may be rounded up.
    #[cfg(target_os = "linux")]
    pub fn set_buffer_size(&self, size: usize) -> io::Result<usize> {
        self.write_half
            .control(|fd| sys::set_pipe_buffer_size(fd, size))
            .map_err(io::Error::from)?
    }

    /// Requests a pipe buffer capacity of `size` bytes.
    #[cfg(not(target_os = "linux"))]
    pub fn set_buffer_size(&self, _size: usize) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "pipe buffer sizing requires Linux",
        ))
    }

    /// Reads from the pipe into `buf`, waiting until at least one byte is
    /// available or the write side has closed (end of stream, `Ok(0)`).
    ///
    /// With a tee target configured, the mirror is fed first: a userspace
    /// writer receives every byte before the read returns, and a pipe
    /// target receives a `tee(2)` duplicate before the same byte count is
    /// consumed here. A read never consumes more than was mirrored.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self.tee.get() {
            None => self.read_direct(buf),
            Some(TeeTarget::Writer(writer)) => {
                let n = self.read_direct(buf)?;
                if n > 0 {
                    // The mirror write completes before the read reports.
                    writer.lock().write_all(&buf[..n])?;
                }
                Ok(n)
            }
            Some(TeeTarget::Pipe(target)) => self.read_tee(buf, target),
        }
    }

    /// Writes the whole of `buf` into the pipe, waiting for capacity as
    /// needed. Returns `buf.len()` on success.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        HandleWriter(&self.write_half).write_all(buf)?;
        Ok(buf.len())
    }

    /// Closes the read end. In-flight operations on that end return a
    /// closed-descriptor error and parked waiters wake promptly.
    pub fn close_read(&self) -> io::Result<()> {
        self.read_half.close()
    }

    /// Closes the write end; a drained read side then reports end of
    /// stream.
    pub fn close_write(&self) -> io::Result<()> {
        self.write_half.close()
    }

    /// Closes both ends, reporting the first failure.
    pub fn close(&self) -> io::Result<()> {
        let read = self.close_read();
        let write = self.close_write();
        read.and(write)
    }

    /// Mirrors the read path into another pipe using kernel `tee(2)`:
    /// every byte later read from this pipe is first duplicated into
    /// `target`'s write end.
    ///
    /// Must be called before any `read` or `write_to`, and at most one tee
    /// target may ever be configured. Chains are built by cascading:
    /// `a.tee(&b)` then `b.tee(&c)` advances a segment through each link
    /// per read on `a`.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` when a tee target was already configured.
    pub fn tee(&self, target: &Pipe) -> io::Result<()> {
        self.set_tee(TeeTarget::Pipe(Arc::clone(&target.write_half)))
    }

    /// Mirrors the read path into a userspace writer: each read completes
    /// its mirror write before reporting. There is no internal buffering of
    /// un-mirrored data.
    ///
    /// Same preconditions as [`tee`](Self::tee).
    pub fn tee_writer<W>(&self, writer: W) -> io::Result<()>
    where
        W: Write + Send + 'static,
    {
        self.set_tee(TeeTarget::Writer(Mutex::new(Box::new(writer))))
    }

    /// Transfers data from `src` into the pipe until end of stream (or the
    /// source's byte limit), splicing when `src` is descriptor-backed and
    /// copying in userspace otherwise. Returns the bytes moved.
    ///
    /// # Errors
    ///
    /// [`Error`] carrying the failing side and the byte count moved before
    /// the failure. `EINVAL` from the kernel's first attempt is not an
    /// error: the remainder is copied in userspace.
    pub fn read_from<R>(&self, src: &mut R) -> Result<u64, Error>
    where
        R: SpliceRead + ?Sized,
    {
        #[cfg(target_os = "linux")]
        {
            if let Some(fd) = src.splice_read_fd() {
                if let Ok(handle) = FdHandle::adopt(fd) {
                    return self.splice_from(src, handle);
                }
                // The descriptor could not be registered; treat the source
                // as not descriptor-backed.
            }
        }
        fallback::copy(src, &mut HandleWriter(&self.write_half))
    }

    /// Transfers data from the pipe to `dst` until end of stream on the
    /// read side, splicing when `dst` is descriptor-backed and copying in
    /// userspace otherwise. Returns the bytes moved.
    ///
    /// # Errors
    ///
    /// Same policy as [`read_from`](Self::read_from).
    pub fn write_to<W>(&self, dst: &mut W) -> Result<u64, Error>
    where
        W: SpliceWrite + ?Sized,
    {
        #[cfg(target_os = "linux")]
        {
            if let Some(fd) = dst.splice_write_fd() {
                if let Ok(handle) = FdHandle::adopt(fd) {
                    return self.splice_to(dst, handle);
                }
            }
        }
        let mut reader: &Pipe = self;
        fallback::copy(&mut reader, dst)
    }

    fn read_direct(&self, buf: &mut [u8]) -> io::Result<usize> {
        HandleReader(&self.read_half).read(buf)
    }

    /// The mirror-pipe read path: duplicate first, consume second, never
    /// consume past the duplicated count.
    #[cfg(target_os = "linux")]
    fn read_tee(&self, buf: &mut [u8], target: &FdHandle) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut teed = 0usize;
        let mut deferred: Option<io::Error> = None;
        match driver::run(driver::Op::Tee, &self.read_half, target, buf.len()) {
            Ok(Drive::Moved(n)) => teed = n,
            Ok(Drive::Eof) => {}
            Ok(Drive::Unsupported) => {
                deferred = Some(io::Error::from_raw_os_error(libc::EINVAL));
            }
            // Our own read end is dead; the consuming read reports it.
            Err(DriverError::Src(_)) => return self.read_direct(buf),
            // A dead mirror target is reported only after consuming the
            // already-duplicated portion, like a userspace tee would.
            Err(DriverError::Dst(e)) => deferred = Some(e.into()),
            Err(DriverError::Syscall(e)) => deferred = Some(e),
        }
        let limit = teed.min(buf.len());
        let n = self.read_direct(&mut buf[..limit])?;
        match deferred {
            Some(err) => Err(err),
            None => Ok(n),
        }
    }

    /// Userspace rendition of the mirror-pipe path for non-Linux targets:
    /// read, then duplicate into the target's write end before reporting.
    #[cfg(not(target_os = "linux"))]
    fn read_tee(&self, buf: &mut [u8], target: &FdHandle) -> io::Result<usize> {
        let n = self.read_direct(buf)?;
        if n > 0 {
            HandleWriter(target).write_all(&buf[..n])?;
        }
        Ok(n)
    }

    #[cfg(target_os = "linux")]
    fn splice_from<R>(&self, src: &mut R, handle: FdHandle) -> Result<u64, Error>
    where
        R: SpliceRead + ?Sized,
    {
        let mut moved = 0u64;
        loop {
            let remaining = src.splice_limit().unwrap_or(u64::MAX);
            if remaining == 0 {
                return Ok(moved);
            }
            let max = driver::MAX_SPLICE_SIZE
                .min(usize::try_from(remaining).unwrap_or(driver::MAX_SPLICE_SIZE));
            match driver::run(driver::Op::Splice, &handle, &self.write_half, max) {
                Ok(Drive::Moved(n)) => {
                    src.consume_splice_limit(n as u64);
                    moved += n as u64;
                }
                Ok(Drive::Eof) => return Ok(moved),
                Ok(Drive::Unsupported) => {
                    tracing::debug!("source not splice-compatible, copying in userspace");
                    // Restore the source's original flags before using its
                    // blocking Read implementation.
                    drop(handle);
                    let copied = fallback::copy(src, &mut HandleWriter(&self.write_half))
                        .map_err(|e| e.with_bytes(moved))?;
                    return Ok(moved + copied);
                }
                Err(e) => return Err(e.into_error(driver::Op::Splice).with_bytes(moved)),
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn splice_to<W>(&self, dst: &mut W, handle: FdHandle) -> Result<u64, Error>
    where
        W: SpliceWrite + ?Sized,
    {
        let mut moved = 0u64;
        loop {
            match driver::run(
                driver::Op::Splice,
                &self.read_half,
                &handle,
                driver::MAX_SPLICE_SIZE,
            ) {
                Ok(Drive::Moved(n)) => moved += n as u64,
                Ok(Drive::Eof) => return Ok(moved),
                Ok(Drive::Unsupported) => {
                    tracing::debug!("destination not splice-compatible, copying in userspace");
                    drop(handle);
                    let mut reader: &Pipe = self;
                    let copied =
                        fallback::copy(&mut reader, dst).map_err(|e| e.with_bytes(moved))?;
                    return Ok(moved + copied);
                }
                Err(e) => return Err(e.into_error(driver::Op::Splice).with_bytes(moved)),
            }
        }
    }

    fn set_tee(&self, target: TeeTarget) -> io::Result<()> {
        if self.tee.set(target).is_err() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "tee target is already configured",
            ));
        }
        Ok(())
    }

    pub(crate) fn read_handle(&self) -> &FdHandle {
        &self.read_half
    }

    pub(crate) fn write_handle(&self) -> &FdHandle {
        &self.write_half
    }
}

impl fmt::Debug for Pipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tee = match self.tee.get() {
            None => "none",
            Some(TeeTarget::Writer(_)) => "writer",
            Some(TeeTarget::Pipe(_)) => "pipe",
        };
        f.debug_struct("Pipe").field("tee", &tee).finish_non_exhaustive()
    }
}

impl Read for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Pipe::read(self, buf)
    }
}

impl Read for &Pipe {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Pipe::read(*self, buf)
    }
}

impl Write for Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Pipe::write(self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for &Pipe {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Pipe::write(*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// A Pipe is never handed to the kernel path directly: its reads must stay
// tee-aware, so transfers involving a Pipe route through Read/Write.
impl SpliceRead for Pipe {}
impl SpliceRead for &Pipe {}
impl SpliceWrite for Pipe {}
impl SpliceWrite for &Pipe {}
