//! Userspace copy loop used when kernel acceleration is unavailable.
//!
//! Byte semantics are identical to the accelerated path: the loop stops at
//! end of stream, counts every byte that reached the writer, and keeps the
//! identity of the failing side so reader and writer errors surface as
//! themselves.

use crate::error::Error;
use crate::fd::FdHandle;
use crate::sys;
use std::io::{self, Read, Write};

/// Chunk size of the copy loop.
const COPY_CHUNK: usize = 32 * 1024;

/// Copies from `reader` to `writer` until end of stream.
pub(crate) fn copy<R, W>(reader: &mut R, writer: &mut W) -> Result<u64, Error>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut moved = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return Ok(moved),
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::reader(e).with_bytes(moved)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::writer(e).with_bytes(moved))?;
        moved += n as u64;
    }
}

/// Copies exactly `limit` bytes. The caller guarantees the reader holds at
/// least that many; a premature end of stream is an error.
pub(crate) fn copy_n<R, W>(reader: &mut R, writer: &mut W, limit: u64) -> Result<u64, Error>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut moved = 0u64;
    while moved < limit {
        let want = usize::try_from((limit - moved).min(COPY_CHUNK as u64)).unwrap_or(COPY_CHUNK);
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(Error::reader(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended before the expected byte count",
                ))
                .with_bytes(moved));
            }
            Ok(n) => n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::reader(e).with_bytes(moved)),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| Error::writer(e).with_bytes(moved))?;
        moved += n as u64;
    }
    Ok(moved)
}

/// Reader over a handle-wrapped descriptor: parks through the handle's
/// poller instead of surfacing `EAGAIN`.
pub(crate) struct HandleReader<'a>(pub(crate) &'a FdHandle);

impl Read for HandleReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut out = Ok(0);
        self.0.with_read_fd(|fd| match sys::read(fd, buf) {
            Ok(n) => {
                out = Ok(n);
                true
            }
            Err(ref e) if e.raw_os_error() == Some(libc::EAGAIN) => false,
            Err(e) => {
                out = Err(e);
                true
            }
        })?;
        out
    }
}

/// Writer over a handle-wrapped descriptor; the same parking behavior on
/// the write side.
pub(crate) struct HandleWriter<'a>(pub(crate) &'a FdHandle);

impl Write for HandleWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut out = Ok(0);
        self.0.with_write_fd(|fd| match sys::write(fd, buf) {
            Ok(n) => {
                out = Ok(n);
                true
            }
            Err(ref e) if e.raw_os_error() == Some(libc::EAGAIN) => false,
            Err(e) => {
                out = Err(e);
                true
            }
        })?;
        out
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
