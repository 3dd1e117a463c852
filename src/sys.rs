//! Thin wrappers over the raw syscalls the crate drives.
//!
//! Every wrapper retries `EINTR` and reports failures through
//! `io::Error::last_os_error()`, so errno values reach callers untouched.
//! The transfer syscalls always pass `SPLICE_F_NONBLOCK`: blocking happens
//! in the poller, never in the kernel.

use std::io;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};

/// Creates a kernel pipe with both ends non-blocking and close-on-exec.
pub(crate) fn pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];

    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        // SAFETY: fds points at a valid array of two c_ints.
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        // SAFETY: fds points at a valid array of two c_ints.
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in fds {
            // SAFETY: fd was just returned by pipe(2) and is owned here.
            let rc = unsafe {
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                // SAFETY: both descriptors are still owned by this function.
                unsafe {
                    libc::close(fds[0]);
                    libc::close(fds[1]);
                }
                return Err(err);
            }
            // SAFETY: same ownership argument as above.
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
            }
        }
    }

    // SAFETY: pipe(2) returned two freshly opened descriptors we now own.
    unsafe { Ok((OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1]))) }
}

/// Non-blocking `read(2)`.
pub(crate) fn read(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is a valid writable region of buf.len() bytes.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// Non-blocking `write(2)`.
pub(crate) fn write(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    loop {
        // SAFETY: buf is a valid readable region of buf.len() bytes.
        let n = unsafe { libc::write(fd, buf.as_ptr().cast::<libc::c_void>(), buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// `splice(2)` with `SPLICE_F_NONBLOCK`. Null offsets: at least one side is
/// a pipe and the other side's file position advances normally.
#[cfg(target_os = "linux")]
pub(crate) fn splice(rfd: RawFd, wfd: RawFd, max: usize) -> io::Result<usize> {
    loop {
        // SAFETY: null offsets are valid for pipe-backed splice.
        let n = unsafe {
            libc::splice(
                rfd,
                std::ptr::null_mut(),
                wfd,
                std::ptr::null_mut(),
                max,
                libc::SPLICE_F_NONBLOCK,
            )
        };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// `tee(2)` with `SPLICE_F_NONBLOCK`: duplicates up to `max` bytes from one
/// pipe's read end into another pipe's write end without consuming them.
#[cfg(target_os = "linux")]
pub(crate) fn tee(rfd: RawFd, wfd: RawFd, max: usize) -> io::Result<usize> {
    loop {
        // SAFETY: tee is only ever invoked on two pipe descriptors.
        let n = unsafe { libc::tee(rfd, wfd, max, libc::SPLICE_F_NONBLOCK) };
        if n >= 0 {
            return Ok(n as usize);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

/// `fcntl(F_GETPIPE_SZ)`: the kernel's stored pipe capacity.
#[cfg(target_os = "linux")]
pub(crate) fn pipe_buffer_size(fd: RawFd) -> io::Result<usize> {
    // SAFETY: F_GETPIPE_SZ takes no argument.
    let n = unsafe { libc::fcntl(fd, libc::F_GETPIPE_SZ) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// `fcntl(F_SETPIPE_SZ)`: requests a capacity; the kernel may round up.
/// Returns the capacity actually stored.
#[cfg(target_os = "linux")]
pub(crate) fn set_pipe_buffer_size(fd: RawFd, size: usize) -> io::Result<usize> {
    let requested = libc::c_int::try_from(size)
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    // SAFETY: F_SETPIPE_SZ takes an int argument.
    let n = unsafe { libc::fcntl(fd, libc::F_SETPIPE_SZ, requested) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Switches an adopted descriptor to non-blocking mode, returning the
/// previous `F_GETFL` flags so the caller can restore them afterwards.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<libc::c_int> {
    // SAFETY: fcntl on a caller-supplied live descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK == 0 {
        // SAFETY: same as above.
        let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(flags)
}

/// Restores descriptor flags saved by [`set_nonblocking`].
pub(crate) fn restore_flags(fd: RawFd, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: fcntl on a caller-supplied live descriptor.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
