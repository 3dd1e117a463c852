//! Reference-counted descriptor handles with poller-mediated readiness.
//!
//! [`FdHandle`] wraps a non-blocking file descriptor and offers three scoped
//! operations: [`with_read_fd`](FdHandle::with_read_fd),
//! [`with_write_fd`](FdHandle::with_write_fd), and
//! [`control`](FdHandle::control). Each acquires a reference to the
//! descriptor, runs a caller closure against the raw fd, and releases the
//! reference when the scope ends. A closure returning `false` means "not
//! ready": the caller is parked until the next readiness event on this
//! descriptor and the closure is invoked again.
//!
//! # The reference discipline
//!
//! A caller may park only while holding exactly one descriptor reference:
//! the reference of the descriptor being waited on. Parking inside an inner
//! scope while an outer scope still holds a different descriptor would make
//! a concurrent `close` of the outer descriptor wait on an unrelated
//! operation against another fd. The driver in `crate::driver` is built
//! around this rule; nested scopes are permitted only when the inner
//! closure returns `true` on every path.
//!
//! # Close semantics
//!
//! [`close`](FdHandle::close) poisons the handle: new acquisitions fail
//! with [`ErrorKind::ClosedDescriptor`](crate::ErrorKind), a parked waiter
//! is woken through the poller's notifier, and the underlying descriptor is
//! closed once the last outstanding reference drains.

use crate::error::Error;
use crate::sys;
use parking_lot::Mutex;
use polling::{Event, Poller};
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Key under which every handle registers its single descriptor.
const WAIT_KEY: usize = 0;

/// Readiness direction for a parked waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interest {
    /// Wake when the descriptor becomes readable.
    Read,
    /// Wake when the descriptor becomes writable.
    Write,
}

struct State {
    /// Outstanding scoped references.
    refs: usize,
    /// Poisoned: no new references may be taken.
    closed: bool,
    /// Present while this handle owns the descriptor's lifetime.
    owned: Option<OwnedFd>,
    /// Original `F_GETFL` flags of an adopted descriptor, restored on drop.
    saved_flags: Option<libc::c_int>,
}

/// A non-blocking descriptor registered with its own readiness poller.
pub(crate) struct FdHandle {
    raw: RawFd,
    poller: Poller,
    state: Mutex<State>,
    /// Serializes parked waiters; concurrent I/O on one end is not
    /// synchronized beyond close-safety.
    wait_serial: Mutex<()>,
}

impl FdHandle {
    /// Wraps a descriptor this handle will own and eventually close.
    /// The descriptor must already be non-blocking.
    pub(crate) fn from_owned(fd: OwnedFd) -> io::Result<Self> {
        let raw = fd.as_raw_fd();
        let poller = Poller::new()?;
        poller.add(raw, Event::none(WAIT_KEY))?;
        Ok(Self {
            raw,
            poller,
            state: Mutex::new(State {
                refs: 0,
                closed: false,
                owned: Some(fd),
                saved_flags: None,
            }),
            wait_serial: Mutex::new(()),
        })
    }

    /// Adopts a caller-owned descriptor for the duration of one accelerated
    /// operation. The descriptor is switched to non-blocking; its original
    /// flags come back when the handle drops. The caller must keep the
    /// descriptor open for the handle's lifetime.
    pub(crate) fn adopt(raw: RawFd) -> io::Result<Self> {
        let saved = sys::set_nonblocking(raw)?;
        let registered = Poller::new().and_then(|poller| {
            poller.add(raw, Event::none(WAIT_KEY))?;
            Ok(poller)
        });
        let poller = match registered {
            Ok(poller) => poller,
            Err(err) => {
                let _ = sys::restore_flags(raw, saved);
                return Err(err);
            }
        };
        tracing::trace!(fd = raw, "adopted external descriptor");
        Ok(Self {
            raw,
            poller,
            state: Mutex::new(State {
                refs: 0,
                closed: false,
                owned: None,
                saved_flags: Some(saved),
            }),
            wait_serial: Mutex::new(()),
        })
    }

    /// Runs `f` with the live descriptor until it reports completion,
    /// parking for read readiness whenever it returns `false`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::ClosedDescriptor`](crate::ErrorKind) once the handle is
    /// poisoned, whether before entry or while parked.
    pub(crate) fn with_read_fd<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnMut(RawFd) -> bool,
    {
        self.with_fd(Interest::Read, f)
    }

    /// Like [`with_read_fd`](Self::with_read_fd), parking for write
    /// readiness instead.
    pub(crate) fn with_write_fd<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnMut(RawFd) -> bool,
    {
        self.with_fd(Interest::Write, f)
    }

    /// Runs `f` exactly once with the live descriptor, never parking.
    pub(crate) fn control<T, F>(&self, f: F) -> Result<T, Error>
    where
        F: FnOnce(RawFd) -> T,
    {
        let _guard = self.acquire()?;
        Ok(f(self.raw))
    }

    fn with_fd<F>(&self, interest: Interest, mut f: F) -> Result<(), Error>
    where
        F: FnMut(RawFd) -> bool,
    {
        let _guard = self.acquire()?;
        loop {
            if f(self.raw) {
                return Ok(());
            }
            // Parked holding only this handle's reference.
            self.wait(interest)?;
        }
    }

    fn acquire(&self) -> Result<RefGuard<'_>, Error> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::closed());
        }
        state.refs += 1;
        Ok(RefGuard(self))
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.refs -= 1;
        if state.closed && state.refs == 0 {
            // Last reference out: the descriptor closes now.
            state.owned.take();
        }
    }

    /// Parks the caller until the descriptor reports `interest` readiness
    /// or the handle is poisoned. Must be invoked with a reference held on
    /// this handle and on no other.
    fn wait(&self, interest: Interest) -> Result<(), Error> {
        let _serial = self.wait_serial.lock();
        if self.state.lock().closed {
            return Err(Error::closed());
        }
        let event = match interest {
            Interest::Read => Event::readable(WAIT_KEY),
            Interest::Write => Event::writable(WAIT_KEY),
        };
        // Oneshot registration: re-arm before every wait.
        self.poller
            .modify(self.raw, event)
            .map_err(|e| Error::syscall("poll", e))?;
        let mut events = Vec::with_capacity(1);
        match self.poller.wait(&mut events, None::<Duration>) {
            Ok(_) => {}
            // A signal-interrupted wait is a spurious wake; the caller's
            // closure simply runs again.
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::syscall("poll", e)),
        }
        // Wakeups may also come from close(); recheck before resuming.
        if self.state.lock().closed {
            return Err(Error::closed());
        }
        Ok(())
    }

    /// Poisons the handle and wakes any parked waiter. The descriptor is
    /// closed immediately when idle, otherwise when the last reference
    /// drains.
    ///
    /// # Errors
    ///
    /// A second close reports [`ErrorKind::ClosedDescriptor`](crate::ErrorKind).
    pub(crate) fn close(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::closed().into());
        }
        state.closed = true;
        if state.refs == 0 {
            state.owned.take();
        }
        drop(state);
        let _ = self.poller.notify();
        Ok(())
    }
}

impl Drop for FdHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        // Deregistration errors are ignored: the descriptor may already be
        // gone, which empties the interest set on its own.
        let _ = self.poller.delete(self.raw);
        if let Some(flags) = state.saved_flags.take() {
            let _ = sys::restore_flags(self.raw, flags);
        }
    }
}

struct RefGuard<'a>(&'a FdHandle);

impl Drop for RefGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn pipe_handles() -> (FdHandle, FdHandle) {
        let (r, w) = sys::pipe().expect("pipe");
        (
            FdHandle::from_owned(r).expect("wrap read end"),
            FdHandle::from_owned(w).expect("wrap write end"),
        )
    }

    #[test]
    fn control_runs_once_with_live_fd() {
        let (r, _w) = pipe_handles();
        let fd = r.control(|fd| fd).expect("control");
        assert_eq!(fd, r.raw);
    }

    #[test]
    fn close_poisons_future_acquisitions() {
        let (r, _w) = pipe_handles();
        r.close().expect("first close");
        assert!(r.close().is_err());
        let err = r.control(|_| ()).unwrap_err();
        assert!(err.kind().is_descriptor_dead());
    }

    #[test]
    fn with_read_fd_retries_until_ready() {
        let (r, w) = pipe_handles();
        let w = Arc::new(w);
        let writer = {
            let w = Arc::clone(&w);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                w.with_write_fd(|fd| {
                    sys::write(fd, b"x").expect("write");
                    true
                })
                .expect("with_write_fd");
            })
        };
        let mut seen = 0u8;
        r.with_read_fd(|fd| {
            let mut buf = [0u8; 1];
            match sys::read(fd, &mut buf) {
                Ok(1) => {
                    seen = buf[0];
                    true
                }
                Ok(_) => true,
                Err(ref e) if e.raw_os_error() == Some(libc::EAGAIN) => false,
                Err(e) => panic!("read: {e}"),
            }
        })
        .expect("with_read_fd");
        assert_eq!(seen, b'x');
        writer.join().expect("writer thread");
    }

    #[test]
    fn close_wakes_parked_waiter() {
        let (r, _w) = pipe_handles();
        let r = Arc::new(r);
        let parked = {
            let r = Arc::clone(&r);
            thread::spawn(move || {
                // The pipe stays empty, so this parks until close().
                r.with_read_fd(|_| false)
            })
        };
        thread::sleep(Duration::from_millis(50));
        r.close().expect("close");
        let result = parked.join().expect("waiter thread");
        assert!(result.is_err());
    }
}
