//! Error types for accelerated pipe transfers.
//!
//! Errors are explicit and typed. The propagation policy mirrors the
//! syscall contract:
//!
//! - `EAGAIN` is never user-visible; it only schedules a readiness wait.
//! - `EINVAL` on the opening transfer attempt is recovered internally by
//!   switching to the userspace copy path.
//! - Every other errno surfaces as [`ErrorKind::TransferSyscall`], together
//!   with a best-effort count of the bytes moved before the failure.

use std::error;
use std::fmt;
use std::io;

/// The kind of transfer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A descriptor handle was closed while the operation was in flight.
    ClosedDescriptor,
    /// `splice(2)`, `tee(2)`, or the readiness poller failed with a fatal
    /// errno.
    TransferSyscall,
    /// Pipe creation or descriptor wrapping failed before any byte moved.
    Setup,
    /// The reader side of a userspace fallback copy failed.
    Reader,
    /// The writer side of a userspace fallback copy failed.
    Writer,
}

impl ErrorKind {
    /// Returns a static description of the error kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ClosedDescriptor => "descriptor handle closed",
            Self::TransferSyscall => "transfer syscall failed",
            Self::Setup => "setup failed",
            Self::Reader => "fallback reader failed",
            Self::Writer => "fallback writer failed",
        }
    }

    /// Whether the descriptor involved is unusable from now on.
    ///
    /// Retrying an operation after a dead-descriptor error can never
    /// succeed; a syscall or fallback error may be transient depending on
    /// the underlying errno.
    #[must_use]
    pub const fn is_descriptor_dead(self) -> bool {
        matches!(self, Self::ClosedDescriptor)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by [`read_from`](crate::Pipe::read_from),
/// [`write_to`](crate::Pipe::write_to), and [`transfer`](crate::transfer).
///
/// Carries the number of bytes successfully moved before the failure, so a
/// caller can account for partial transfers.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    op: Option<&'static str>,
    bytes: u64,
    source: Option<io::Error>,
}

impl Error {
    pub(crate) fn closed() -> Self {
        Self {
            kind: ErrorKind::ClosedDescriptor,
            op: None,
            bytes: 0,
            source: None,
        }
    }

    pub(crate) fn syscall(op: &'static str, source: io::Error) -> Self {
        Self {
            kind: ErrorKind::TransferSyscall,
            op: Some(op),
            bytes: 0,
            source: Some(source),
        }
    }

    pub(crate) fn setup(source: io::Error) -> Self {
        Self {
            kind: ErrorKind::Setup,
            op: None,
            bytes: 0,
            source: Some(source),
        }
    }

    pub(crate) fn reader(source: io::Error) -> Self {
        Self {
            kind: ErrorKind::Reader,
            op: None,
            bytes: 0,
            source: Some(source),
        }
    }

    pub(crate) fn writer(source: io::Error) -> Self {
        Self {
            kind: ErrorKind::Writer,
            op: None,
            bytes: 0,
            source: Some(source),
        }
    }

    /// Adds `base` bytes that were already moved before this error's own
    /// count. Construction sites start at zero, so accumulation composes.
    #[must_use]
    pub(crate) fn with_bytes(mut self, base: u64) -> Self {
        self.bytes += base;
        self
    }

    /// Returns the kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the number of bytes moved before the operation failed.
    #[must_use]
    pub const fn bytes_transferred(&self) -> u64 {
        self.bytes
    }

    /// Returns the raw OS error code of the underlying failure, if any.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        self.source.as_ref().and_then(io::Error::raw_os_error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.op, &self.source) {
            (Some(op), Some(source)) => write!(f, "{op}: {source}"),
            (None, Some(source)) => write!(f, "{}: {source}", self.kind),
            _ => f.write_str(self.kind.as_str()),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn error::Error + 'static))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        // Preserve the underlying errno classification where one exists.
        let kind = match &err.source {
            Some(source) => source.kind(),
            None => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
