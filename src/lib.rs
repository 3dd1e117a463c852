//! Kernel-accelerated unidirectional pipes.
//!
//! `splicepipe` moves stream data between file descriptors without routing
//! the bytes through userspace, using the Linux `splice(2)` and `tee(2)`
//! system calls. The programming surface is the [`Pipe`]: a buffered,
//! unidirectional channel whose transfers to and from descriptor-backed
//! streams happen inside the kernel, and which can mirror its read path
//! into another pipe or a userspace writer. [`transfer`] couples a source
//! and a destination through a transient pipe on a single flow of control.
//!
//! When acceleration is not possible (a stream without a descriptor, a
//! descriptor pair the kernel rejects with `EINVAL`, or a non-Linux build),
//! every operation degrades to a userspace copy with identical byte
//! semantics.
//!
//! # The two-descriptor problem
//!
//! Most I/O syscalls touch one descriptor; `splice(2)` and `tee(2)` touch
//! two. Driving them over non-blocking descriptors therefore needs care:
//! readiness can be awaited on either side, but a caller that parks while
//! holding a reference to the *other* descriptor forces any concurrent
//! close of that descriptor to wait behind an unrelated operation on a
//! different fd. The crate's internal driver alternates two rounds so that
//! the side being waited on is always the only side referenced; see
//! `driver` module docs for the full walk-through. Public operations never
//! expose this machinery; they simply park and resume through each
//! descriptor's readiness poller.
//!
//! # Example
//!
//! ```no_run
//! use splicepipe::Pipe;
//! use std::net::TcpStream;
//!
//! # fn main() -> std::io::Result<()> {
//! let mut upstream = TcpStream::connect("127.0.0.1:9000")?;
//! let pipe = Pipe::new()?;
//! // Kernel-splice the socket into the pipe, then hand the bytes out.
//! pipe.read_from(&mut upstream).map_err(std::io::Error::from)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[cfg(not(unix))]
compile_error!("splicepipe requires a Unix platform");

mod cap;
#[cfg(target_os = "linux")]
mod driver;
mod error;
mod fallback;
mod fd;
mod pipe;
mod sys;
mod transfer;

pub use cap::{SpliceRead, SpliceWrite};
pub use error::{Error, ErrorKind};
pub use pipe::Pipe;
pub use transfer::transfer;
