//! Pipe read/write lifecycle verification.
//!
//! Covers the plain (un-teed) pipe surface:
//!
//! - round-trip: bytes written come back identical and in order
//! - end of stream after the write side closes
//! - zero-length reads and writes complete without syscalls
//! - kernel buffer capacity get/set bounds (Linux)
//! - close semantics: poisoning, double close, waking parked readers
//! - writes larger than the pipe capacity complete once drained

mod common;

use common::{init_test_logging, payload};
use splicepipe::Pipe;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn roundtrip_preserves_bytes() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    let written = pipe.write(b"hello world").expect("write");
    assert_eq!(written, 11);
    let mut buf = [0u8; 32];
    let n = pipe.read(&mut buf).expect("read");
    assert_eq!(&buf[..n], b"hello world");
}

#[test]
fn close_write_yields_eof_after_drain() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    let data = payload(10_000);
    pipe.write(&data).expect("write");
    pipe.close_write().expect("close write");

    let mut drained = Vec::new();
    let mut reader = &pipe;
    reader.read_to_end(&mut drained).expect("read to end");
    assert_eq!(drained, data);

    // Fully drained and the write side is gone: end of stream.
    let mut buf = [0u8; 8];
    assert_eq!(pipe.read(&mut buf).expect("read at eof"), 0);
}

#[test]
fn zero_length_operations_are_noops() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    assert_eq!(pipe.write(&[]).expect("empty write"), 0);
    let mut empty = [0u8; 0];
    assert_eq!(pipe.read(&mut empty).expect("empty read"), 0);
}

#[cfg(target_os = "linux")]
#[test]
fn buffer_size_follows_the_kernel() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    let initial = pipe.buffer_size().expect("get size");
    assert!(initial > 0);

    let stored = pipe.set_buffer_size(256 * 1024).expect("set size");
    assert!(stored >= 256 * 1024);
    assert_eq!(pipe.buffer_size().expect("get size"), stored);

    // The kernel rounds small requests up; it never goes below a page.
    let rounded = pipe.set_buffer_size(128).expect("set small size");
    assert!(rounded >= 128);
    assert_eq!(pipe.buffer_size().expect("get size"), rounded);
}

#[test]
fn closed_read_end_poisons_reads() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    pipe.write(b"pending").expect("write");
    pipe.close_read().expect("close read");

    let mut buf = [0u8; 8];
    assert!(pipe.read(&mut buf).is_err());
    // A second close of the same end reports the handle as already closed.
    assert!(pipe.close_read().is_err());
}

#[test]
fn close_reports_first_failure_only() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    pipe.close_write().expect("close write");
    // close() now hits an already-closed write end.
    assert!(pipe.close().is_err());
}

#[test]
fn close_wakes_a_parked_reader() {
    init_test_logging();
    let pipe = Arc::new(Pipe::new().expect("pipe"));
    let reader = {
        let pipe = Arc::clone(&pipe);
        thread::spawn(move || {
            let mut buf = [0u8; 8];
            // Nothing is ever written: this parks until close_read().
            pipe.read(&mut buf)
        })
    };
    thread::sleep(Duration::from_millis(50));
    pipe.close_read().expect("close read");
    assert!(reader.join().expect("reader thread").is_err());
}

#[test]
fn oversized_write_completes_once_drained() {
    init_test_logging();
    let pipe = Arc::new(Pipe::new().expect("pipe"));
    // Larger than any default pipe buffer, so the writer must park.
    let data = payload(1 << 20);
    let writer = {
        let pipe = Arc::clone(&pipe);
        let data = data.clone();
        thread::spawn(move || {
            let n = pipe.write(&data).expect("write");
            pipe.close_write().expect("close write");
            n
        })
    };

    let mut drained = Vec::new();
    let mut reader = &*pipe;
    reader.read_to_end(&mut drained).expect("read to end");
    assert_eq!(writer.join().expect("writer thread"), data.len());
    assert_eq!(drained, data);
}
