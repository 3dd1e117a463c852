//! Tee fan-out verification.
//!
//! Covers the mirror configurations of the read path:
//!
//! - single kernel-tee target: bytes read from the source pipe appear in
//!   the target pipe, identical and in order
//! - a cascade of ten linked pipes drained concurrently, every link seeing
//!   the full stream
//! - userspace-writer mirror: the mirror write completes before the read
//!   reports, regardless of read chunking
//! - the tee target is set-once

mod common;

use common::{init_test_logging, payload};
use splicepipe::Pipe;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::thread;

#[test]
fn tee_read_mirrors_into_target() {
    init_test_logging();
    let source = Pipe::new().expect("source pipe");
    let target = Pipe::new().expect("target pipe");
    source.tee(&target).expect("tee");

    source.write(b"hello world").expect("write");
    source.close_write().expect("close write");

    // Drain the source to discard; every byte passes through the mirror.
    let mut discard = Vec::new();
    let mut reader = &source;
    let total = reader.read_to_end(&mut discard).expect("drain source");
    assert_eq!(total, 11);

    let mut mirrored = [0u8; 11];
    let mut target_reader = &target;
    target_reader.read_exact(&mut mirrored).expect("drain target");
    assert_eq!(&mirrored, b"hello world");
}

#[test]
fn tee_chain_of_ten_delivers_everywhere() {
    init_test_logging();
    let head = Arc::new(Pipe::new().expect("head pipe"));
    let links: Vec<Arc<Pipe>> = (0..10)
        .map(|_| Arc::new(Pipe::new().expect("link pipe")))
        .collect();

    head.tee(&links[0]).expect("tee head");
    for pair in links.windows(2) {
        pair[0].tee(&pair[1]).expect("tee link");
    }

    head.write(b"hello world").expect("write");
    head.close_write().expect("close write");

    // Each link only fills as its predecessor is read, so all drains run
    // concurrently and advance in lock-step.
    let drains: Vec<_> = links
        .iter()
        .map(|link| {
            let link = Arc::clone(link);
            thread::spawn(move || {
                let mut buf = [0u8; 11];
                let mut reader = &*link;
                reader.read_exact(&mut buf).expect("drain link");
                buf
            })
        })
        .collect();

    let mut discard = Vec::new();
    let mut reader = &*head;
    assert_eq!(reader.read_to_end(&mut discard).expect("drain head"), 11);

    for drain in drains {
        let seen = drain.join().expect("drain thread");
        assert_eq!(&seen, b"hello world");
    }
}

/// Shared sink for observing the userspace mirror from the test body.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("sink lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn writer_mirror_completes_before_each_read_reports() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    let sink = SharedSink::default();
    pipe.tee_writer(sink.clone()).expect("tee writer");

    let data = payload(1000);
    pipe.write(&data).expect("write");

    let mut seen = Vec::new();
    let mut chunk = [0u8; 7];
    while seen.len() < data.len() {
        let n = pipe.read(&mut chunk).expect("read");
        seen.extend_from_slice(&chunk[..n]);
        // No internal buffering: everything read so far is already
        // mirrored, in the same order.
        assert_eq!(sink.0.lock().expect("sink lock")[..seen.len()], seen[..]);
    }
    assert_eq!(seen, data);
}

#[test]
fn mirror_ordering_matches_source_under_odd_chunking() {
    init_test_logging();
    let source = Pipe::new().expect("source pipe");
    let target = Pipe::new().expect("target pipe");
    source.tee(&target).expect("tee");

    let data = payload(4096);
    source.write(&data).expect("write");
    source.close_write().expect("close write");

    let mut seen = Vec::new();
    let mut mirrored = Vec::new();
    let mut chunk = [0u8; 13];
    loop {
        let n = source.read(&mut chunk).expect("read source");
        if n == 0 {
            break;
        }
        seen.extend_from_slice(&chunk[..n]);
        // The mirror never lags the consuming read: the duplicated count
        // is available in the target right away.
        let mut echo = vec![0u8; n];
        let mut target_reader = &target;
        target_reader.read_exact(&mut echo).expect("read target");
        mirrored.extend_from_slice(&echo);
    }
    assert_eq!(seen, data);
    assert_eq!(mirrored, data);
}

#[test]
fn tee_target_is_set_once() {
    init_test_logging();
    let pipe = Pipe::new().expect("pipe");
    let first = Pipe::new().expect("first target");
    let second = Pipe::new().expect("second target");
    pipe.tee(&first).expect("first tee");
    let err = pipe.tee(&second).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    assert!(pipe.tee_writer(Vec::new()).is_err());
}
