//! Shared helpers for the e2e suite.

#![allow(dead_code)]

use std::sync::Once;

/// Installs a tracing subscriber once per test binary. Verbosity follows
/// `RUST_LOG`; output is captured per test.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Deterministic non-repeating payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
