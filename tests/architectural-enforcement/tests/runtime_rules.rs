//! Runtime rules for production code
//!
//! Core, daemon and client all run on tokio. A blocking sleep stalls every
//! stream on the worker, and a panic in a request task takes the turn down
//! without a terminal frame.

use architectural_enforcement::{assert_clean, scan};

const PRODUCTION: &[&str] = &["conductor/core/src", "conductor/daemon/src", "client/src"];

#[test]
fn test_no_blocking_sleep() {
    let violations = scan(PRODUCTION, |code| code.contains("thread::sleep"));
    assert_clean("Use tokio::time::sleep instead of std::thread::sleep", &violations);
}

#[test]
fn test_no_blocking_http() {
    let violations = scan(PRODUCTION, |code| code.contains("reqwest::blocking"));
    assert_clean("Use the async reqwest client", &violations);
}

#[test]
fn test_no_panicking_error_handling() {
    let violations = scan(PRODUCTION, |code| {
        code.contains(".unwrap()") || code.contains(".expect(")
    });
    assert_clean("Propagate errors with `?` instead of unwrap/expect", &violations);
}
