//! Layering rules
//!
//! The core crate is headless: it parses, multiplexes and reassembles, and
//! leaves HTTP serving and terminal output to the binaries.

use std::fs;

use architectural_enforcement::{assert_clean, scan, workspace_root};

#[test]
fn test_core_and_daemon_log_through_tracing() {
    let violations = scan(&["conductor/core/src", "conductor/daemon/src"], |code| {
        code.contains("println!") || code.contains("eprintln!") || code.contains("dbg!")
    });
    assert_clean("Report through tracing, not stdout/stderr", &violations);
}

#[test]
fn test_core_does_not_serve_http() {
    let violations = scan(&["conductor/core/src"], |code| code.contains("hyper::"));
    assert_clean("HTTP serving belongs in the daemon", &violations);
}

#[test]
fn test_core_manifest_has_no_binary_only_dependencies() {
    let manifest = fs::read_to_string(workspace_root().join("conductor/core/Cargo.toml")).unwrap();
    let dependencies = manifest
        .split("[dev-dependencies]")
        .next()
        .unwrap_or_default();

    for forbidden in ["hyper", "clap", "tracing-subscriber"] {
        assert!(
            !dependencies
                .lines()
                .any(|line| line.trim_start().starts_with(forbidden)),
            "roleplay-core must not depend on {forbidden}"
        );
    }
}

#[test]
fn test_client_talks_to_daemon_only() {
    let violations = scan(&["client/src"], |code| {
        code.contains("OllamaBackend") || code.contains("Tutor::new")
    });
    assert_clean("The client reaches the model through the daemon", &violations);
}
