// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test infrastructure for the tat workspace
//!
//! Every test decorated with [`logged_test`] or [`logged_tokio_test`] gets a
//! unique log file under `target/test-logs/<date>/`. `tracing` events emitted
//! on the test thread are written to the same file, so a failing pipeline
//! test leaves its flush and correlation logs behind. Passing tests print a
//! single line; failing tests print the log path and size.

extern crate self as tat_test_utils;

pub mod guard;
pub mod logging;

pub use guard::TestLoggerGuard;
pub use logging::{TestLogError, TestLogger, create_unique_test_log};
pub use tat_test_utils_macros::{logged_test, logged_tokio_test};

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Returns whether the condition was observed.
pub fn wait_until(timeout: std::time::Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
