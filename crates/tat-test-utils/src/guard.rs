// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RAII guard used by the `logged_test` macros

use std::path::PathBuf;
use std::sync::Arc;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

use crate::{TestLogError, TestLogger};

/// Owns a [`TestLogger`] for the duration of one test.
///
/// While alive, `tracing` events from the test thread go to the test log.
/// Dropping the guard without `finish_success` (including during a panic)
/// records a failure.
pub struct TestLoggerGuard {
    logger: Option<TestLogger>,
    log_path: PathBuf,
    completed: bool,
    _tracing: Option<DefaultGuard>,
}

impl TestLoggerGuard {
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        let logger = TestLogger::new(test_name)?;
        let log_path = logger.log_path().to_path_buf();
        let tracing = logger.clone_file().ok().map(install_thread_subscriber);
        Ok(Self {
            logger: Some(logger),
            log_path,
            completed: false,
            _tracing: tracing,
        })
    }

    pub fn logger(&mut self) -> &mut TestLogger {
        self.logger.as_mut().expect("TestLoggerGuard logger already finalized")
    }

    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        self.completed = true;
        match self.logger.take() {
            Some(logger) => logger.finish_success(),
            None => Ok(self.log_path.clone()),
        }
    }

    pub fn finish_failure<S: AsRef<str>>(mut self, reason: S) -> Result<PathBuf, TestLogError> {
        self.completed = true;
        match self.logger.take() {
            Some(logger) => logger.finish_failure(reason.as_ref()),
            None => Ok(self.log_path.clone()),
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }
}

fn install_thread_subscriber(file: std::fs::File) -> DefaultGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .with_target(true);
    tracing::subscriber::set_default(tracing_subscriber::registry().with(filter).with(layer))
}

impl Drop for TestLoggerGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        if let Some(logger) = self.logger.take() {
            let reason = if std::thread::panicking() {
                "test panicked"
            } else {
                "test exited without finishing"
            };

            if let Err(err) = logger.finish_failure(reason) {
                eprintln!(
                    "failed to finalize test log {}: {}",
                    self.log_path.display(),
                    err
                );
            }
        }
    }
}
