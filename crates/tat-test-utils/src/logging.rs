// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-test log files

use std::env;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TestLogError {
    #[error("IO error while writing test log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize value for test log: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid test name: {name}")]
    InvalidTestName { name: String },
}

/// Writes timestamped diagnostics for one test into its own file
pub struct TestLogger {
    log_path: PathBuf,
    writer: BufWriter<File>,
    test_name: String,
    start_time: DateTime<Utc>,
}

impl TestLogger {
    pub fn new(test_name: &str) -> Result<Self, TestLogError> {
        if test_name.is_empty() || test_name.len() > 200 {
            return Err(TestLogError::InvalidTestName {
                name: test_name.chars().take(64).collect(),
            });
        }

        let log_path = create_unique_test_log(test_name);
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(&log_path)?;

        let mut logger = Self {
            log_path,
            writer: BufWriter::new(file),
            test_name: test_name.to_string(),
            start_time: Utc::now(),
        };
        logger.write_header()?;
        Ok(logger)
    }

    pub fn log(&mut self, message: &str) -> Result<(), TestLogError> {
        writeln!(
            self.writer,
            "[{}] {}",
            Utc::now().format("%H:%M:%S%.3f"),
            message
        )?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn log_json<T: serde::Serialize>(
        &mut self,
        label: &str,
        data: &T,
    ) -> Result<(), TestLogError> {
        let json = serde_json::to_string_pretty(data)?;
        self.log(&format!("{}: {}", label, json))
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Second handle onto the log file, used to route `tracing` output.
    ///
    /// The handle shares the file offset so interleaved writes append.
    pub(crate) fn clone_file(&self) -> Result<File, TestLogError> {
        Ok(self.writer.get_ref().try_clone()?)
    }

    pub fn finish_success(mut self) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("Test passed in {:.3}s", elapsed))?;
        self.writer.flush()?;

        println!("✅ {} passed", self.test_name);
        Ok(self.log_path)
    }

    pub fn finish_failure(mut self, reason: &str) -> Result<PathBuf, TestLogError> {
        let elapsed = self.elapsed_secs();
        self.log(&format!("Test failed after {:.3}s: {}", elapsed, reason))?;
        self.writer.flush()?;

        match fs::metadata(&self.log_path) {
            Ok(meta) => println!(
                "❌ {} failed - Log: {} ({} bytes)",
                self.test_name,
                self.log_path.display(),
                meta.len()
            ),
            Err(_) => println!(
                "❌ {} failed - Log: {}",
                self.test_name,
                self.log_path.display()
            ),
        }
        Ok(self.log_path)
    }

    fn elapsed_secs(&self) -> f64 {
        Utc::now().signed_duration_since(self.start_time).num_milliseconds() as f64 / 1000.0
    }

    fn write_header(&mut self) -> Result<(), TestLogError> {
        writeln!(self.writer, "=== tat test log ===")?;
        writeln!(self.writer, "Test: {}", self.test_name)?;
        writeln!(
            self.writer,
            "Started: {}",
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(self.writer, "Process: {}", std::process::id())?;
        writeln!(
            self.writer,
            "Thread: {}",
            std::thread::current().name().unwrap_or("unnamed")
        )?;
        writeln!(self.writer, "===")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Unique log path `target/test-logs/<date>/<name>-<time>-<uuid>.log`.
///
/// Panics if the directory cannot be created; tests cannot run without it.
pub fn create_unique_test_log(test_name: &str) -> PathBuf {
    let now = Utc::now();
    let log_dir = find_workspace_root()
        .join("target")
        .join("test-logs")
        .join(now.format("%Y-%m-%d").to_string());

    if let Err(e) = fs::create_dir_all(&log_dir) {
        panic!(
            "Failed to create test log directory {}: {}",
            log_dir.display(),
            e
        );
    }

    log_dir.join(format!(
        "{}-{}-{}.log",
        sanitize_filename(test_name),
        now.format("%H-%M-%S"),
        Uuid::new_v4()
    ))
}

/// Nearest ancestor whose Cargo.toml declares `[workspace]`.
fn find_workspace_root() -> PathBuf {
    let start = env::var_os("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(env::temp_dir);

    start
        .ancestors()
        .find(|dir| {
            fs::read_to_string(dir.join("Cargo.toml"))
                .map(|content| content.contains("[workspace]"))
                .unwrap_or(false)
        })
        .map(Path::to_path_buf)
        .unwrap_or(start)
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[crate::logged_test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("flush_batch"), "flush_batch");
        assert_eq!(sanitize_filename("a b/c:d"), "a_b_c_d");
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(TestLogger::new("").is_err());
        assert!(TestLogger::new(&"x".repeat(201)).is_err());
    }

    #[test]
    fn test_unique_paths() {
        let first = create_unique_test_log("same_name");
        let second = create_unique_test_log("same_name");
        assert_ne!(first, second);
        assert!(first.starts_with(find_workspace_root().join("target").join("test-logs")));
    }

    #[test]
    fn test_failure_keeps_log_with_reason() {
        let mut logger = TestLogger::new("failure_reason_probe").unwrap();
        logger.log_json("payload", &serde_json::json!({"k": 1})).unwrap();
        let path = logger.finish_failure("boom").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\"k\": 1"));
        assert!(contents.contains("Test failed after"));
        assert!(contents.contains("boom"));
        fs::remove_file(path).unwrap();
    }
}
