// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for the terminal activity tracker
//!
//! Layers, lowest precedence first: built-in defaults, the TOML file
//! (`~/.tat/config.toml` unless overridden), then `TAT_*` environment
//! variables. Nested keys use a double underscore, e.g.
//! `TAT_INGEST__BATCH_SIZE=500`.

pub mod error;
pub mod loader;
pub mod paths;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;

pub const DEFAULT_REDACT_PATTERNS: &[&str] = &[
    r"(?i)password=\S+",
    r"(?i)authorization:\s*bearer\s+[A-Za-z0-9\-_\.]+",
    r"(?i)aws_secret_access_key=[A-Za-z0-9/+=]+",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch checked by the hook entry points
    pub enabled: bool,
    pub database_path: PathBuf,
    /// Commands run under any of these directories are not recorded
    pub exclude_dirs: Vec<PathBuf>,
    /// When non-empty, only commands run under these directories are recorded
    pub include_dirs: Vec<PathBuf>,
    pub max_output_kb_per_command: u64,
    pub redact_patterns: Vec<String>,
    pub ingest: IngestSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: paths::default_database_path(),
            exclude_dirs: vec![PathBuf::from("~/.ssh")],
            include_dirs: Vec::new(),
            max_output_kb_per_command: 1024,
            redact_patterns: DEFAULT_REDACT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            ingest: IngestSettings::default(),
        }
    }
}

/// Tuning for the ingestion queue and flush loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub queue_capacity: usize,
    pub flush_interval_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub shutdown_deadline_ms: u64,
    /// Batches that still fail after all retries are appended here as JSON lines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_journal: Option<PathBuf>,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 5000,
            flush_interval_ms: 200,
            batch_size: 1000,
            max_retries: 3,
            retry_backoff_ms: 50,
            shutdown_deadline_ms: 2000,
            failure_journal: None,
        }
    }
}

impl Config {
    /// Load from the default file location and the process environment.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = explicit_path {
            loader = loader.with_file(path);
        }
        loader.load()
    }

    /// Whether a command run in `cwd` should be recorded.
    pub fn should_record(&self, cwd: &Path) -> bool {
        if self.exclude_dirs.iter().any(|dir| cwd.starts_with(dir)) {
            return false;
        }
        self.include_dirs.is_empty() || self.include_dirs.iter().any(|dir| cwd.starts_with(dir))
    }

    pub fn max_output_bytes_per_command(&self) -> usize {
        usize::try_from(self.max_output_kb_per_command.saturating_mul(1024)).unwrap_or(usize::MAX)
    }

    /// Redaction patterns compiled in configuration order.
    pub fn compiled_redactions(&self) -> Result<Vec<regex::Regex>> {
        self.redact_patterns
            .iter()
            .map(|pattern| {
                regex::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        self.compiled_redactions()?;
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.queue_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ingest.batch_size",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Write this configuration as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Flip `enabled` in the file at `path`, leaving other file values intact.
    ///
    /// Environment overrides are deliberately not baked into the file.
    pub fn set_enabled_in_file(path: &Path, enabled: bool) -> Result<Self> {
        let mut config = ConfigLoader::new().with_file(path).without_env().load_unvalidated()?;
        config.enabled = enabled;
        config.save(path)?;
        Ok(config)
    }

    fn expand_paths(mut self) -> Self {
        self.database_path = paths::expand_tilde(&self.database_path);
        self.exclude_dirs = self.exclude_dirs.iter().map(|p| paths::expand_tilde(p)).collect();
        self.include_dirs = self.include_dirs.iter().map(|p| paths::expand_tilde(p)).collect();
        self.ingest.failure_journal =
            self.ingest.failure_journal.as_deref().map(paths::expand_tilde);
        self
    }
}
