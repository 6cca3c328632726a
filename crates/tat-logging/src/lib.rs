// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Logging setup for tat binaries
//!
//! Commands that run inside an interactive shell (`tat start`, the hook
//! entry points `tat record` and `tat ingest`) must never write to the
//! terminal, so they always log to a file. Reporting commands log to stderr
//! unless a file destination is requested. `RUST_LOG` overrides the level.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub use clap;
pub use tracing::Level;

const APP_DIR: &str = "tat";

/// Output format for log records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plaintext,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LogFormat::Plaintext => "plaintext",
            LogFormat::Json => "json",
        })
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plaintext" | "text" => Ok(LogFormat::Plaintext),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format: {}. Use 'plaintext' or 'json'",
                s
            )),
        }
    }
}

/// Log level as accepted on the command line
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CliLogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for Level {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Level::from(*self).as_str().to_lowercase())
    }
}

/// Logging flags shared by every tat binary, used with `#[command(flatten)]`
#[derive(Clone, Debug, Default, clap::Args, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliLoggingArgs {
    #[arg(long, value_enum, global = true, help = "Log verbosity level (default: info)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<CliLogLevel>,

    #[arg(long, value_enum, global = true, help = "Log output format (default: plaintext)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_format: Option<LogFormat>,

    #[arg(long, global = true, help = "Directory for log files (default: platform specific)")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    #[arg(long, global = true, help = "Log filename")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

impl CliLoggingArgs {
    /// Install the global subscriber.
    ///
    /// `terminal_attached` commands always log to a file; the rest log to
    /// stderr unless `--log-file` or `--log-dir` was given.
    pub fn init(&self, component: &str, terminal_attached: bool) -> anyhow::Result<()> {
        let level = self.log_level.unwrap_or_default().into();
        let format = self.log_format.unwrap_or_default();

        if self.wants_file(terminal_attached) {
            init_to_file(component, level, format, &self.resolve_log_path(component))
        } else {
            init(component, level, format)
        }
    }

    pub fn wants_file(&self, terminal_attached: bool) -> bool {
        terminal_attached || self.log_file.is_some() || self.log_dir.is_some()
    }

    /// Absolute `--log-file` wins; a relative one is placed under
    /// `--log-dir` when given; otherwise `<log-dir or standard>/<component>.log`.
    pub fn resolve_log_path(&self, component: &str) -> PathBuf {
        match (&self.log_file, &self.log_dir) {
            (Some(file), _) if Path::new(file).is_absolute() => PathBuf::from(file),
            (Some(file), Some(dir)) => Path::new(dir).join(file),
            (Some(file), None) => {
                let file = Path::new(file);
                if file.parent().map(|p| p.as_os_str().is_empty()).unwrap_or(true) {
                    standard_log_dir().join(file)
                } else {
                    file.to_path_buf()
                }
            }
            (None, Some(dir)) => Path::new(dir).join(format!("{}.log", component)),
            (None, None) => get_standard_log_path_for_component(component),
        }
    }
}

/// Platform log directory:
/// - macOS: ~/Library/Logs/tat
/// - Linux: ~/.local/share/tat
/// - Windows: %APPDATA%\tat
fn standard_log_dir() -> PathBuf {
    let home = || dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));

    #[cfg(target_os = "macos")]
    let base = home().join("Library").join("Logs");

    #[cfg(not(target_os = "macos"))]
    let base = dirs::data_dir().unwrap_or_else(home);

    base.join(APP_DIR)
}

pub fn get_standard_log_path_for_component(component: &str) -> PathBuf {
    standard_log_dir().join(format!("{}.log", component))
}

/// Log to stderr. Stdout is reserved for command results.
pub fn init(component: &str, default_level: Level, format: LogFormat) -> anyhow::Result<()> {
    init_with_writer(component, default_level, format, io::stderr)
}

pub fn init_to_file(
    component: &str,
    default_level: Level,
    format: LogFormat,
    log_path: &Path,
) -> anyhow::Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;
    init_with_writer(component, default_level, format, std::sync::Mutex::new(file))
}

pub fn init_with_writer<W>(
    component: &str,
    default_level: Level,
    format: LogFormat,
    writer: W,
) -> anyhow::Result<()>
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(component, default_level)));

    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    #[cfg(debug_assertions)]
    let layer = layer.with_file(true).with_line_number(true);

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry().with(filter).with(layer.json()).try_init()?
        }
        LogFormat::Plaintext => tracing_subscriber::registry().with(filter).with(layer).try_init()?,
    }
    Ok(())
}

/// Dependencies stay at warn; our crates follow the requested level.
fn default_directives(component: &str, level: Level) -> String {
    let target = component.replace('-', "_");
    format!(
        "warn,{target}={level},tat_recorder={level},tat_local_db={level},tat_config={level}",
        target = target,
        level = level
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_log_level_conversion() {
        assert_eq!(Level::from(CliLogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(CliLogLevel::Trace), Level::TRACE);
        assert_eq!(CliLogLevel::default(), CliLogLevel::Info);
        assert_eq!(CliLogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("plaintext".parse::<LogFormat>(), Ok(LogFormat::Plaintext));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_terminal_attached_commands_log_to_file() {
        let args = CliLoggingArgs::default();
        assert!(args.wants_file(true));
        assert!(!args.wants_file(false));

        let with_dir = CliLoggingArgs {
            log_dir: Some("/tmp/tat-logs".into()),
            ..Default::default()
        };
        assert!(with_dir.wants_file(false));
    }

    #[test]
    fn test_resolve_log_path() {
        let abs = CliLoggingArgs {
            log_file: Some("/var/log/x.log".into()),
            log_dir: Some("/ignored".into()),
            ..Default::default()
        };
        assert_eq!(abs.resolve_log_path("tat-cli"), PathBuf::from("/var/log/x.log"));

        let rel = CliLoggingArgs {
            log_file: Some("x.log".into()),
            log_dir: Some("/logs".into()),
            ..Default::default()
        };
        assert_eq!(rel.resolve_log_path("tat-cli"), PathBuf::from("/logs/x.log"));

        let dir_only = CliLoggingArgs {
            log_dir: Some("/logs".into()),
            ..Default::default()
        };
        assert_eq!(dir_only.resolve_log_path("tat-cli"), PathBuf::from("/logs/tat-cli.log"));

        let standard = CliLoggingArgs::default().resolve_log_path("tat-cli");
        assert!(standard.ends_with("tat/tat-cli.log"));
    }

    #[test]
    fn test_default_directives_cover_workspace_crates() {
        let directives = default_directives("tat-cli", Level::DEBUG);
        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("tat_cli=DEBUG"));
        assert!(directives.contains("tat_recorder=DEBUG"));
    }

    #[test]
    fn test_init_to_file_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tat.log");
        // A global subscriber may already be installed by another test.
        let _ = init_to_file("tat-cli", Level::INFO, LogFormat::Json, &path);
        assert!(path.exists());
    }
}
