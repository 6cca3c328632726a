// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path discovery for the tat home directory

use std::path::{Path, PathBuf};

pub const TAT_HOME_ENV: &str = "TAT_HOME";

/// `$TAT_HOME`, or `~/.tat`.
pub fn tat_home() -> PathBuf {
    if let Some(home) = std::env::var_os(TAT_HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    home_dir().join(".tat")
}

pub fn default_config_path() -> PathBuf {
    tat_home().join("config.toml")
}

pub fn default_database_path() -> PathBuf {
    tat_home().join("tat.db")
}

/// Event socket for the mirrored session owned by process `pid`.
pub fn event_socket_path(pid: u32) -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(format!("tat-{pid}.sock"))
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(std::env::temp_dir)
}
