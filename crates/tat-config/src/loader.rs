// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Layer merging on top of the `config` crate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use tracing::debug;

use crate::{Config, ConfigError, Result, paths};

/// Builds a [`Config`] from defaults, an optional TOML file and the environment
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    /// Explicit file paths must exist; the default location is optional
    file_required: bool,
    env: EnvSource,
}

#[derive(Debug, Clone, Default)]
enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
    Disabled,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.file_required = true;
        self
    }

    /// Use `vars` instead of the process environment.
    pub fn with_env(mut self, vars: HashMap<String, String>) -> Self {
        self.env = EnvSource::Fixed(vars);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = EnvSource::Disabled;
        self
    }

    pub fn load(self) -> Result<Config> {
        let config = self.load_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn load_unvalidated(self) -> Result<Config> {
        let file = self.file.clone().unwrap_or_else(paths::default_config_path);

        if self.file_required && !file.exists() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file {} not found", file.display()),
            )));
        }
        if file.exists() {
            check_toml(&file)?;
        }

        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(File::from(file.as_path()).format(FileFormat::Toml).required(false));

        match self.env {
            EnvSource::Process => builder = builder.add_source(env_source(None)),
            EnvSource::Fixed(vars) => builder = builder.add_source(env_source(Some(vars))),
            EnvSource::Disabled => {}
        }

        let config: Config = builder.build()?.try_deserialize()?;
        debug!(file = %file.display(), "Loaded configuration");
        Ok(config.expand_paths())
    }
}

/// `TAT_DATABASE_PATH`, `TAT_EXCLUDE_DIRS=/a,/b`, `TAT_INGEST__BATCH_SIZE`.
fn env_source(vars: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix("TAT")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("exclude_dirs")
        .with_list_parse_key("include_dirs")
        .source(vars)
}

/// Surface TOML syntax errors with the file path instead of a generic
/// `config` error.
fn check_toml(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str::<toml::Value>(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
