// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat init`

use anyhow::Context;
use clap::Args;
use tat_config::Config;
use tat_local_db::{Database, schema};
use tracing::info;

use crate::CliContext;

#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    /// Rewrite the configuration file with defaults even if it exists
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, ctx: &CliContext) -> anyhow::Result<()> {
        let config_file = ctx.config_file();
        if self.force || !config_file.exists() {
            Config::default()
                .save(&config_file)
                .with_context(|| format!("Failed to write {}", config_file.display()))?;
            println!("Wrote config: {}", config_file.display());
        } else {
            println!("Config exists: {}", config_file.display());
        }

        let config = ctx.load_config()?;
        let db = Database::open(&config.database_path).with_context(|| {
            format!("Failed to open database {}", config.database_path.display())
        })?;
        let version = schema::get_user_version(db.connection())?;
        info!(path = %config.database_path.display(), version, "Database initialized");
        println!("Database ready: {} (schema v{})", config.database_path.display(), version);
        Ok(())
    }
}
