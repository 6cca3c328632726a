// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat status`

use clap::Args;
use serde::Serialize;
use tat_local_db::DbStats;

use crate::CliContext;

#[derive(Args, Debug, Clone, Default)]
pub struct StatusArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    enabled: bool,
    database_path: String,
    database_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sessions: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    commands: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outputs: Option<i64>,
}

impl StatusArgs {
    pub fn run(self, ctx: &CliContext) -> anyhow::Result<()> {
        let config = ctx.load_config()?;
        let exists = config.database_path.exists();
        let stats: Option<DbStats> = if exists {
            Some(crate::open_existing_database(&config.database_path)?.stats()?)
        } else {
            None
        };

        let report = StatusReport {
            enabled: config.enabled,
            database_path: config.database_path.display().to_string(),
            database_exists: exists,
            sessions: stats.map(|s| s.sessions),
            commands: stats.map(|s| s.commands),
            outputs: stats.map(|s| s.outputs),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!("Enabled: {}", report.enabled);
        println!("DB: {}", report.database_path);
        match stats {
            Some(stats) => {
                println!("Sessions: {}", stats.sessions);
                println!("Commands: {}", stats.commands);
                println!("Outputs: {}", stats.outputs);
            }
            None => println!("Database not initialized (run `tat init`)"),
        }
        Ok(())
    }
}
