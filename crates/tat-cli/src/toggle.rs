// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat enable` and `tat disable`

use anyhow::Context;
use tat_config::Config;

use crate::CliContext;

/// Persist the `enabled` flag, creating the config file if needed.
pub fn set_enabled(ctx: &CliContext, enabled: bool) -> anyhow::Result<()> {
    let path = ctx.config_file();
    let written = if path.exists() {
        Config::set_enabled_in_file(&path, enabled)
    } else {
        let config = Config {
            enabled,
            ..Config::default()
        };
        config.save(&path).map(|()| config)
    };
    written.with_context(|| format!("Failed to update {}", path.display()))?;

    println!("tat {}", if enabled { "enabled" } else { "disabled" });
    Ok(())
}
