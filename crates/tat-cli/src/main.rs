// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use anyhow::Result;
use tat_cli::{Cli, Parser};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Hook and mirror commands share the user's terminal; keep logs off it
    cli.logging.init("tat-cli", cli.command.is_terminal_attached())?;

    cli.run().await
}
