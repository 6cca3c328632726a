// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat ingest`: long-running hook entry point
//!
//! Reads event lines from stdin until EOF (or Ctrl-C) and answers each with
//! one JSON reply line on stdout, in the event socket's format.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tat_recorder::{EventIntake, IngestConfig, Ingester, Reply};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use crate::CliContext;

#[derive(Args, Debug, Clone, Default)]
pub struct IngestArgs {
    /// Do not write reply lines to stdout
    #[arg(long)]
    pub quiet: bool,
}

impl IngestArgs {
    pub async fn run(self, ctx: &CliContext) -> anyhow::Result<()> {
        let config = ctx.load_config()?;
        let deadline = Duration::from_millis(config.ingest.shutdown_deadline_ms);
        let ingester = Ingester::open(&config.database_path, IngestConfig::from(&config.ingest))
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
        let intake = EventIntake::new(ingester.handle(), Arc::new(config));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line.context("Failed to read stdin")?,
                _ = &mut ctrl_c => {
                    debug!("Interrupted");
                    None
                }
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }

            let reply = match intake.submit_line(&line) {
                Ok(outcome) => Reply::from_outcome(outcome),
                Err(e) => {
                    debug!(error = %e, "Rejected event line");
                    Reply::error(e.to_string())
                }
            };
            if !self.quiet {
                let mut encoded = serde_json::to_vec(&reply)?;
                encoded.push(b'\n');
                stdout.write_all(&encoded).await?;
                stdout.flush().await?;
            }
        }

        drop(intake);
        let report = ingester.shutdown(deadline).await;
        info!(stats = ?report.stats, timed_out = report.timed_out, "Ingest finished");
        Ok(())
    }
}
