// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat record`: the one-shot hook entry point
//!
//! Reads a single event line from stdin. Inside a mirrored session the line
//! is forwarded to the mirror's event socket; otherwise it goes through a
//! private ingestion pipeline that is drained before the process exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use tat_recorder::{EventClient, EventIntake, IngestConfig, Ingester, IntakeOutcome};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::CliContext;

#[derive(Args, Debug, Clone, Default)]
pub struct RecordArgs {}

impl RecordArgs {
    pub async fn run(self, ctx: &CliContext) -> anyhow::Result<()> {
        let config = ctx.load_config()?;
        if !config.enabled {
            debug!("Recording disabled");
            return Ok(());
        }

        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("Failed to read event from stdin")?;

        if let Some(client) = EventClient::from_env() {
            match client.send_line(&input).await {
                Ok(reply) if reply.ok => {
                    print_command_id(reply.command_id.as_deref());
                    return Ok(());
                }
                Ok(reply) => {
                    anyhow::bail!(
                        "Event rejected: {}",
                        reply.error.unwrap_or_else(|| "unknown error".into())
                    );
                }
                Err(e) => warn!(error = %e, "Event socket unavailable, writing directly"),
            }
        }

        let deadline = Duration::from_millis(config.ingest.shutdown_deadline_ms);
        let ingester = Ingester::open(&config.database_path, IngestConfig::from(&config.ingest))
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
        let intake = EventIntake::new(ingester.handle(), Arc::new(config));
        let outcome = intake.submit_line(&input);
        drop(intake);

        let report = ingester.shutdown(deadline).await;
        let outcome = outcome.context("Failed to record event")?;
        if report.timed_out || report.stats.failed_batches > 0 {
            anyhow::bail!("Event could not be written to the database");
        }

        if let IntakeOutcome::Queued { command_id } = outcome {
            print_command_id(command_id.as_deref());
        }
        Ok(())
    }
}

fn print_command_id(command_id: Option<&str>) {
    if let Some(id) = command_id {
        println!("{id}");
    }
}
