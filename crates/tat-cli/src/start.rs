// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! `tat start`: run the login shell behind a capturing PTY mirror

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::Args;
use tat_domain_types::SessionStatus;
use tat_recorder::event::SessionEnd;
use tat_recorder::{
    ActiveCommand, EVENT_SOCKET_ENV, EventIntake, EventServer, IngestConfig, IngestEvent,
    Ingester, MirrorConfig, OutputCapture, PolledStdin, PtyMirror, PtyResizer, RawModeGuard,
    Redactor,
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::CliContext;

#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {}

impl StartArgs {
    pub async fn run(self, ctx: &CliContext) -> anyhow::Result<()> {
        if std::env::var_os(EVENT_SOCKET_ENV).is_some() {
            anyhow::bail!("Already inside a tat session");
        }

        let config = Arc::new(ctx.load_config()?);
        let redactor = Redactor::from_config(&config)?;
        let ingester = Ingester::open(&config.database_path, IngestConfig::from(&config.ingest))
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

        let active = ActiveCommand::default();
        let intake = EventIntake::new(ingester.handle(), Arc::clone(&config))
            .with_active_command(active.clone());
        let socket_path = tat_config::paths::event_socket_path(std::process::id());
        let server = EventServer::start(socket_path.clone(), Arc::new(intake))
            .await
            .with_context(|| format!("Failed to bind {}", socket_path.display()))?;

        let capture = OutputCapture::new(
            ingester.handle(),
            active,
            redactor,
            config.max_output_bytes_per_command(),
        );

        let mut mirror_config = MirrorConfig::login_shell();
        mirror_config
            .env_vars
            .push((EVENT_SOCKET_ENV.to_string(), socket_path.display().to_string()));
        let mirror = PtyMirror::spawn(mirror_config)?;
        let resize_task = tokio::spawn(forward_resizes(mirror.resizer()));

        info!(socket = %socket_path.display(), "Mirrored session started");
        let raw_mode = RawModeGuard::enable()?;
        let exit = tokio::task::spawn_blocking(move || {
            mirror.run(PolledStdin::default(), std::io::stdout(), capture)
        })
        .await;
        drop(raw_mode);

        resize_task.abort();
        server.shutdown().await;

        let exit = exit.context("PTY mirror task failed")?;
        let status = if exit.is_ok() {
            SessionStatus::Completed
        } else {
            SessionStatus::Aborted
        };
        let end = IngestEvent::SessionEnd(SessionEnd {
            status,
            at: Utc::now(),
        });
        if let Err(e) = ingester.handle().enqueue(end) {
            warn!(error = %e, "Failed to queue session end");
        }

        let report = ingester
            .shutdown(Duration::from_millis(config.ingest.shutdown_deadline_ms))
            .await;
        info!(stats = ?report.stats, timed_out = report.timed_out, "Mirrored session finished");

        let exit = exit?;
        if !exit.success {
            std::process::exit(i32::try_from(exit.exit_code).unwrap_or(1));
        }
        Ok(())
    }
}

async fn forward_resizes(resizer: PtyResizer) {
    let mut window_changes = match signal(SignalKind::window_change()) {
        Ok(signals) => signals,
        Err(e) => {
            debug!(error = %e, "Cannot watch for terminal resizes");
            return;
        }
    };
    while window_changes.recv().await.is_some() {
        match crossterm::terminal::size() {
            Ok((cols, rows)) => {
                if let Err(e) = resizer.resize(cols, rows) {
                    debug!(error = %e, "Failed to resize PTY");
                }
            }
            Err(e) => debug!(error = %e, "Failed to read terminal size"),
        }
    }
}
