// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Maps normalized events onto session and command rows
//!
//! The correlator runs inside the flush transaction, so an end event sees a
//! start row inserted earlier in the same batch.

use rusqlite::Connection;
use tat_domain_types::{Command, Session, SessionStatus, Timestamp, elapsed_ms, is_zero_timestamp};
use tat_local_db::commands::{self, CommandEnd as StoredEnd};
use tat_local_db::{Result, outputs, sessions};
use tracing::debug;

use crate::event::{CommandEnd, CommandOutput, CommandStart, IngestEvent, SessionEnd};

/// Host facts recorded on newly opened sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEnv {
    pub shell: String,
    pub hostname: String,
}

impl SessionEnv {
    pub fn detect() -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_default();
        Self {
            shell: std::env::var("SHELL").unwrap_or_default(),
            hostname,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Applied,
    Miss(CorrelationMiss),
}

/// An event that could not be matched to a row. Counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationMiss {
    UnknownCommand(String),
    DuplicateStart(String),
    NoActiveSession,
    NoStartedCommand,
}

impl std::fmt::Display for CorrelationMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CorrelationMiss::UnknownCommand(id) => write!(f, "no command with id {id}"),
            CorrelationMiss::DuplicateStart(id) => write!(f, "command {id} already started"),
            CorrelationMiss::NoActiveSession => f.write_str("no active session today"),
            CorrelationMiss::NoStartedCommand => f.write_str("no started command in session"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Correlator {
    env: SessionEnv,
}

impl Correlator {
    pub fn new(env: SessionEnv) -> Self {
        Self { env }
    }

    /// Apply one event. `now` decides which calendar day's session is used.
    pub fn apply(&self, conn: &Connection, event: &IngestEvent, now: &Timestamp) -> Result<Correlation> {
        match event {
            IngestEvent::CommandStart(start) => self.start(conn, start, now),
            IngestEvent::CommandEnd(end) => self.end(conn, end, now),
            IngestEvent::CommandOutput(output) => self.output(conn, output),
            IngestEvent::SessionEnd(end) => self.end_session(conn, end, now),
        }
    }

    /// Today's active session, opening one when none exists.
    pub fn resolve_session(
        &self,
        conn: &Connection,
        cwd: &str,
        tags: Option<&str>,
        now: &Timestamp,
    ) -> Result<String> {
        if let Some(session) = sessions::find_active_session_for_day(conn, now)? {
            return Ok(session.id);
        }

        let session = Session {
            id: format!("sess-{}", uuid::Uuid::new_v4()),
            started_at: *now,
            ended_at: None,
            cwd: cwd.to_string(),
            shell: self.env.shell.clone(),
            hostname: self.env.hostname.clone(),
            status: SessionStatus::Active,
            tags: tags.unwrap_or_default().to_string(),
        };
        sessions::insert_session(conn, &session)?;
        debug!(session_id = %session.id, cwd, "Opened session");
        Ok(session.id)
    }

    fn start(&self, conn: &Connection, start: &CommandStart, now: &Timestamp) -> Result<Correlation> {
        if commands::get_command(conn, &start.command_id)?.is_some() {
            return Ok(Correlation::Miss(CorrelationMiss::DuplicateStart(
                start.command_id.clone(),
            )));
        }

        let session_id =
            self.resolve_session(conn, &start.cwd, start.shell_session.as_deref(), now)?;
        let command = Command {
            id: start.command_id.clone(),
            session_id,
            line_no: 0,
            cmd: start.cmd.clone(),
            exit_code: None,
            duration_ms: None,
            cwd: start.cwd.clone(),
            started_at: start.at,
            ended_at: None,
        };
        let line_no = commands::insert_command(conn, &command)?;
        debug!(command_id = %command.id, line_no, "Recorded command start");
        Ok(Correlation::Applied)
    }

    fn end(&self, conn: &Connection, end: &CommandEnd, now: &Timestamp) -> Result<Correlation> {
        let command_id = match &end.command_id {
            Some(id) => id.clone(),
            None => {
                let Some(session) = sessions::find_active_session_for_day(conn, now)? else {
                    return Ok(Correlation::Miss(CorrelationMiss::NoActiveSession));
                };
                match commands::find_last_started_command(conn, &session.id)? {
                    Some(id) => id,
                    None => return Ok(Correlation::Miss(CorrelationMiss::NoStartedCommand)),
                }
            }
        };

        let Some(command) = commands::get_command(conn, &command_id)? else {
            return Ok(Correlation::Miss(CorrelationMiss::UnknownCommand(command_id)));
        };

        let duration_ms = end.duration_ms.unwrap_or_else(|| {
            if is_zero_timestamp(&end.at) {
                0
            } else {
                elapsed_ms(&command.started_at, &end.at)
            }
        });
        commands::update_command_end(
            conn,
            &command.id,
            &StoredEnd {
                exit_code: end.exit_code,
                ended_at: end.at,
                duration_ms,
            },
        )?;
        debug!(command_id = %command.id, exit_code = end.exit_code, duration_ms, "Recorded command end");
        Ok(Correlation::Applied)
    }

    fn output(&self, conn: &Connection, output: &CommandOutput) -> Result<Correlation> {
        if commands::get_command(conn, &output.command_id)?.is_none() {
            return Ok(Correlation::Miss(CorrelationMiss::UnknownCommand(
                output.command_id.clone(),
            )));
        }
        outputs::insert_output(conn, &output.command_id, output.stream, &output.chunk, &output.at)?;
        Ok(Correlation::Applied)
    }

    fn end_session(&self, conn: &Connection, end: &SessionEnd, now: &Timestamp) -> Result<Correlation> {
        let day_of = if is_zero_timestamp(&end.at) { now } else { &end.at };
        let Some(session) = sessions::find_active_session_for_day(conn, day_of)? else {
            return Ok(Correlation::Miss(CorrelationMiss::NoActiveSession));
        };
        sessions::update_session_status(conn, &session.id, end.status, &end.at)?;
        debug!(session_id = %session.id, status = %end.status, "Ended session");
        Ok(Correlation::Applied)
    }
}
