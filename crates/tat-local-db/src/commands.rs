// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command rows

use rusqlite::{Connection, OptionalExtension, Row, params};
use tat_domain_types::{Command, Timestamp, from_epoch_ms, to_epoch_ms};

use crate::error::Result;

const COMMAND_COLUMNS: &str =
    "id, session_id, line_no, cmd, exit_code, duration_ms, cwd, started_at, ended_at";

pub(crate) fn command_from_row(row: &Row<'_>) -> rusqlite::Result<Command> {
    Ok(Command {
        id: row.get(0)?,
        session_id: row.get(1)?,
        line_no: row.get(2)?,
        cmd: row.get(3)?,
        exit_code: row.get(4)?,
        duration_ms: row.get(5)?,
        cwd: row.get(6)?,
        started_at: from_epoch_ms(row.get(7)?),
        ended_at: row.get::<_, Option<i64>>(8)?.map(from_epoch_ms),
    })
}

/// Next 1-based line number within a session.
pub fn next_line_no(conn: &Connection, session_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(line_no), 0) + 1 FROM commands WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?)
}

/// Insert `command`, assigning its line number when it is not set (`<= 0`).
/// Returns the line number stored.
pub fn insert_command(conn: &Connection, command: &Command) -> Result<i64> {
    let line_no = if command.line_no > 0 {
        command.line_no
    } else {
        next_line_no(conn, &command.session_id)?
    };

    conn.execute(
        "INSERT INTO commands (id, session_id, line_no, cmd, exit_code, duration_ms, cwd, started_at, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            command.id,
            command.session_id,
            line_no,
            command.cmd,
            command.exit_code,
            command.duration_ms,
            command.cwd,
            to_epoch_ms(&command.started_at),
            command.ended_at.as_ref().map(to_epoch_ms),
        ],
    )?;
    Ok(line_no)
}

pub fn get_command(conn: &Connection, id: &str) -> Result<Option<Command>> {
    Ok(conn
        .query_row(
            &format!("SELECT {COMMAND_COLUMNS} FROM commands WHERE id = ?1"),
            params![id],
            command_from_row,
        )
        .optional()?)
}

/// Id of the command with the latest `started_at` in a session; ties go to
/// the most recently inserted row.
pub fn find_last_started_command(conn: &Connection, session_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM commands WHERE session_id = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT 1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn count_commands(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM commands", [], |row| row.get(0))?)
}

pub fn commands_for_session(conn: &Connection, session_id: &str) -> Result<Vec<Command>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMMAND_COLUMNS} FROM commands WHERE session_id = ?1 ORDER BY line_no"
    ))?;
    let rows = stmt.query_map(params![session_id], command_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Completion fields applied by an end event
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnd {
    pub exit_code: i32,
    pub ended_at: Timestamp,
    pub duration_ms: i64,
}

/// Apply completion fields to a command. Returns whether a row matched.
pub fn update_command_end(conn: &Connection, id: &str, end: &CommandEnd) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE commands SET exit_code = ?1, ended_at = ?2, duration_ms = ?3 WHERE id = ?4",
        params![end.exit_code, to_epoch_ms(&end.ended_at), end.duration_ms, id],
    )?;
    Ok(changed > 0)
}
