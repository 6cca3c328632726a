// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Output chunk rows. Chunks are append-only.

use rusqlite::{Connection, params};
use tat_domain_types::{Output, OutputStream, Timestamp, from_epoch_ms, to_epoch_ms};

use crate::error::Result;

/// Append a chunk; returns its row id.
pub fn insert_output(
    conn: &Connection,
    command_id: &str,
    stream: OutputStream,
    chunk: &str,
    at: &Timestamp,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO outputs (command_id, stream, chunk, at) VALUES (?1, ?2, ?3, ?4)",
        params![command_id, stream, chunk, to_epoch_ms(at)],
    )?;
    Ok(conn.last_insert_rowid())
}

/// All chunks of a command in capture order.
pub fn outputs_for_command(conn: &Connection, command_id: &str) -> Result<Vec<Output>> {
    let mut stmt = conn.prepare(
        "SELECT id, command_id, stream, chunk, at FROM outputs
         WHERE command_id = ?1 ORDER BY at, id",
    )?;
    let rows = stmt.query_map(params![command_id], |row| {
        Ok(Output {
            id: row.get(0)?,
            command_id: row.get(1)?,
            stream: row.get(2)?,
            chunk: row.get(3)?,
            at: from_epoch_ms(row.get(4)?),
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn count_outputs(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM outputs", [], |row| row.get(0))?)
}

/// Concatenate one stream of a command, keeping at most `max_chars` characters.
pub fn stream_text(
    conn: &Connection,
    command_id: &str,
    stream: OutputStream,
    max_chars: usize,
) -> Result<Option<String>> {
    let mut text = String::new();
    let mut seen = false;
    for output in outputs_for_command(conn, command_id)? {
        if output.stream != stream {
            continue;
        }
        seen = true;
        text.push_str(&output.chunk);
        if text.chars().count() >= max_chars {
            break;
        }
    }
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    Ok(seen.then_some(text))
}
