// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! SQLite storage for tat
//!
//! The database runs in WAL mode with `synchronous = NORMAL` and foreign
//! keys enforced. Row-level operations in [`sessions`], [`commands`],
//! [`outputs`] and [`search`] take a plain `&Connection`, so they run the same
//! way against a connection or inside a `Transaction` held by the flush loop.

pub mod commands;
pub mod error;
pub mod outputs;
pub mod schema;
pub mod search;
pub mod sessions;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, Transaction};
use tracing::debug;

pub use error::{DbError, Result};
pub use search::SearchOptions;

/// How long a connection waits on a lock held by another process.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// An open tat database with the schema applied
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self::from_connection(conn, Some(path.to_path_buf()))?;
        debug!(path = %path.display(), "Opened database");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        configure_connection(&conn)?;
        schema::initialize_schema(&mut conn)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Row counts for status reporting.
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            sessions: sessions::count_sessions(&self.conn)?,
            commands: commands::count_commands(&self.conn)?,
            outputs: outputs::count_outputs(&self.conn)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DbStats {
    pub sessions: i64,
    pub commands: i64,
    pub outputs: i64,
}

/// Per-connection settings. `journal_mode` persists in the file; the others
/// must be set on every connection.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    debug!(journal_mode = %mode, "Configured SQLite connection");
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use tat_domain_types::{Command, Session, SessionStatus, Timestamp};

    pub fn sample_session(id: &str, started_at: Timestamp) -> Session {
        Session {
            id: id.to_string(),
            started_at,
            ended_at: None,
            cwd: "/home/u".into(),
            shell: "/bin/zsh".into(),
            hostname: "host".into(),
            status: SessionStatus::Active,
            tags: String::new(),
        }
    }

    pub fn sample_command(id: &str, session_id: &str, cmd: &str, started_at: Timestamp) -> Command {
        Command {
            id: id.to_string(),
            session_id: session_id.to_string(),
            line_no: 0,
            cmd: cmd.to_string(),
            exit_code: None,
            duration_ms: None,
            cwd: "/home/u".into(),
            started_at,
            ended_at: None,
        }
    }
}
