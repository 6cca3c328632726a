// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Schema definition and migrations
//!
//! The schema version lives in `PRAGMA user_version`; `schema_version` keeps
//! an audit trail of when each migration ran. Timestamps are epoch
//! milliseconds.

use rusqlite::{Connection, params};
use tracing::info;

use crate::error::{DbError, Result};

pub const SCHEMA_VERSION: i32 = 2;

struct Migration {
    version: i32,
    description: &'static str,
    up_sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "sessions, commands and outputs",
        up_sql: r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL,
    applied_at INTEGER NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    started_at INTEGER NOT NULL,
    ended_at INTEGER,
    cwd TEXT NOT NULL DEFAULT '',
    shell TEXT NOT NULL DEFAULT '',
    hostname TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'completed', 'aborted')),
    tags TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_sessions_status_started ON sessions(status, started_at);

CREATE TABLE IF NOT EXISTS commands (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    line_no INTEGER NOT NULL,
    cmd TEXT NOT NULL,
    exit_code INTEGER,
    duration_ms INTEGER,
    cwd TEXT NOT NULL DEFAULT '',
    started_at INTEGER NOT NULL,
    ended_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_commands_session_started ON commands(session_id, started_at);
CREATE INDEX IF NOT EXISTS idx_commands_started ON commands(started_at);

CREATE TABLE IF NOT EXISTS outputs (
    id INTEGER PRIMARY KEY,
    command_id TEXT NOT NULL REFERENCES commands(id),
    stream TEXT NOT NULL CHECK (stream IN ('stdout', 'stderr')),
    chunk TEXT NOT NULL,
    at INTEGER NOT NULL
);
"#,
    },
    Migration {
        version: 2,
        description: "index outputs by command",
        up_sql: "CREATE INDEX IF NOT EXISTS idx_outputs_command ON outputs(command_id, at, id);",
    },
];

pub fn get_user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn set_user_version(conn: &Connection, version: i32) -> Result<()> {
    // PRAGMA does not take bound parameters
    conn.execute_batch(&format!("PRAGMA user_version = {version}"))?;
    Ok(())
}

/// Bring the schema up to [`SCHEMA_VERSION`]. Safe to call on every open.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let current = get_user_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(DbError::SchemaTooNew {
            found: current,
            supported: SCHEMA_VERSION,
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up_sql).map_err(|e| {
            DbError::Migration(format!(
                "v{} ({}): {}",
                migration.version, migration.description, e
            ))
        })?;
        set_user_version(&tx, migration.version)?;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![
                migration.version,
                chrono::Utc::now().timestamp_millis(),
                migration.description
            ],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied schema migration"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tat_test_utils::logged_test]
    fn test_fresh_database_reaches_current_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize_schema(&mut conn).unwrap();
        assert_eq!(get_user_version(&conn).unwrap(), SCHEMA_VERSION);

        let audit_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(audit_rows, MIGRATIONS.len() as i64);
    }

    #[tat_test_utils::logged_test]
    fn test_initialize_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize_schema(&mut conn).unwrap();
        initialize_schema(&mut conn).unwrap();

        let audit_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(audit_rows, MIGRATIONS.len() as i64);
    }

    #[tat_test_utils::logged_test]
    fn test_newer_schema_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        set_user_version(&conn, SCHEMA_VERSION + 1).unwrap();
        assert!(matches!(
            initialize_schema(&mut conn),
            Err(DbError::SchemaTooNew { .. })
        ));
    }
}
