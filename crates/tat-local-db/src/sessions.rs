// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Session rows

use rusqlite::{Connection, OptionalExtension, Row, params};
use tat_domain_types::{
    Session, SessionStatus, Timestamp, from_epoch_ms, local_day_bounds, to_epoch_ms,
};

use crate::error::{DbError, Result};

const SESSION_COLUMNS: &str = "id, started_at, ended_at, cwd, shell, hostname, status, tags";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        started_at: from_epoch_ms(row.get(1)?),
        ended_at: row.get::<_, Option<i64>>(2)?.map(from_epoch_ms),
        cwd: row.get(3)?,
        shell: row.get(4)?,
        hostname: row.get(5)?,
        status: row.get(6)?,
        tags: row.get(7)?,
    })
}

pub fn insert_session(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, started_at, ended_at, cwd, shell, hostname, status, tags)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            session.id,
            to_epoch_ms(&session.started_at),
            session.ended_at.as_ref().map(to_epoch_ms),
            session.cwd,
            session.shell,
            session.hostname,
            session.status,
            session.tags,
        ],
    )?;
    Ok(())
}

pub fn get_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![id],
            session_from_row,
        )
        .optional()?)
}

/// Most recently started active session whose start lies in `[from, until)`.
pub fn find_active_session_between(
    conn: &Connection,
    from: &Timestamp,
    until: &Timestamp,
) -> Result<Option<Session>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status = 'active' AND started_at >= ?1 AND started_at < ?2
                 ORDER BY started_at DESC, rowid DESC LIMIT 1"
            ),
            params![to_epoch_ms(from), to_epoch_ms(until)],
            session_from_row,
        )
        .optional()?)
}

/// The active session started on the local calendar day of `now`.
pub fn find_active_session_for_day(conn: &Connection, now: &Timestamp) -> Result<Option<Session>> {
    let (day_start, day_end) = local_day_bounds(now);
    find_active_session_between(conn, &day_start, &day_end)
}

pub fn count_sessions(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?)
}

/// End an active session. Ended sessions never change status again.
pub fn update_session_status(
    conn: &Connection,
    id: &str,
    status: SessionStatus,
    ended_at: &Timestamp,
) -> Result<()> {
    let current = get_session(conn, id)?.map(|s| s.status);
    match current {
        Some(from) if from.can_transition_to(status) => {
            conn.execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2 WHERE id = ?3 AND status = 'active'",
                params![status, to_epoch_ms(ended_at), id],
            )?;
            Ok(())
        }
        Some(from) => Err(DbError::InvalidTransition {
            id: id.to_string(),
            from: from.to_string(),
            to: status.to_string(),
        }),
        None => Err(DbError::NotFound {
            kind: "session",
            id: id.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::test_support::sample_session;
    use tat_domain_types::zero_timestamp;

    #[tat_test_utils::logged_test]
    fn test_insert_and_get_session() {
        let db = Database::open_in_memory().unwrap();
        let session = sample_session("s1", from_epoch_ms(1_700_000_000_000));
        insert_session(db.connection(), &session).unwrap();
        assert_eq!(get_session(db.connection(), "s1").unwrap(), Some(session));
        assert_eq!(get_session(db.connection(), "nope").unwrap(), None);
    }

    #[tat_test_utils::logged_test]
    fn test_find_active_session_respects_window_and_status() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        insert_session(conn, &sample_session("yesterday", from_epoch_ms(1_000))).unwrap();
        insert_session(conn, &sample_session("today-a", from_epoch_ms(10_000))).unwrap();
        insert_session(conn, &sample_session("today-b", from_epoch_ms(12_000))).unwrap();
        update_session_status(conn, "today-b", SessionStatus::Completed, &from_epoch_ms(13_000)).unwrap();

        let found =
            find_active_session_between(conn, &from_epoch_ms(5_000), &from_epoch_ms(20_000))
                .unwrap()
                .unwrap();
        assert_eq!(found.id, "today-a");

        let none =
            find_active_session_between(conn, &from_epoch_ms(20_000), &from_epoch_ms(30_000))
                .unwrap();
        assert!(none.is_none());
    }

    #[tat_test_utils::logged_test]
    fn test_find_active_session_for_day() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let now = chrono::Utc::now();
        insert_session(conn, &sample_session("today", now)).unwrap();

        let found = find_active_session_for_day(conn, &now).unwrap().unwrap();
        assert_eq!(found.id, "today");
        let next_week = now + chrono::Duration::days(7);
        assert!(find_active_session_for_day(conn, &next_week).unwrap().is_none());
        assert_eq!(count_sessions(conn).unwrap(), 1);
    }

    #[tat_test_utils::logged_test]
    fn test_session_status_is_one_way() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        insert_session(conn, &sample_session("s1", zero_timestamp())).unwrap();

        update_session_status(conn, "s1", SessionStatus::Aborted, &from_epoch_ms(5)).unwrap();
        let ended = get_session(conn, "s1").unwrap().unwrap();
        assert_eq!(ended.status, SessionStatus::Aborted);
        assert_eq!(ended.ended_at, Some(from_epoch_ms(5)));

        let err = update_session_status(conn, "s1", SessionStatus::Completed, &from_epoch_ms(6));
        assert!(matches!(err, Err(DbError::InvalidTransition { .. })));
        assert_eq!(
            get_session(conn, "s1").unwrap().unwrap().status,
            SessionStatus::Aborted
        );
    }
}
