// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Substring search over recorded commands

use rusqlite::{Connection, params};
use tat_domain_types::{OutputStream, SearchHit, from_epoch_ms};

use crate::error::Result;
use crate::outputs::stream_text;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Matched literally against command text; `%` and `_` have no special meaning
    pub query: String,
    pub limit: usize,
    pub with_output: bool,
    /// Characters of each stream to include when `with_output` is set
    pub preview_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            limit: 50,
            with_output: false,
            preview_chars: 2000,
        }
    }
}

/// Newest-first commands whose text contains `options.query`.
pub fn search_commands(conn: &Connection, options: &SearchOptions) -> Result<Vec<SearchHit>> {
    let pattern = format!("%{}%", escape_like(&options.query));
    let limit = i64::try_from(options.limit).unwrap_or(i64::MAX);

    let mut stmt = conn.prepare(
        "SELECT id, cmd, cwd, exit_code, started_at FROM commands
         WHERE cmd LIKE ?1 ESCAPE '\\'
         ORDER BY started_at DESC, rowid DESC
         LIMIT ?2",
    )?;
    let mut hits = stmt
        .query_map(params![pattern, limit], |row| {
            Ok(SearchHit {
                command_id: row.get(0)?,
                cmd: row.get(1)?,
                cwd: row.get(2)?,
                exit_code: row.get(3)?,
                started_at: from_epoch_ms(row.get(4)?),
                stdout_preview: None,
                stderr_preview: None,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    if options.with_output {
        for hit in &mut hits {
            hit.stdout_preview =
                stream_text(conn, &hit.command_id, OutputStream::Stdout, options.preview_chars)?;
            hit.stderr_preview =
                stream_text(conn, &hit.command_id, OutputStream::Stderr, options.preview_chars)?;
        }
    }

    Ok(hits)
}

fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use crate::commands::insert_command;
    use crate::outputs::insert_output;
    use crate::sessions::insert_session;
    use crate::test_support::{sample_command, sample_session};

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        insert_session(conn, &sample_session("s1", from_epoch_ms(0))).unwrap();
        for (i, cmd) in ["git status", "cargo build", "git log", "echo 100%_done"].iter().enumerate() {
            let id = format!("c{}", i);
            insert_command(conn, &sample_command(&id, "s1", cmd, from_epoch_ms(i as i64 * 1000)))
                .unwrap();
        }
        db
    }

    fn search(db: &Database, query: &str, limit: usize) -> Vec<String> {
        let options = SearchOptions {
            query: query.into(),
            limit,
            ..Default::default()
        };
        search_commands(db.connection(), &options)
            .unwrap()
            .into_iter()
            .map(|hit| hit.cmd)
            .collect()
    }

    #[tat_test_utils::logged_test]
    fn test_newest_first_with_limit() {
        let db = seeded();
        assert_eq!(search(&db, "git", 50), ["git log", "git status"]);
        assert_eq!(search(&db, "git", 1), ["git log"]);
        assert_eq!(search(&db, "", 50).len(), 4);
        assert!(search(&db, "nothing-matches", 50).is_empty());
    }

    #[tat_test_utils::logged_test]
    fn test_wildcards_are_literal() {
        let db = seeded();
        assert_eq!(search(&db, "%_", 50), ["echo 100%_done"]);
        assert!(search(&db, "git_", 50).is_empty());
    }

    #[tat_test_utils::logged_test]
    fn test_with_output_attaches_previews() {
        let db = seeded();
        insert_output(db.connection(), "c1", OutputStream::Stdout, "Compiling tat", &from_epoch_ms(1100))
            .unwrap();

        let options = SearchOptions {
            query: "cargo".into(),
            with_output: true,
            preview_chars: 9,
            ..Default::default()
        };
        let hits = search_commands(db.connection(), &options).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stdout_preview.as_deref(), Some("Compiling"));
        assert_eq!(hits[0].stderr_preview, None);
        assert_eq!(hits[0].cwd, "/home/u");
    }
}
