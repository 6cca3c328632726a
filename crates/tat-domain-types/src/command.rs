// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Command and output types

use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoStaticStr};

use crate::time::Timestamp;

/// One command invocation inside a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub session_id: String,
    /// 1-based position within the session
    pub line_no: i64,
    pub cmd: String,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub cwd: String,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
}

impl Command {
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// Which stream an output chunk was read from
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OutputStream {
    #[default]
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl std::fmt::Display for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OutputStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stdout" => Ok(OutputStream::Stdout),
            "stderr" => Ok(OutputStream::Stderr),
            _ => Err(format!("Unknown output stream: {}", s)),
        }
    }
}

/// A captured chunk of command output. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: i64,
    pub command_id: String,
    pub stream: OutputStream,
    pub chunk: String,
    pub at: Timestamp,
}

/// A row returned by history search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub command_id: String,
    pub cmd: String,
    pub cwd: String,
    pub exit_code: Option<i32>,
    pub started_at: Timestamp,
    pub stdout_preview: Option<String>,
    pub stderr_preview: Option<String>,
}

#[cfg(feature = "rusqlite")]
mod sql {
    use super::OutputStream;
    use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for OutputStream {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(ToSqlOutput::from(self.as_str()))
        }
    }

    impl FromSql for OutputStream {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            let text = value.as_str()?;
            text.parse().map_err(|e: String| FromSqlError::Other(e.into()))
        }
    }
}
