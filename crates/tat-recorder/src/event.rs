// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Hook event lines and the typed events the pipeline carries
//!
//! A shell hook emits one JSON object per line:
//!
//! ```json
//! {"event":"preexec","cmd":"make","cwd":"/src","ts":"2025-03-01T10:00:00Z"}
//! {"event":"postexec","cwd":"/src","ts":"2025-03-01T10:00:04Z","exit":0,"duration_ms":4000,"command_id":"..."}
//! ```
//!
//! `command_id` is optional on both sides. When a start event omits it a
//! fresh UUID is assigned here and handed back to the hook, which echoes it
//! on the matching end event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tat_domain_types::{OutputStream, SessionStatus, Timestamp, zero_timestamp};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Malformed event payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Empty event line")]
    Empty,
}

impl ParseError {
    /// Unknown event kinds are skipped by every front end rather than failing the call.
    pub fn is_ignorable(&self) -> bool {
        matches!(self, ParseError::UnknownEvent(_))
    }
}

#[derive(Debug, Deserialize)]
struct WireEvent {
    event: String,
    #[serde(default)]
    cmd: String,
    #[serde(default)]
    cwd: String,
    // Kept loose so a non-string timestamp degrades to the zero time
    #[serde(default)]
    ts: Option<serde_json::Value>,
    #[serde(default)]
    exit: Option<i32>,
    #[serde(default)]
    duration_ms: Option<i64>,
    #[serde(default)]
    command_id: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

/// Everything the flush loop knows how to apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestEvent {
    CommandStart(CommandStart),
    CommandEnd(CommandEnd),
    CommandOutput(CommandOutput),
    SessionEnd(SessionEnd),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStart {
    pub command_id: String,
    pub cmd: String,
    pub cwd: String,
    pub at: Timestamp,
    /// Opaque shell identifier, stored as the tags of a newly opened session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell_session: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnd {
    /// Absent for hooks that do not echo the id back; the correlator then
    /// picks the most recently started command
    pub command_id: Option<String>,
    pub cwd: String,
    pub exit_code: i32,
    /// Computed from the stored start time when the hook does not send it
    pub duration_ms: Option<i64>,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command_id: String,
    pub stream: OutputStream,
    pub chunk: String,
    pub at: Timestamp,
}

/// Emitted by the mirror when its shell exits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub status: SessionStatus,
    pub at: Timestamp,
}

impl IngestEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            IngestEvent::CommandStart(_) => "command_start",
            IngestEvent::CommandEnd(_) => "command_end",
            IngestEvent::CommandOutput(_) => "command_output",
            IngestEvent::SessionEnd(_) => "session_end",
        }
    }

    pub fn command_id(&self) -> Option<&str> {
        match self {
            IngestEvent::CommandStart(start) => Some(&start.command_id),
            IngestEvent::CommandEnd(end) => end.command_id.as_deref(),
            IngestEvent::CommandOutput(output) => Some(&output.command_id),
            IngestEvent::SessionEnd(_) => None,
        }
    }
}

/// Result of parsing one hook line
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub event: IngestEvent,
    /// The line had no usable `ts`; the event carries the zero timestamp
    pub defaulted_timestamp: bool,
}

pub fn new_command_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse one JSON event line from a shell hook.
pub fn parse_event_line(line: &str) -> Result<Normalized, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }

    let wire: WireEvent = serde_json::from_str(line)?;
    let (at, defaulted_timestamp) = match parse_timestamp(wire.ts.as_ref()) {
        Some(at) => (at, false),
        None => (zero_timestamp(), true),
    };
    let command_id = wire.command_id.filter(|id| !id.trim().is_empty());

    let event = match wire.event.as_str() {
        "preexec" => IngestEvent::CommandStart(CommandStart {
            command_id: command_id.unwrap_or_else(new_command_id),
            cmd: wire.cmd,
            cwd: wire.cwd,
            at,
            shell_session: wire.session.filter(|s| !s.is_empty()),
        }),
        "postexec" => IngestEvent::CommandEnd(CommandEnd {
            command_id,
            cwd: wire.cwd,
            exit_code: wire.exit.unwrap_or(0),
            duration_ms: wire.duration_ms,
            at,
        }),
        other => return Err(ParseError::UnknownEvent(other.to_string())),
    };

    if defaulted_timestamp {
        warn!(
            kind = event.kind(),
            ts = ?wire.ts,
            "Event timestamp missing or unparseable, using the zero timestamp"
        );
    }

    Ok(Normalized {
        event,
        defaulted_timestamp,
    })
}

fn parse_timestamp(raw: Option<&serde_json::Value>) -> Option<Timestamp> {
    let text = raw?.as_str()?;
    DateTime::parse_from_rfc3339(text.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
