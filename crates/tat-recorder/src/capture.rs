// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Turns mirrored PTY bytes into `CommandOutput` events
//!
//! Capture only happens while a command is active. Output is decoded and
//! collected into whole lines, so a secret split across two PTY reads is
//! still matched. The lines are scrubbed by the redaction patterns, then cut
//! so the command's captured total stays within the per-command budget.

use std::borrow::Cow;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use regex::Regex;
use tat_config::Config;
use tat_domain_types::OutputStream;
use tracing::{debug, trace};

use crate::event::{CommandOutput, IngestEvent};
use crate::ingest::IngestHandle;
use crate::pty::OutputTap;

pub const REDACTED: &str = "[REDACTED]";

/// Longest unterminated line held back waiting for its newline
pub const MAX_HELD_LINE_BYTES: usize = 1024;

#[derive(Debug, Clone, Default)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn from_config(config: &Config) -> tat_config::Result<Self> {
        Ok(Self::new(config.compiled_redactions()?))
    }

    /// Replace every match of every pattern with [`REDACTED`].
    pub fn redact<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let mut out = Cow::Borrowed(text);
        for pattern in &self.patterns {
            let replaced = match pattern.replace_all(&out, REDACTED) {
                Cow::Owned(replaced) => replaced,
                Cow::Borrowed(_) => continue,
            };
            out = Cow::Owned(replaced);
        }
        out
    }
}

/// The command currently running in the mirrored shell, shared between the
/// event socket (which sets it) and the output tap (which reads it).
#[derive(Debug, Clone, Default)]
pub struct ActiveCommand {
    inner: Arc<Mutex<Option<String>>>,
}

impl ActiveCommand {
    pub fn begin(&self, command_id: &str) {
        *self.lock() = Some(command_id.to_string());
    }

    /// Clear the active command. With an id, only that command is cleared.
    pub fn finish(&self, command_id: Option<&str>) {
        let mut guard = self.lock();
        let matches = match (guard.as_deref(), command_id) {
            (Some(current), Some(id)) => current == id,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if matches {
            *guard = None;
        }
    }

    pub fn current(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn floor_char_boundary(text: &str, max: usize) -> usize {
    let mut idx = max.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Capture state of the command output currently belongs to
#[derive(Debug)]
struct Capturing {
    command_id: String,
    captured_bytes: usize,
    partial_line: String,
}

/// Output tap feeding the ingestion queue
///
/// A trailing partial line is queued once its newline arrives, once it grows
/// past [`MAX_HELD_LINE_BYTES`], when the active command changes, or when the
/// capture is dropped.
pub struct OutputCapture {
    handle: IngestHandle,
    active: ActiveCommand,
    redactor: Redactor,
    max_bytes_per_command: usize,
    // Trailing bytes of an incomplete UTF-8 sequence from the previous read
    carry: Vec<u8>,
    capturing: Option<Capturing>,
}

impl OutputCapture {
    pub fn new(
        handle: IngestHandle,
        active: ActiveCommand,
        redactor: Redactor,
        max_bytes_per_command: usize,
    ) -> Self {
        Self {
            handle,
            active,
            redactor,
            max_bytes_per_command,
            carry: Vec::new(),
            capturing: None,
        }
    }

    /// Capture one chunk read from the PTY. Never blocks.
    pub fn capture(&mut self, bytes: &[u8]) {
        let current = self.active.current();
        if self.capturing.as_ref().map(|c| &c.command_id) != current.as_ref() {
            self.flush_partial_line();
            self.carry.clear();
            self.capturing = current.map(|command_id| Capturing {
                command_id,
                captured_bytes: 0,
                partial_line: String::new(),
            });
        }
        if self.capturing.is_none() {
            return;
        }

        let text = self.decode(bytes);
        let Some(capturing) = self.capturing.as_mut() else {
            return;
        };
        capturing.partial_line.push_str(&text);

        let held = &capturing.partial_line;
        let mut cut = held.rfind('\n').map_or(0, |idx| idx + 1);
        if held.len() - cut > MAX_HELD_LINE_BYTES {
            cut = held.len();
        }
        if cut == 0 {
            return;
        }
        let rest = capturing.partial_line.split_off(cut);
        let lines = std::mem::replace(&mut capturing.partial_line, rest);
        self.emit(&lines);
    }

    fn flush_partial_line(&mut self) {
        let lines = match self.capturing.as_mut() {
            Some(capturing) if !capturing.partial_line.is_empty() => {
                std::mem::take(&mut capturing.partial_line)
            }
            _ => return,
        };
        self.emit(&lines);
    }

    fn emit(&mut self, text: &str) {
        let Some(capturing) = self.capturing.as_mut() else {
            return;
        };
        let redacted = self.redactor.redact(text);
        let remaining = self.max_bytes_per_command.saturating_sub(capturing.captured_bytes);
        let cut = floor_char_boundary(&redacted, remaining);
        if cut == 0 {
            trace!(command_id = %capturing.command_id, "Output budget exhausted");
            return;
        }
        capturing.captured_bytes += cut;

        let event = IngestEvent::CommandOutput(CommandOutput {
            command_id: capturing.command_id.clone(),
            stream: OutputStream::Stdout,
            chunk: redacted[..cut].to_string(),
            at: Utc::now(),
        });
        if let Err(err) = self.handle.enqueue(event) {
            debug!(error = %err, "Dropped captured output");
        }
    }

    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(bytes);

        // Hold back a sequence split across reads
        let split = match std::str::from_utf8(&buf) {
            Ok(_) => buf.len(),
            Err(err) if err.error_len().is_none() => err.valid_up_to(),
            Err(_) => buf.len(),
        };
        self.carry = buf.split_off(split);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl OutputTap for OutputCapture {
    fn on_output(&mut self, bytes: &[u8]) {
        self.capture(bytes);
    }
}

impl Drop for OutputCapture {
    fn drop(&mut self) {
        self.flush_partial_line();
    }
}
