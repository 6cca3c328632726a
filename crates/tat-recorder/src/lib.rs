// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Capture pipeline for tat
//!
//! Hook lines are parsed by [`event`], admitted by [`intake`], buffered by
//! the bounded queue in [`ingest`] and written in batches, with
//! [`correlator`] mapping each event onto session and command rows inside
//! the batch transaction. [`pty`] mirrors an interactive shell, feeding
//! [`capture`], while [`socket`] lets hooks inside that shell reach the
//! same pipeline.

pub mod capture;
pub mod correlator;
pub mod event;
pub mod ingest;
pub mod intake;
pub mod pty;
pub mod socket;

pub use capture::{ActiveCommand, OutputCapture, Redactor};
pub use correlator::{Correlation, CorrelationMiss, Correlator, SessionEnv};
pub use event::{IngestEvent, Normalized, ParseError, parse_event_line};
pub use ingest::{
    BatchOutcome, BatchSink, DbSink, EnqueueError, IngestConfig, IngestError, IngestHandle,
    IngestStats, IngestStatsSnapshot, Ingester, ShutdownReport,
};
pub use intake::{EventIntake, IgnoreReason, IntakeError, IntakeOutcome};
pub use pty::{
    MirrorConfig, MirrorError, MirrorExit, OutputTap, PolledStdin, PtyMirror, PtyResizer, RawModeGuard,
};
pub use socket::{EVENT_SOCKET_ENV, EventClient, EventServer, Reply};
