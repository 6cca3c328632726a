// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Bounded ingestion queue and the batch flush loop behind it
//!
//! Producers hold an [`IngestHandle`] and never block: a full or closed
//! queue drops the event and bumps a counter. A single Tokio task drains the
//! queue and hands batches to a [`BatchSink`] on the blocking pool, flushing
//! every `flush_interval` or as soon as `batch_size` events are buffered.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tat_config::IngestSettings;
use tat_domain_types::Timestamp;
use tat_local_db::{Database, DbError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::correlator::{Correlation, Correlator, SessionEnv};
use crate::event::IngestEvent;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("Ingestion queue is full")]
    Full,

    #[error("Ingestion queue is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Batch sink panicked: {0}")]
    SinkPanicked(String),
}

/// Runtime knobs for the queue and flush loop
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub queue_capacity: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub shutdown_deadline: Duration,
    pub failure_journal: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self::from(&IngestSettings::default())
    }
}

impl From<&IngestSettings> for IngestConfig {
    fn from(settings: &IngestSettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity.max(1),
            flush_interval: Duration::from_millis(settings.flush_interval_ms.max(1)),
            batch_size: settings.batch_size.max(1),
            max_retries: settings.max_retries,
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            shutdown_deadline: Duration::from_millis(settings.shutdown_deadline_ms),
            failure_journal: settings.failure_journal.clone(),
        }
    }
}

/// Pipeline counters, shared by every handle and the flush task
#[derive(Debug, Default)]
pub struct IngestStats {
    enqueued: AtomicU64,
    dropped_full: AtomicU64,
    dropped_closed: AtomicU64,
    ignored_events: AtomicU64,
    filtered_events: AtomicU64,
    defaulted_timestamps: AtomicU64,
    flushed_batches: AtomicU64,
    flushed_events: AtomicU64,
    failed_attempts: AtomicU64,
    failed_batches: AtomicU64,
    discarded_events: AtomicU64,
    correlation_misses: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl IngestStats {
    pub(crate) fn record_ignored(&self) {
        bump(&self.ignored_events, 1);
    }

    pub(crate) fn record_filtered(&self) {
        bump(&self.filtered_events, 1);
    }

    pub(crate) fn record_defaulted_timestamp(&self) {
        bump(&self.defaulted_timestamps, 1);
    }

    pub fn snapshot(&self) -> IngestStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        IngestStatsSnapshot {
            enqueued: load(&self.enqueued),
            dropped_full: load(&self.dropped_full),
            dropped_closed: load(&self.dropped_closed),
            ignored_events: load(&self.ignored_events),
            filtered_events: load(&self.filtered_events),
            defaulted_timestamps: load(&self.defaulted_timestamps),
            flushed_batches: load(&self.flushed_batches),
            flushed_events: load(&self.flushed_events),
            failed_attempts: load(&self.failed_attempts),
            failed_batches: load(&self.failed_batches),
            discarded_events: load(&self.discarded_events),
            correlation_misses: load(&self.correlation_misses),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatsSnapshot {
    pub enqueued: u64,
    pub dropped_full: u64,
    pub dropped_closed: u64,
    pub ignored_events: u64,
    pub filtered_events: u64,
    pub defaulted_timestamps: u64,
    pub flushed_batches: u64,
    pub flushed_events: u64,
    pub failed_attempts: u64,
    pub failed_batches: u64,
    pub discarded_events: u64,
    pub correlation_misses: u64,
}

impl IngestStatsSnapshot {
    /// Events accepted into the queue that were neither written nor discarded.
    pub fn pending(&self) -> u64 {
        self.enqueued
            .saturating_sub(self.flushed_events)
            .saturating_sub(self.discarded_events)
    }
}

/// Producer side of the queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestEvent>,
    stats: Arc<IngestStats>,
}

impl IngestHandle {
    /// Queue an event without waiting.
    pub fn enqueue(&self, event: IngestEvent) -> Result<(), EnqueueError> {
        match self.tx.try_send(event) {
            Ok(()) => {
                bump(&self.stats.enqueued, 1);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                bump(&self.stats.dropped_full, 1);
                debug!(kind = event.kind(), "Ingestion queue full, dropping event");
                Err(EnqueueError::Full)
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                bump(&self.stats.dropped_closed, 1);
                debug!(kind = event.kind(), "Ingestion queue closed, dropping event");
                Err(EnqueueError::Closed)
            }
        }
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }
}

/// Summary of a successfully applied batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub misses: usize,
}

/// Applies a batch atomically: either every event lands or none does.
///
/// Called on Tokio's blocking pool.
pub trait BatchSink: Send + 'static {
    fn apply_batch(&mut self, batch: &[IngestEvent]) -> Result<BatchOutcome, IngestError>;
}

/// Writes batches to the tat database, one transaction per batch.
pub struct DbSink {
    db: Database,
    correlator: Correlator,
    clock: fn() -> Timestamp,
}

impl DbSink {
    pub fn new(db: Database, env: SessionEnv) -> Self {
        Self {
            db,
            correlator: Correlator::new(env),
            clock: Utc::now,
        }
    }

    /// Override the clock used to pick the current day's session.
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }
}

impl BatchSink for DbSink {
    fn apply_batch(&mut self, batch: &[IngestEvent]) -> Result<BatchOutcome, IngestError> {
        let now = (self.clock)();
        let tx = self.db.transaction()?;
        let mut outcome = BatchOutcome::default();
        for event in batch {
            match self.correlator.apply(&tx, event, &now)? {
                Correlation::Applied => outcome.applied += 1,
                Correlation::Miss(miss) => {
                    warn!(kind = event.kind(), command_id = ?event.command_id(), reason = %miss, "Correlation miss");
                    outcome.misses += 1;
                }
            }
        }
        tx.commit().map_err(DbError::from)?;
        Ok(outcome)
    }
}

/// Final state reported by [`Ingester::shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stats: IngestStatsSnapshot,
    /// The drain did not finish before the deadline; pending events were lost
    pub timed_out: bool,
}

/// Owns the flush task. Dropping it without calling [`Ingester::shutdown`]
/// closes intake and lets the task drain in the background.
pub struct Ingester {
    handle: IngestHandle,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    stats: Arc<IngestStats>,
}

impl Ingester {
    /// Start the flush task on the current Tokio runtime.
    pub fn start<S: BatchSink>(sink: S, config: IngestConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let (stop_tx, stop_rx) = oneshot::channel();
        let stats = Arc::new(IngestStats::default());

        let flush_loop = FlushLoop {
            sink: Arc::new(Mutex::new(sink)),
            config,
            stats: Arc::clone(&stats),
        };
        let task = tokio::spawn(flush_loop.run(rx, stop_rx));

        Self {
            handle: IngestHandle {
                tx,
                stats: Arc::clone(&stats),
            },
            stop_tx: Some(stop_tx),
            task,
            stats,
        }
    }

    /// Open the database at `path` and start a pipeline writing to it.
    pub fn open(path: &Path, config: IngestConfig) -> Result<Self, IngestError> {
        let db = Database::open(path)?;
        Ok(Self::start(DbSink::new(db, SessionEnv::detect()), config))
    }

    pub fn handle(&self) -> IngestHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop intake, flush everything already queued and close the sink.
    ///
    /// Gives up after `deadline`, in which case events still buffered are lost.
    pub async fn shutdown(mut self, deadline: Duration) -> ShutdownReport {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }

        let timed_out = match tokio::time::timeout(deadline, &mut self.task).await {
            Ok(Ok(())) => false,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Flush task failed");
                false
            }
            Err(_) => {
                self.task.abort();
                true
            }
        };

        let report = ShutdownReport {
            stats: self.stats.snapshot(),
            timed_out,
        };
        if timed_out {
            warn!(pending = report.stats.pending(), ?deadline, "Ingestion drain timed out");
        } else {
            info!(
                flushed = report.stats.flushed_events,
                dropped = report.stats.dropped_full + report.stats.dropped_closed,
                discarded = report.stats.discarded_events,
                "Ingestion pipeline shut down"
            );
        }
        report
    }
}

struct FlushLoop<S> {
    sink: Arc<Mutex<S>>,
    config: IngestConfig,
    stats: Arc<IngestStats>,
}

impl<S: BatchSink> FlushLoop<S> {
    async fn run(self, mut rx: mpsc::Receiver<IngestEvent>, mut stop_rx: oneshot::Receiver<()>) {
        let mut batch = Vec::with_capacity(self.config.batch_size.min(1024));
        let mut ticker = tokio::time::interval(self.config.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stopping = false;

        debug!(
            capacity = self.config.queue_capacity,
            batch_size = self.config.batch_size,
            "Flush loop started"
        );

        loop {
            tokio::select! {
                // Fires on shutdown or when the Ingester is dropped
                _ = &mut stop_rx, if !stopping => {
                    debug!("Closing ingestion intake");
                    rx.close();
                    stopping = true;
                }
                received = rx.recv() => match received {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= self.config.batch_size {
                            self.flush(std::mem::take(&mut batch), "size").await;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            self.flush(std::mem::take(&mut batch), "drain").await;
                        }
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if !batch.is_empty() {
                        self.flush(std::mem::take(&mut batch), "interval").await;
                    }
                }
            }
        }

        debug!("Flush loop finished");
    }

    async fn flush(&self, batch: Vec<IngestEvent>, trigger: &'static str) {
        let batch = Arc::new(batch);
        let batch_len = batch.len();
        let mut attempt: u32 = 0;

        loop {
            let sink = Arc::clone(&self.sink);
            let events = Arc::clone(&batch);
            let result = tokio::task::spawn_blocking(move || {
                let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                sink.apply_batch(&events)
            })
            .await
            .unwrap_or_else(|join_err| Err(IngestError::SinkPanicked(join_err.to_string())));

            match result {
                Ok(outcome) => {
                    bump(&self.stats.flushed_batches, 1);
                    bump(&self.stats.flushed_events, batch_len as u64);
                    bump(&self.stats.correlation_misses, outcome.misses as u64);
                    debug!(batch_len, trigger, misses = outcome.misses, attempt, "Flushed batch");
                    return;
                }
                Err(err) if attempt < self.config.max_retries => {
                    bump(&self.stats.failed_attempts, 1);
                    let delay = self
                        .config
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    warn!(batch_len, attempt, ?delay, error = %err, "Batch flush failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    bump(&self.stats.failed_attempts, 1);
                    bump(&self.stats.failed_batches, 1);
                    bump(&self.stats.discarded_events, batch_len as u64);
                    error!(batch_len, attempts = attempt + 1, error = %err, "Discarding batch after repeated failures");
                    if let Some(path) = self.config.failure_journal.clone() {
                        journal_failed_batch(path, batch, err.to_string()).await;
                    }
                    return;
                }
            }
        }
    }
}

#[derive(Serialize)]
struct JournalEntry<'a> {
    failed_at: Timestamp,
    error: &'a str,
    event: &'a IngestEvent,
}

async fn journal_failed_batch(path: PathBuf, batch: Arc<Vec<IngestEvent>>, error: String) {
    let result = tokio::task::spawn_blocking(move || append_journal(&path, &batch, &error)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "Failed to write failure journal"),
        Err(join_err) => error!(error = %join_err, "Failure journal writer panicked"),
    }
}

fn append_journal(path: &Path, batch: &[IngestEvent], error: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let failed_at = Utc::now();
    for event in batch {
        let line = serde_json::to_string(&JournalEntry {
            failed_at,
            error,
            event,
        })?;
        writeln!(file, "{line}")?;
    }
    file.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{CommandStart, IngestEvent};
    use tat_domain_types::from_epoch_ms;

    fn start(id: &str) -> IngestEvent {
        IngestEvent::CommandStart(CommandStart {
            command_id: id.into(),
            cmd: "true".into(),
            cwd: "/".into(),
            at: from_epoch_ms(1),
            shell_session: None,
        })
    }

    /// Records every batch it is given; fails the first `failures` calls.
    #[derive(Clone, Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<String>>>>,
        failures: Arc<AtomicU64>,
    }

    impl BatchSink for RecordingSink {
        fn apply_batch(&mut self, batch: &[IngestEvent]) -> Result<BatchOutcome, IngestError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(IngestError::Io(std::io::Error::other("forced")));
            }
            let ids = batch.iter().filter_map(|e| e.command_id().map(str::to_string)).collect();
            self.batches.lock().unwrap().push(ids);
            Ok(BatchOutcome {
                applied: batch.len(),
                misses: 0,
            })
        }
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            queue_capacity: 16,
            flush_interval: Duration::from_millis(20),
            batch_size: 4,
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            shutdown_deadline: Duration::from_secs(2),
            failure_journal: None,
        }
    }

    #[tat_test_utils::logged_test]
    fn test_config_from_settings() {
        let config = IngestConfig::default();
        assert_eq!(config.queue_capacity, 5000);
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.flush_interval, Duration::from_millis(200));
        assert_eq!(config.retry_backoff, Duration::from_millis(50));
        assert_eq!(config.max_retries, 3);
    }

    #[tat_test_utils::logged_tokio_test]
    async fn test_size_trigger_splits_batches_in_order() {
        let sink = RecordingSink::default();
        let mut config = fast_config();
        config.flush_interval = Duration::from_secs(60);
        let ingester = Ingester::start(sink.clone(), config);
        let handle = ingester.handle();

        for i in 0..10 {
            handle.enqueue(start(&format!("c{i}"))).unwrap();
        }
        let report = ingester.shutdown(Duration::from_secs(2)).await;

        let batches = sink.batches.lock().unwrap().clone();
        let flat: Vec<String> = batches.iter().flatten().cloned().collect();
        assert_eq!(flat, (0..10).map(|i| format!("c{i}")).collect::<Vec<_>>());
        assert!(batches.iter().all(|b| b.len() <= 4));
        assert_eq!(report.stats.flushed_events, 10);
        assert_eq!(report.stats.pending(), 0);
        assert!(!report.timed_out);
    }

    #[tat_test_utils::logged_tokio_test]
    async fn test_interval_trigger_flushes_partial_batch() {
        let sink = RecordingSink::default();
        let ingester = Ingester::start(sink.clone(), fast_config());
        ingester.handle().enqueue(start("only")).unwrap();

        let batches = Arc::clone(&sink.batches);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while batches.lock().unwrap().is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*batches.lock().unwrap(), vec![vec!["only".to_string()]]);
        ingester.shutdown(Duration::from_secs(1)).await;
    }

    #[tat_test_utils::logged_tokio_test]
    async fn test_retry_then_success() {
        let sink = RecordingSink::default();
        sink.failures.store(2, Ordering::SeqCst);
        let ingester = Ingester::start(sink.clone(), fast_config());
        ingester.handle().enqueue(start("a")).unwrap();

        let report = ingester.shutdown(Duration::from_secs(2)).await;
        assert_eq!(report.stats.failed_attempts, 2);
        assert_eq!(report.stats.failed_batches, 0);
        assert_eq!(report.stats.flushed_events, 1);
    }

    #[tat_test_utils::logged_tokio_test]
    async fn test_retries_exhausted_discards_and_journals() {
        let dir = tempfile::tempdir().unwrap();
        let journal = dir.path().join("failed.jsonl");
        let sink = RecordingSink::default();
        sink.failures.store(u64::MAX, Ordering::SeqCst);
        let mut config = fast_config();
        config.failure_journal = Some(journal.clone());

        let ingester = Ingester::start(sink.clone(), config);
        let handle = ingester.handle();
        handle.enqueue(start("a")).unwrap();
        handle.enqueue(start("b")).unwrap();

        let report = ingester.shutdown(Duration::from_secs(2)).await;
        assert_eq!(report.stats.failed_batches, 1);
        assert_eq!(report.stats.discarded_events, 2);
        assert_eq!(report.stats.failed_attempts, 3);
        assert_eq!(report.stats.flushed_events, 0);
        assert!(sink.batches.lock().unwrap().is_empty());

        let lines: Vec<serde_json::Value> = std::fs::read_to_string(&journal)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"]["command_id"], "a");
        assert_eq!(lines[1]["event"]["kind"], "command_start");
        assert!(lines[0]["error"].as_str().unwrap().contains("forced"));
    }

    #[tat_test_utils::logged_tokio_test]
    async fn test_enqueue_after_shutdown_is_closed() {
        let ingester = Ingester::start(RecordingSink::default(), fast_config());
        let handle = ingester.handle();
        ingester.shutdown(Duration::from_secs(1)).await;

        assert_eq!(handle.enqueue(start("late")), Err(EnqueueError::Closed));
        assert_eq!(handle.stats().snapshot().dropped_closed, 1);
    }
}
