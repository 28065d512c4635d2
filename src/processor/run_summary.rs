//! Run summary built from the record stream.
//!
//! [`RunSummaryProcessor`] is moved into the chain; the [`RunSummaryHandle`]
//! obtained before registration stays with the caller and can be read while the
//! loop runs or after it returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::classify::{RecordKind, TagConvention};
use crate::processor::{ProcessorResult, RecordProcessor};
use crate::record::Record;

/// What is known about the current (or last) run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Run number from the start-of-run record.
    pub run: Option<u32>,
    /// Run type from the start-of-run record.
    pub run_type: Option<u32>,
    /// Start-of-run (PRESTART) time.
    pub prestart: Option<DateTime<Utc>>,
    /// First GO time.
    pub go: Option<DateTime<Utc>>,
    /// End-of-run time.
    pub end: Option<DateTime<Utc>>,
    /// Event count reported by the end-of-run record.
    pub end_event_count: Option<u32>,
    /// Records seen, by classification.
    pub counts: BTreeMap<RecordKind, u64>,
    /// First sequence number seen.
    pub first_sequence: Option<u32>,
    /// Last sequence number seen.
    pub last_sequence: Option<u32>,
    /// Whether an end-of-run record closed the run.
    pub ended: bool,
}

impl RunSummary {
    /// Total records seen.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Records of one kind.
    pub fn count(&self, kind: RecordKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Wall time between PRESTART and END.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.end? - self.prestart?)
    }
}

/// Shared read access to a [`RunSummary`].
#[derive(Debug, Clone, Default)]
pub struct RunSummaryHandle(Arc<Mutex<RunSummary>>);

impl RunSummaryHandle {
    /// Copy of the current summary.
    pub fn snapshot(&self) -> RunSummary {
        self.0.lock().clone()
    }
}

/// Accumulates a [`RunSummary`].
#[derive(Debug, Default)]
pub struct RunSummaryProcessor {
    convention: TagConvention,
    summary: RunSummaryHandle,
}

impl RunSummaryProcessor {
    /// Create a processor with the default tag convention.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify with a non-default tag convention.
    pub fn with_convention(mut self, convention: TagConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Handle for reading the summary from outside the loop.
    pub fn handle(&self) -> RunSummaryHandle {
        self.summary.clone()
    }
}

impl RecordProcessor for RunSummaryProcessor {
    fn name(&self) -> &str {
        "run-summary"
    }

    fn start_run(&mut self, record: &Record) -> ProcessorResult {
        let mut summary = self.summary.0.lock();
        if summary.run.is_some() && !summary.ended {
            warn!(previous = ?summary.run, "New run started before the previous one ended");
        }
        *summary = RunSummary::default();
        if let Some(words) = record.control_words() {
            summary.run = Some(words.value);
            summary.run_type = Some(words.extra);
            summary.prestart = words.time();
        }
        Ok(())
    }

    fn process(&mut self, record: &Record) -> ProcessorResult {
        let kind = self.convention.classify(record);
        let mut summary = self.summary.0.lock();
        *summary.counts.entry(kind).or_default() += 1;
        if let Some(sequence) = record.sequence() {
            summary.first_sequence.get_or_insert(sequence);
            summary.last_sequence = Some(sequence);
        }
        if kind == RecordKind::Resume && summary.go.is_none() {
            summary.go = record.control_words().and_then(|w| w.time());
        }
        Ok(())
    }

    fn end_run(&mut self, record: &Record) -> ProcessorResult {
        let mut summary = self.summary.0.lock();
        if let Some(words) = record.control_words() {
            summary.end = words.time();
            summary.end_event_count = Some(words.extra);
        }
        summary.ended = true;
        info!(
            run = ?summary.run,
            records = summary.total(),
            physics = summary.count(RecordKind::Physics),
            first_sequence = ?summary.first_sequence,
            last_sequence = ?summary.last_sequence,
            "Run summary"
        );
        Ok(())
    }
}
