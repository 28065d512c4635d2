//! End-of-session summary.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classify::RecordKind;
use crate::processor::ProcessorStatus;
use crate::run_state::RunState;

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum Termination {
    /// An end-of-run record was processed. The only normal termination.
    EndOfRun,
    /// The file list ran out before an end-of-run record.
    EndOfSource,
    /// `stop()` was called.
    Stopped,
    /// The end-of-run sentinel asked to stop on a record that was not an
    /// end-of-run record.
    Halted {
        /// Sentinel name.
        processor: String,
    },
    /// The configured record limit was reached.
    RecordLimit,
    /// A fatal source or processor error.
    Failed(String),
}

impl Termination {
    /// True for the normal end-of-run path.
    pub fn is_normal(&self) -> bool {
        matches!(self, Termination::EndOfRun)
    }

    /// True when the loop ended because something broke.
    pub fn is_failure(&self) -> bool {
        matches!(self, Termination::Failed(_))
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::EndOfRun => write!(f, "end of run"),
            Termination::EndOfSource => write!(f, "end of source"),
            Termination::Stopped => write!(f, "stopped"),
            Termination::Halted { processor } => write!(f, "halted by {processor}"),
            Termination::RecordLimit => write!(f, "record limit reached"),
            Termination::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// What one loop session did.
#[derive(Debug, Clone, Serialize)]
pub struct LoopSummary {
    /// Unique id of the session, also present in log lines.
    pub session: Uuid,
    /// Source name.
    pub source: String,
    /// Records dispatched to the chain.
    pub records_dispatched: u64,
    /// Records dispatched, by classification.
    pub counts: BTreeMap<RecordKind, u64>,
    /// Records the source could not decode.
    pub decode_errors: u64,
    /// Records lost before reaching the loop.
    pub dropped: u64,
    /// Per-processor status.
    pub processors: Vec<ProcessorStatus>,
    /// Why the loop stopped.
    pub termination: Termination,
    /// Last run number seen.
    pub run: Option<u32>,
    /// Run state when the loop stopped.
    pub run_state: RunState,
    /// Wall time from start to stop.
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl LoopSummary {
    /// Records of one kind.
    pub fn count(&self, kind: RecordKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    /// Status of the named processor.
    pub fn processor(&self, name: &str) -> Option<&ProcessorStatus> {
        self.processors.iter().find(|p| p.name == name)
    }

    /// Emit the summary. Normal termination logs at info, anything else at
    /// warn, failures at error.
    pub fn log(&self) {
        let failing: Vec<&str> = self
            .processors
            .iter()
            .filter(|p| !p.is_clean())
            .map(|p| p.name.as_str())
            .collect();

        if self.termination.is_normal() {
            info!(
                session = %self.session,
                termination = "normal",
                reason = %self.termination,
                run = ?self.run,
                records = self.records_dispatched,
                decode_errors = self.decode_errors,
                dropped = self.dropped,
                failing_processors = ?failing,
                elapsed = ?self.elapsed,
                "Record loop finished"
            );
        } else if self.termination.is_failure() {
            error!(
                session = %self.session,
                termination = "abnormal",
                reason = %self.termination,
                run = ?self.run,
                records = self.records_dispatched,
                decode_errors = self.decode_errors,
                dropped = self.dropped,
                failing_processors = ?failing,
                elapsed = ?self.elapsed,
                "Record loop failed"
            );
        } else {
            warn!(
                session = %self.session,
                termination = "abnormal",
                reason = %self.termination,
                run = ?self.run,
                records = self.records_dispatched,
                decode_errors = self.decode_errors,
                dropped = self.dropped,
                failing_processors = ?failing,
                elapsed = ?self.elapsed,
                "Record loop stopped before end of run"
            );
        }
    }
}
