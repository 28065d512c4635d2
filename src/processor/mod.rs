//! Record processors and the chain that dispatches to them.
//!
//! A processor is a stateful observer. Every hook has a no-op default so an
//! implementation only overrides the transitions it cares about:
//!
//! ```rust
//! use daq_record_loop::processor::{ProcessorResult, RecordProcessor};
//! use daq_record_loop::record::Record;
//!
//! #[derive(Default)]
//! struct CountTags {
//!     seen: u64,
//! }
//!
//! impl RecordProcessor for CountTags {
//!     fn name(&self) -> &str {
//!         "count-tags"
//!     }
//!
//!     fn process(&mut self, _record: &Record) -> ProcessorResult {
//!         self.seen += 1;
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Processors are registered with a [`ProcessorChain`] before the loop starts.
//! The chain is then moved into the loop, so membership cannot change while
//! records are flowing.

pub mod chain;
pub mod conditions;
pub mod run_summary;
pub mod sentinel;

pub use chain::{DispatchOutcome, HookFailure, ProcessorChain};
pub use conditions::{ConditionsActivator, ConditionsService};
pub use run_summary::{RunSummary, RunSummaryHandle, RunSummaryProcessor};
pub use sentinel::EndRunSentinel;

use std::fmt;

use serde::Serialize;

use crate::error::ProcessorError;
use crate::record::Record;

/// Result of a processor hook.
pub type ProcessorResult = Result<(), ProcessorError>;

/// A stateful observer of the record stream.
pub trait RecordProcessor: Send {
    /// Name used in logs, errors and the loop summary.
    fn name(&self) -> &str;

    /// Called once before the first record.
    fn start_job(&mut self) -> ProcessorResult {
        Ok(())
    }

    /// Called with each start-of-run record, before [`process`](Self::process).
    fn start_run(&mut self, _record: &Record) -> ProcessorResult {
        Ok(())
    }

    /// Called with every record, control records included.
    fn process(&mut self, _record: &Record) -> ProcessorResult {
        Ok(())
    }

    /// Called with the end-of-run record, after [`process`](Self::process).
    fn end_run(&mut self, _record: &Record) -> ProcessorResult {
        Ok(())
    }

    /// Called exactly once when the loop terminates, whatever the cause.
    fn end_job(&mut self) -> ProcessorResult {
        Ok(())
    }

    /// True for the end-of-run sentinel, the only processor whose
    /// [`ProcessorError::StopLoop`] is honoured. It must be registered last.
    fn is_end_run_sentinel(&self) -> bool {
        false
    }
}

impl<P: RecordProcessor + ?Sized> RecordProcessor for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn start_job(&mut self) -> ProcessorResult {
        (**self).start_job()
    }

    fn start_run(&mut self, record: &Record) -> ProcessorResult {
        (**self).start_run(record)
    }

    fn process(&mut self, record: &Record) -> ProcessorResult {
        (**self).process(record)
    }

    fn end_run(&mut self, record: &Record) -> ProcessorResult {
        (**self).end_run(record)
    }

    fn end_job(&mut self) -> ProcessorResult {
        (**self).end_job()
    }

    fn is_end_run_sentinel(&self) -> bool {
        (**self).is_end_run_sentinel()
    }
}

/// Lifecycle hook identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// [`RecordProcessor::start_job`]
    StartJob,
    /// [`RecordProcessor::start_run`]
    StartRun,
    /// [`RecordProcessor::process`]
    Record,
    /// [`RecordProcessor::end_run`]
    EndRun,
    /// [`RecordProcessor::end_job`]
    EndJob,
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::StartJob => write!(f, "start_job"),
            Hook::StartRun => write!(f, "start_run"),
            Hook::Record => write!(f, "process"),
            Hook::EndRun => write!(f, "end_run"),
            Hook::EndJob => write!(f, "end_job"),
        }
    }
}

/// Per-processor bookkeeping reported in the loop summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStatus {
    /// Processor name.
    pub name: String,
    /// Records passed to `process`.
    pub records: u64,
    /// Runs started.
    pub runs_started: u32,
    /// Runs ended.
    pub runs_ended: u32,
    /// Recoverable failures returned from any hook.
    pub failures: u64,
    /// Whether the processor raised a fatal error.
    pub fatal: bool,
    /// Whether `end_job` was dispatched.
    pub ended: bool,
    /// Most recent error message.
    pub last_error: Option<String>,
}

impl ProcessorStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// True when the processor never failed.
    pub fn is_clean(&self) -> bool {
        self.failures == 0 && !self.fatal
    }
}
