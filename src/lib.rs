//! # DAQ Record Loop
//!
//! Core of a data-acquisition monitoring pipeline: records arrive from files or a
//! live transport, are classified against run-boundary control events, and are
//! dispatched through an ordered chain of stateful processors with well-defined
//! lifecycle and failure handling.
//!
//! ## Crate Structure
//!
//! - **`record`**: the immutable [`Record`] and its control-event payload view.
//! - **`codec`**: the [`RecordDecoder`](codec::RecordDecoder) contract and the
//!   reference bank decoder used for record files.
//! - **`source`**: the [`RecordSource`] trait, the sequential multi-file source,
//!   the queue-backed live source and its transport receiver task.
//! - **`queue`**: [`BoundedRecordQueue`], the only synchronized structure shared
//!   between the receiver and the loop.
//! - **`classify`**: tag to [`RecordKind`] mapping (CODA convention by default).
//! - **`processor`**: the [`RecordProcessor`] trait, [`ProcessorChain`], and the
//!   stock processors (end-of-run sentinel, conditions activation, run summary).
//! - **`record_loop`**, **`control`**, **`run_state`**, **`summary`**: the loop,
//!   its command handle, the run state tracker and the session summary.
//! - **`error_policy`**: skip or abort on decode failures.
//! - **`error`**, **`config`**, **`logging`**: error types, Figment configuration
//!   and subscriber setup.
//!
//! ## Example
//!
//! ```no_run
//! use daq_record_loop::codec::BankDecoder;
//! use daq_record_loop::processor::{EndRunSentinel, ProcessorChain, RunSummaryProcessor};
//! use daq_record_loop::record_loop::RecordLoop;
//! use daq_record_loop::source::SequentialFileSource;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let summary = RunSummaryProcessor::new();
//! let run = summary.handle();
//!
//! let mut chain = ProcessorChain::new();
//! chain.register(summary)?;
//! chain.register(EndRunSentinel::new())?;
//!
//! let source = SequentialFileSource::new(["run_42.evio.0", "run_42.evio.1"], BankDecoder);
//! let result = RecordLoop::new(source, chain).run()?;
//! println!("{}: {} records, run {:?}", result.termination, result.records_dispatched, run.snapshot().run);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod error_policy;
pub mod logging;
pub mod processor;
pub mod queue;
pub mod record;
pub mod record_loop;
pub mod run_state;
pub mod source;
pub mod summary;

pub use classify::{RecordKind, TagConvention};
pub use control::{LoopControl, LoopState};
pub use error::{LoopError, LoopResult};
pub use processor::{ProcessorChain, RecordProcessor};
pub use queue::{BoundedRecordQueue, OverflowPolicy};
pub use record::Record;
pub use record_loop::{LoopHandle, LoopOptions, RecordLoop};
pub use source::{Fetch, RecordSource};
pub use summary::{LoopSummary, Termination};
