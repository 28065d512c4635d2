//! The record loop.
//!
//! [`RecordLoop`] pulls records from a [`RecordSource`], classifies them, keeps
//! the run state, and dispatches every record to the [`ProcessorChain`] before
//! pulling the next one. It can run on the caller's thread ([`RecordLoop::run`])
//! or on a dedicated thread ([`RecordLoop::spawn`]); either way it is commanded
//! through a [`LoopControl`].
//!
//! # Termination
//!
//! Whatever ends the loop, `end_job` reaches every processor exactly once before
//! `run` returns:
//!
//! | cause                                   | termination      | `run` returns |
//! |-----------------------------------------|------------------|---------------|
//! | end-of-run record                       | `EndOfRun`       | `Ok`          |
//! | file list exhausted                     | `EndOfSource`    | `Ok`          |
//! | `LoopControl::stop`                     | `Stopped`        | `Ok`          |
//! | sentinel stop on a non end-of-run record| `Halted`         | `Ok`          |
//! | record limit                            | `RecordLimit`    | `Ok`          |
//! | source failure or fatal processor error | `Failed`         | `Err`         |
//!
//! Only `EndOfRun` is normal; the rest are logged as abnormal.

use std::collections::BTreeMap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::classify::{RecordKind, TagConvention};
use crate::control::{Admission, LoopControl, LoopState};
use crate::error::{LoopError, LoopResult};
use crate::processor::{DispatchOutcome, ProcessorChain};
use crate::record::Record;
use crate::run_state::{RunState, RunTracker};
use crate::source::{Fetch, RecordSource};
use crate::summary::{LoopSummary, Termination};

/// Default wait between checks while paused.
pub const DEFAULT_PAUSE_POLL: Duration = Duration::from_millis(100);

/// Tunables for one loop.
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Stop after this many records; zero means no limit.
    pub max_records: u64,
    /// Enter the paused state immediately after `start_job`.
    pub start_paused: bool,
    /// Tag convention used for classification.
    pub convention: TagConvention,
    /// Longest uninterrupted wait while paused.
    pub pause_poll: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_records: 0,
            start_paused: false,
            convention: TagConvention::default(),
            pause_poll: DEFAULT_PAUSE_POLL,
        }
    }
}

/// Drives records from a source through a processor chain.
pub struct RecordLoop<S> {
    session: Uuid,
    source: S,
    chain: ProcessorChain,
    options: LoopOptions,
    control: LoopControl,
    run: RunTracker,
    counts: BTreeMap<RecordKind, u64>,
    dispatched: u64,
    summary: Option<LoopSummary>,
}

impl<S: RecordSource> RecordLoop<S> {
    /// Create an idle loop.
    pub fn new(source: S, chain: ProcessorChain) -> Self {
        Self {
            session: Uuid::new_v4(),
            source,
            chain,
            options: LoopOptions::default(),
            control: LoopControl::new(),
            run: RunTracker::new(),
            counts: BTreeMap::new(),
            dispatched: 0,
            summary: None,
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: LoopOptions) -> Self {
        self.options = options;
        self
    }

    /// Command handle; clone it freely.
    pub fn control(&self) -> LoopControl {
        self.control.clone()
    }

    /// Session id used in log lines and the summary.
    pub fn session(&self) -> Uuid {
        self.session
    }

    /// Loop state.
    pub fn state(&self) -> LoopState {
        self.control.state()
    }

    /// Run state.
    pub fn run_state(&self) -> RunState {
        self.run.state()
    }

    /// The record source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The processor chain.
    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }

    /// Summary of the finished session, also available after a failure.
    pub fn summary(&self) -> Option<&LoopSummary> {
        self.summary.as_ref()
    }

    /// Run to completion on the current thread.
    ///
    /// Fails with [`LoopError::InvalidState`] unless the loop is idle. Any other
    /// error is returned only after `end_job` has been dispatched.
    pub fn run(&mut self) -> LoopResult<LoopSummary> {
        let state = self.control.state();
        if state != LoopState::Idle {
            return Err(LoopError::InvalidState(state));
        }

        let started = Instant::now();
        self.control.set_state(LoopState::Running);
        info!(
            session = %self.session,
            source = self.source.name(),
            processors = ?self.chain.names(),
            max_records = self.options.max_records,
            "Record loop started"
        );

        let result = match check(self.chain.dispatch_start_job()) {
            Ok(_) => {
                if self.options.start_paused {
                    info!("Starting paused");
                    self.control.pause();
                }
                self.drive()
            }
            Err(e) => Err(e),
        };
        self.finish(result, started)
    }

    fn drive(&mut self) -> LoopResult<Termination> {
        loop {
            if self.control.stop_requested() {
                info!(session = %self.session, "Stop command received");
                return Ok(Termination::Stopped);
            }

            let admission = self.control.admit(self.options.pause_poll);
            if admission == Admission::Wait {
                continue;
            }

            let record = match self.source.next()? {
                Fetch::Record(record) => record,
                Fetch::Pending => continue,
                Fetch::EndOfSource => {
                    info!(source = self.source.name(), "Source exhausted");
                    return Ok(Termination::EndOfSource);
                }
            };

            let outcome = self.dispatch(&record);
            if admission == Admission::Step {
                self.control.consume_step();
                debug!(tag = record.tag(), "Stepped one record");
            }
            if let Some(termination) = outcome? {
                return Ok(termination);
            }

            if self.options.max_records > 0 && self.dispatched >= self.options.max_records {
                info!(limit = self.options.max_records, "Record limit reached");
                return Ok(Termination::RecordLimit);
            }
        }
    }

    /// Dispatch one record and report whether it ends the loop.
    fn dispatch(&mut self, record: &Record) -> LoopResult<Option<Termination>> {
        let kind = self.options.convention.classify(record);
        self.dispatched += 1;
        *self.counts.entry(kind).or_default() += 1;
        trace!(
            tag = record.tag(),
            %kind,
            sequence = ?record.sequence(),
            "Dispatching record"
        );

        if let Some(state) = self.run.observe(kind, record) {
            debug!(run = ?self.run.run(), run_state = %state, "Run state changed");
        }

        let mut stop = None;
        if kind == RecordKind::StartOfRun {
            stop = check(self.chain.dispatch_start_run(record))?;
        }
        stop = check(self.chain.dispatch_record(record))?.or(stop);

        match kind {
            RecordKind::EndOfRun => {
                check(self.chain.dispatch_end_run(record))?;
                return Ok(Some(Termination::EndOfRun));
            }
            RecordKind::Pause => {
                info!(run = ?self.run.run(), "Pause record received; loop paused");
                self.control.pause();
            }
            _ => {}
        }

        Ok(stop.map(|processor| Termination::Halted { processor }))
    }

    fn finish(&mut self, result: LoopResult<Termination>, started: Instant) -> LoopResult<LoopSummary> {
        let end_job = check(self.chain.dispatch_end_job());
        let result = match (result, end_job) {
            (Ok(_), Err(e)) => Err(e),
            (result, _) => result,
        };

        if !matches!(result, Ok(Termination::EndOfRun)) {
            self.run.abandon();
        }
        self.control.set_state(LoopState::Stopped);

        let termination = match &result {
            Ok(termination) => termination.clone(),
            Err(e) => Termination::Failed(e.to_string()),
        };
        let summary = LoopSummary {
            session: self.session,
            source: self.source.name().to_string(),
            records_dispatched: self.dispatched,
            counts: self.counts.clone(),
            decode_errors: self.source.decode_errors(),
            dropped: self.source.dropped(),
            processors: self.chain.statuses(),
            termination,
            run: self.run.run(),
            run_state: self.run.state(),
            elapsed: started.elapsed(),
        };
        summary.log();
        self.summary = Some(summary.clone());
        result.map(|_| summary)
    }
}

impl<S: RecordSource + 'static> RecordLoop<S> {
    /// Run on a dedicated thread named `record-loop`.
    pub fn spawn(mut self) -> LoopResult<LoopHandle> {
        let control = self.control.clone();
        let thread = thread::Builder::new()
            .name("record-loop".to_string())
            .spawn(move || self.run())
            .map_err(LoopError::Spawn)?;
        Ok(LoopHandle { control, thread })
    }
}

/// Fatal errors become `Err`; a sentinel stop request is passed through.
fn check(outcome: DispatchOutcome) -> LoopResult<Option<String>> {
    match outcome.fatal {
        Some(failure) => Err(LoopError::ProcessorFatal {
            processor: failure.processor,
            message: failure.error.to_string(),
        }),
        None => Ok(outcome.stop),
    }
}

/// A loop running on its own thread.
pub struct LoopHandle {
    control: LoopControl,
    thread: JoinHandle<LoopResult<LoopSummary>>,
}

impl LoopHandle {
    /// Command handle for the running loop.
    pub fn control(&self) -> &LoopControl {
        &self.control
    }

    /// True once the loop thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Ask the loop to stop and wait for it.
    pub fn stop(self) -> LoopResult<LoopSummary> {
        self.control.stop();
        self.join()
    }

    /// Wait for the loop to finish.
    pub fn join(self) -> LoopResult<LoopSummary> {
        self.thread.join().map_err(|panic| {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            LoopError::Panicked(message)
        })?
    }
}
