//! Ordered processor chain.
//!
//! Every dispatch calls the matching hook on every registered processor, in
//! registration order. Errors never short-circuit the chain; they are collected
//! into a [`DispatchOutcome`] that the loop inspects once the last processor has
//! returned.

use tracing::{debug, error, trace, warn};

use crate::error::{ChainError, ProcessorError};
use crate::processor::{Hook, ProcessorResult, ProcessorStatus, RecordProcessor};
use crate::record::Record;

/// An error returned by one processor hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookFailure {
    /// Name of the processor that failed.
    pub processor: String,
    /// Hook that was running.
    pub hook: Hook,
    /// What it returned.
    pub error: ProcessorError,
}

/// Everything that went wrong during one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Recoverable failures, in chain order.
    pub failures: Vec<HookFailure>,
    /// First fatal error raised, if any.
    pub fatal: Option<HookFailure>,
    /// Name of the sentinel if it asked the loop to stop.
    pub stop: Option<String>,
}

impl DispatchOutcome {
    /// True when every processor returned `Ok`.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.fatal.is_none() && self.stop.is_none()
    }
}

struct Slot {
    processor: Box<dyn RecordProcessor>,
    status: ProcessorStatus,
}

/// Append-only, ordered list of processors.
#[derive(Default)]
pub struct ProcessorChain {
    slots: Vec<Slot>,
    sentinel: Option<String>,
    job_started: bool,
    job_ended: bool,
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.names())
            .field("sentinel", &self.sentinel)
            .finish()
    }
}

impl ProcessorChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor.
    ///
    /// Rejects anything offered after the end-of-run sentinel, and a second
    /// sentinel.
    pub fn register<P>(&mut self, processor: P) -> Result<(), ChainError>
    where
        P: RecordProcessor + 'static,
    {
        self.register_boxed(Box::new(processor))
    }

    /// Append an already boxed processor.
    pub fn register_boxed(&mut self, processor: Box<dyn RecordProcessor>) -> Result<(), ChainError> {
        let name = processor.name().to_string();
        if let Some(existing) = &self.sentinel {
            return Err(if processor.is_end_run_sentinel() {
                ChainError::DuplicateSentinel {
                    existing: existing.clone(),
                    rejected: name,
                }
            } else {
                ChainError::SentinelNotLast {
                    sentinel: existing.clone(),
                    rejected: name,
                }
            });
        }
        if processor.is_end_run_sentinel() {
            self.sentinel = Some(name.clone());
        }
        debug!(processor = %name, position = self.slots.len(), "Registered processor");
        self.slots.push(Slot {
            status: ProcessorStatus::new(&name),
            processor,
        });
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<P>(mut self, processor: P) -> Result<Self, ChainError>
    where
        P: RecordProcessor + 'static,
    {
        self.register(processor)?;
        Ok(self)
    }

    /// Number of registered processors.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Processor names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.status.name.as_str()).collect()
    }

    /// Name of the registered sentinel, if any.
    pub fn sentinel(&self) -> Option<&str> {
        self.sentinel.as_deref()
    }

    /// Snapshot of per-processor status.
    pub fn statuses(&self) -> Vec<ProcessorStatus> {
        self.slots.iter().map(|s| s.status.clone()).collect()
    }

    /// True once `end_job` has been dispatched.
    pub fn job_ended(&self) -> bool {
        self.job_ended
    }

    /// Dispatch `start_job`. Only the first call reaches the processors.
    pub fn dispatch_start_job(&mut self) -> DispatchOutcome {
        if self.job_started {
            debug!("start_job already dispatched; ignoring");
            return DispatchOutcome::default();
        }
        self.job_started = true;
        self.dispatch(Hook::StartJob, |p| p.start_job())
    }

    /// Dispatch `start_run` with the start-of-run record.
    pub fn dispatch_start_run(&mut self, record: &Record) -> DispatchOutcome {
        self.dispatch(Hook::StartRun, |p| p.start_run(record))
    }

    /// Dispatch `process` with any record.
    pub fn dispatch_record(&mut self, record: &Record) -> DispatchOutcome {
        self.dispatch(Hook::Record, |p| p.process(record))
    }

    /// Dispatch `end_run` with the end-of-run record.
    pub fn dispatch_end_run(&mut self, record: &Record) -> DispatchOutcome {
        self.dispatch(Hook::EndRun, |p| p.end_run(record))
    }

    /// Dispatch `end_job`. Only the first call reaches the processors.
    pub fn dispatch_end_job(&mut self) -> DispatchOutcome {
        if self.job_ended {
            debug!("end_job already dispatched; ignoring");
            return DispatchOutcome::default();
        }
        self.job_ended = true;
        self.dispatch(Hook::EndJob, |p| p.end_job())
    }

    fn dispatch<F>(&mut self, hook: Hook, mut call: F) -> DispatchOutcome
    where
        F: FnMut(&mut Box<dyn RecordProcessor>) -> ProcessorResult,
    {
        let mut outcome = DispatchOutcome::default();
        for slot in &mut self.slots {
            trace!(processor = %slot.status.name, %hook, "Dispatching");
            let result = call(&mut slot.processor);
            match hook {
                Hook::StartRun => slot.status.runs_started += 1,
                Hook::Record => slot.status.records += 1,
                Hook::EndRun => slot.status.runs_ended += 1,
                Hook::EndJob => slot.status.ended = true,
                Hook::StartJob => {}
            }

            let Err(err) = result else { continue };
            let name = slot.status.name.clone();
            slot.status.last_error = Some(err.to_string());
            match err {
                ProcessorError::StopLoop(reason) if slot.processor.is_end_run_sentinel() => {
                    debug!(processor = %name, %hook, reason = %reason, "Sentinel requested stop");
                    outcome.stop = Some(name);
                }
                ProcessorError::StopLoop(reason) => {
                    warn!(
                        processor = %name,
                        %hook,
                        reason = %reason,
                        "Stop request from a processor that is not the end-of-run sentinel; treating as failure"
                    );
                    slot.status.failures += 1;
                    outcome.failures.push(HookFailure {
                        processor: name,
                        hook,
                        error: ProcessorError::Failed(reason),
                    });
                }
                ProcessorError::Failed(message) => {
                    warn!(processor = %name, %hook, error = %message, "Processor failed");
                    slot.status.failures += 1;
                    outcome.failures.push(HookFailure {
                        processor: name,
                        hook,
                        error: ProcessorError::Failed(message),
                    });
                }
                ProcessorError::Fatal(message) => {
                    error!(processor = %name, %hook, error = %message, "Processor raised fatal error");
                    slot.status.fatal = true;
                    let failure = HookFailure {
                        processor: name,
                        hook,
                        error: ProcessorError::Fatal(message),
                    };
                    if outcome.fatal.is_none() {
                        outcome.fatal = Some(failure);
                    } else {
                        outcome.failures.push(failure);
                    }
                }
            }
        }
        outcome
    }
}
