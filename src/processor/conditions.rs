//! Per-run conditions activation.
//!
//! The calibration system is an external collaborator. The loop only needs to
//! tell it which run is starting, which it does through [`ConditionsService`].

use std::error::Error as StdError;

use tracing::{debug, info, warn};

use crate::classify::{RecordKind, TagConvention};
use crate::codec::head_bank_run_number;
use crate::error::ProcessorError;
use crate::processor::{ProcessorResult, RecordProcessor};
use crate::record::Record;

/// Error type returned by conditions services.
pub type ConditionsError = Box<dyn StdError + Send + Sync>;

/// The calibration/conditions system, reduced to what the loop uses.
pub trait ConditionsService: Send {
    /// Load per-run state for `run`.
    fn activate(&mut self, run: u32) -> Result<(), ConditionsError>;
}

impl<F> ConditionsService for F
where
    F: FnMut(u32) -> Result<(), ConditionsError> + Send,
{
    fn activate(&mut self, run: u32) -> Result<(), ConditionsError> {
        self(run)
    }
}

type RunHint = Box<dyn Fn(&Record) -> Option<u32> + Send>;

/// Activates conditions from start-of-run records.
///
/// When the start-of-run record was missed (a file that begins mid-run), the
/// activator can fall back to a run number carried by ordinary records; see
/// [`with_data_fallback`](Self::with_data_fallback).
pub struct ConditionsActivator<S> {
    service: S,
    convention: TagConvention,
    active: Option<u32>,
    hint: Option<RunHint>,
    fatal_on_error: bool,
}

impl<S: ConditionsService> ConditionsActivator<S> {
    /// Wrap a service. Activation failures are fatal by default.
    pub fn new(service: S) -> Self {
        Self {
            service,
            convention: TagConvention::default(),
            active: None,
            hint: None,
            fatal_on_error: true,
        }
    }

    /// Activate from the head bank when no start-of-run record was seen.
    pub fn with_data_fallback(self) -> Self {
        self.with_run_hint(head_bank_run_number)
    }

    /// Activate from a custom run-number extractor when no start-of-run record
    /// was seen.
    pub fn with_run_hint<F>(mut self, hint: F) -> Self
    where
        F: Fn(&Record) -> Option<u32> + Send + 'static,
    {
        self.hint = Some(Box::new(hint));
        self
    }

    /// Report activation failures as recoverable instead of fatal.
    pub fn tolerate_failures(mut self) -> Self {
        self.fatal_on_error = false;
        self
    }

    /// Classify with a non-default tag convention.
    pub fn with_convention(mut self, convention: TagConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Run whose conditions are loaded.
    pub fn active_run(&self) -> Option<u32> {
        self.active
    }

    /// The wrapped service.
    pub fn service(&self) -> &S {
        &self.service
    }

    fn activate(&mut self, run: u32, origin: &str) -> ProcessorResult {
        if self.active == Some(run) {
            debug!(run, "Conditions already active");
            return Ok(());
        }
        match self.service.activate(run) {
            Ok(()) => {
                info!(run, origin, "Activated conditions");
                self.active = Some(run);
                Ok(())
            }
            Err(e) => {
                let message = format!("conditions activation for run {run} failed: {e}");
                if self.fatal_on_error {
                    Err(ProcessorError::Fatal(message))
                } else {
                    Err(ProcessorError::Failed(message))
                }
            }
        }
    }
}

impl<S: ConditionsService> RecordProcessor for ConditionsActivator<S> {
    fn name(&self) -> &str {
        "conditions"
    }

    fn start_run(&mut self, record: &Record) -> ProcessorResult {
        match record.control_words() {
            Some(words) => self.activate(words.value, "start_of_run"),
            None => {
                warn!(tag = record.tag(), "Start-of-run record carries no run number");
                Err(ProcessorError::failed("start-of-run record without run number"))
            }
        }
    }

    fn process(&mut self, record: &Record) -> ProcessorResult {
        if self.active.is_some() || self.convention.classify(record) == RecordKind::StartOfRun {
            return Ok(());
        }
        let run = self.hint.as_ref().and_then(|hint| hint(record));
        match run {
            Some(run) => self.activate(run, "record_data"),
            None => Ok(()),
        }
    }

    fn end_job(&mut self) -> ProcessorResult {
        self.active = None;
        Ok(())
    }
}
