//! End-of-run sentinel.

use tracing::info;

use crate::classify::{RecordKind, TagConvention};
use crate::error::ProcessorError;
use crate::processor::{ProcessorResult, RecordProcessor};
use crate::record::Record;

/// Asks the loop to stop when a run ends or a record budget is spent.
///
/// This is the only processor whose [`ProcessorError::StopLoop`] the chain
/// honours, and it must be registered last so every other processor has seen
/// the record before the loop winds down.
#[derive(Debug, Clone)]
pub struct EndRunSentinel {
    convention: TagConvention,
    stop_on_end: bool,
    budget: Option<u64>,
    seen: u64,
}

impl Default for EndRunSentinel {
    fn default() -> Self {
        Self::new()
    }
}

impl EndRunSentinel {
    /// Stop on end-of-run records.
    pub fn new() -> Self {
        Self {
            convention: TagConvention::default(),
            stop_on_end: true,
            budget: None,
            seen: 0,
        }
    }

    /// Also stop once `records` records have been processed.
    pub fn with_budget(mut self, records: u64) -> Self {
        self.budget = Some(records);
        self
    }

    /// Enable or disable stopping on end-of-run records.
    pub fn stop_on_end(mut self, enabled: bool) -> Self {
        self.stop_on_end = enabled;
        self
    }

    /// Classify with a non-default tag convention.
    pub fn with_convention(mut self, convention: TagConvention) -> Self {
        self.convention = convention;
        self
    }

    /// Records seen so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl RecordProcessor for EndRunSentinel {
    fn name(&self) -> &str {
        "end-run-sentinel"
    }

    fn start_job(&mut self) -> ProcessorResult {
        self.seen = 0;
        Ok(())
    }

    fn process(&mut self, record: &Record) -> ProcessorResult {
        self.seen += 1;
        if self.stop_on_end && self.convention.classify(record) == RecordKind::EndOfRun {
            let run = record.control_words().map(|c| c.value);
            info!(run = ?run, records = self.seen, "End of run reached");
            return Err(ProcessorError::StopLoop("end of run".to_string()));
        }
        if let Some(budget) = self.budget {
            if self.seen >= budget {
                info!(budget, "Record budget spent");
                return Err(ProcessorError::StopLoop(format!(
                    "record budget of {budget} spent"
                )));
            }
        }
        Ok(())
    }

    fn is_end_run_sentinel(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_on_end_record() {
        let mut sentinel = EndRunSentinel::new();
        assert!(sentinel.process(&Record::new(0xFF50, Vec::<u8>::new())).is_ok());
        assert!(matches!(
            sentinel.process(&Record::new(20, Vec::<u8>::new())),
            Err(ProcessorError::StopLoop(_))
        ));
    }

    #[test]
    fn test_budget_without_end_detection() {
        let mut sentinel = EndRunSentinel::new().stop_on_end(false).with_budget(2);
        assert!(sentinel.process(&Record::new(20, Vec::<u8>::new())).is_ok());
        assert!(sentinel.process(&Record::new(1, Vec::<u8>::new())).is_err());
        assert_eq!(sentinel.seen(), 2);
    }
}
