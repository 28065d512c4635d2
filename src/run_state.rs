//! Run state as driven by classified records.

use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

use crate::classify::RecordKind;
use crate::record::Record;

/// Data-taking state of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No start-of-run record seen yet.
    #[default]
    NotStarted,
    /// Between start-of-run (or resume) and pause or end.
    Running,
    /// Between pause and resume.
    Paused,
    /// End-of-run seen, or the loop was stopped.
    Ended,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not_started"),
            RunState::Running => write!(f, "running"),
            RunState::Paused => write!(f, "paused"),
            RunState::Ended => write!(f, "ended"),
        }
    }
}

/// Tracks the run state and run number over one loop lifetime.
#[derive(Debug, Clone, Default)]
pub struct RunTracker {
    state: RunState,
    run: Option<u32>,
    runs_started: u32,
}

impl RunTracker {
    /// Fresh tracker in `NotStarted`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run number from the latest start-of-run record.
    pub fn run(&self) -> Option<u32> {
        self.run
    }

    /// Start-of-run records seen.
    pub fn runs_started(&self) -> u32 {
        self.runs_started
    }

    /// Apply a classified record. Returns the new state when it changed.
    pub fn observe(&mut self, kind: RecordKind, record: &Record) -> Option<RunState> {
        let next = match (kind, self.state) {
            (_, RunState::Ended) => return None,
            (RecordKind::StartOfRun, current) => {
                let run = record.control_words().map(|w| w.value);
                if matches!(current, RunState::Running | RunState::Paused) {
                    warn!(previous = ?self.run, next = ?run, "Start of run while a run is in progress");
                }
                self.run = run;
                self.runs_started += 1;
                info!(run = ?run, "Run started");
                RunState::Running
            }
            (RecordKind::Pause, RunState::Running) => RunState::Paused,
            (RecordKind::Resume, RunState::Paused) => RunState::Running,
            (RecordKind::EndOfRun, _) => {
                info!(run = ?self.run, "Run ended");
                RunState::Ended
            }
            _ => return None,
        };
        let changed = next != self.state;
        self.state = next;
        changed.then_some(next)
    }

    /// End the run because the loop is terminating without an end-of-run record.
    pub fn abandon(&mut self) {
        if matches!(self.state, RunState::Running | RunState::Paused) {
            warn!(run = ?self.run, "Run abandoned without an end-of-run record");
            self.state = RunState::Ended;
        }
    }
}
