//! Error types for the record loop.
//!
//! Each failure domain gets its own `thiserror` enum so that callers can tell a
//! recoverable condition from one that must end the session:
//!
//! - **`DecodeError`**: a single record could not be decoded. Recoverable by
//!   definition; the owning source consults its [`ErrorPolicy`](crate::error_policy::ErrorPolicy)
//!   and either skips the record or escalates.
//! - **`SourceError`**: the source can no longer produce records (file unreadable,
//!   decode failures escalated, transport gone). Always fatal for the loop.
//! - **`ProcessorError`**: returned from processor hooks. `Failed` is collected and
//!   reported, `Fatal` aborts the loop once the whole chain has seen the record, and
//!   `StopLoop` is the control signal reserved for the end-of-run sentinel.
//! - **`ChainError`**: processor registration rejected at configuration time.
//! - **`LoopError`**: what [`RecordLoop::run`](crate::record_loop::RecordLoop::run) surfaces
//!   to its caller after `end_job` has been dispatched.
//! - **`ConfigError`**: configuration could not be loaded or failed validation.

use std::path::PathBuf;

use thiserror::Error;

use crate::control::LoopState;

/// Convenience alias for results produced by the record loop.
pub type LoopResult<T> = std::result::Result<T, LoopError>;

/// A single record failed to decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the announced frame length.
    #[error("truncated record: expected {expected} bytes, found {actual}")]
    Truncated { expected: usize, actual: usize },

    /// The frame is too short to carry a bank header.
    #[error("record too short for a bank header ({len} bytes)")]
    MissingHeader { len: usize },

    /// The length word disagrees with the bytes handed to the decoder.
    #[error("length word announces {announced} words but frame holds {actual}")]
    LengthMismatch { announced: usize, actual: usize },

    /// Any other decoder-specific failure.
    #[error("malformed record: {0}")]
    Malformed(String),
}

/// Fatal failure of a record source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// A file in the list could not be opened or mapped.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The error policy escalated repeated decode failures.
    #[error("aborting after {consecutive} consecutive decode errors in '{origin}': {last}")]
    DecodeAborted {
        origin: String,
        consecutive: u32,
        last: DecodeError,
    },

    /// The live transport receiver is gone and the queue has drained.
    #[error("transport closed: {0}")]
    TransportClosed(String),
}

/// Error or signal returned from a processor hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// Recoverable failure; logged and counted, processing continues.
    #[error("processor failed: {0}")]
    Failed(String),

    /// Unrecoverable condition; the loop terminates after the current record.
    #[error("fatal processor error: {0}")]
    Fatal(String),

    /// Control signal asking the loop to stop after the current record.
    #[error("stop requested: {0}")]
    StopLoop(String),
}

impl ProcessorError {
    /// Shorthand for a recoverable failure.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Shorthand for a fatal failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// Processor registration rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Something was registered after the end-of-run sentinel.
    #[error("processor '{rejected}' cannot be registered after end-of-run sentinel '{sentinel}'")]
    SentinelNotLast { sentinel: String, rejected: String },

    /// A second sentinel was offered.
    #[error("end-of-run sentinel '{existing}' already registered; rejected '{rejected}'")]
    DuplicateSentinel { existing: String, rejected: String },
}

/// Failure surfaced by the record loop.
#[derive(Error, Debug)]
pub enum LoopError {
    /// `run` was called on a loop that is not idle.
    #[error("record loop cannot start: loop is {0}")]
    InvalidState(LoopState),

    /// The record source failed.
    #[error("record source failed: {0}")]
    Source(#[from] SourceError),

    /// A processor raised a fatal error.
    #[error("processor '{processor}' raised a fatal error: {message}")]
    ProcessorFatal { processor: String, message: String },

    /// The loop thread could not be spawned.
    #[error("failed to spawn record loop thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The loop thread panicked.
    #[error("record loop thread panicked: {0}")]
    Panicked(String),
}

/// Configuration could not be loaded or is invalid.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Parsing or extraction failed.
    #[error("Configuration error: {0}")]
    Load(#[from] Box<figment::Error>),

    /// Values parsed but are semantically wrong.
    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        ConfigError::Load(Box::new(value))
    }
}
