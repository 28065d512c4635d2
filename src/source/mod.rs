//! Record sources feeding the loop.
//!
//! A [`RecordSource`] hands out decoded records one at a time. Two forms exist:
//!
//! - [`SequentialFileSource`]: walks an ordered list of files and presents them
//!   as one continuous stream.
//! - [`BoundedQueueSource`]: pops from a [`BoundedRecordQueue`](crate::queue::BoundedRecordQueue)
//!   that a transport receiver task fills asynchronously.
//!
//! Recoverable decode failures are absorbed inside the source according to its
//! [`ErrorPolicy`](crate::error_policy::ErrorPolicy); only fatal conditions come
//! back as [`SourceError`].

pub mod file;
pub mod queue;
pub mod receiver;

pub use file::SequentialFileSource;
pub use queue::BoundedQueueSource;
pub use receiver::{MessageStream, QueueReceiver, ReceiverStats, StreamMessages};

use crate::error::SourceError;
use crate::record::Record;

/// Outcome of asking a source for its next record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetch {
    /// A record is available.
    Record(Record),
    /// Nothing yet; a live source may still deliver.
    Pending,
    /// The source is exhausted.
    EndOfSource,
}

/// A stream of records.
pub trait RecordSource: Send {
    /// Short label for logs and summaries.
    fn name(&self) -> &str;

    /// True while the source may still produce records.
    fn has_next(&self) -> bool;

    /// Fetch the next record.
    fn next(&mut self) -> Result<Fetch, SourceError>;

    /// The record most recently returned by [`next`](Self::next).
    fn current(&self) -> Option<&Record>;

    /// Records that failed to decode and were skipped.
    fn decode_errors(&self) -> u64 {
        0
    }

    /// Records lost before reaching the loop (queue overflow).
    fn dropped(&self) -> u64 {
        0
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn has_next(&self) -> bool {
        (**self).has_next()
    }

    fn next(&mut self) -> Result<Fetch, SourceError> {
        (**self).next()
    }

    fn current(&self) -> Option<&Record> {
        (**self).current()
    }

    fn decode_errors(&self) -> u64 {
        (**self).decode_errors()
    }

    fn dropped(&self) -> u64 {
        (**self).dropped()
    }
}
