//! Live record source backed by a [`BoundedRecordQueue`].

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::SourceError;
use crate::queue::BoundedRecordQueue;
use crate::record::Record;
use crate::source::receiver::QueueReceiver;
use crate::source::{Fetch, RecordSource};

/// Default wait for a record before the loop gets control back.
pub const DEFAULT_POP_TIMEOUT: Duration = Duration::from_millis(100);

/// Pops records that a transport receiver pushed into a shared queue.
///
/// A pop that times out yields [`Fetch::Pending`], which gives the loop a chance to
/// honour stop and pause requests. Once the queue is closed and drained the source
/// reports [`SourceError::TransportClosed`]; a live session has no natural end.
pub struct BoundedQueueSource {
    name: String,
    queue: Arc<BoundedRecordQueue>,
    pop_timeout: Duration,
    receiver: Option<QueueReceiver>,
    current: Option<Record>,
}

impl BoundedQueueSource {
    /// Create a source over `queue`.
    pub fn new(name: impl Into<String>, queue: Arc<BoundedRecordQueue>) -> Self {
        Self {
            name: name.into(),
            queue,
            pop_timeout: DEFAULT_POP_TIMEOUT,
            receiver: None,
            current: None,
        }
    }

    /// Set the pop wait.
    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    /// Attach the receiver that feeds the queue so its decode failures are
    /// reported through this source.
    pub fn with_receiver(mut self, receiver: QueueReceiver) -> Self {
        self.receiver = Some(receiver);
        self
    }

    /// The shared queue.
    pub fn queue(&self) -> &Arc<BoundedRecordQueue> {
        &self.queue
    }

    /// Discard every queued record.
    pub fn clear(&self) -> usize {
        let removed = self.queue.clear();
        debug!(source = %self.name, removed, "Cleared record queue");
        removed
    }
}

impl RecordSource for BoundedQueueSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_next(&self) -> bool {
        !self.queue.is_closed() || !self.queue.is_empty()
    }

    fn next(&mut self) -> Result<Fetch, SourceError> {
        match self.queue.pop(self.pop_timeout) {
            Some(entry) => {
                self.current = Some(entry.record.clone());
                Ok(Fetch::Record(entry.record))
            }
            None if self.queue.is_closed() && self.queue.is_empty() => {
                self.current = None;
                Err(SourceError::TransportClosed(self.name.clone()))
            }
            None => Ok(Fetch::Pending),
        }
    }

    fn current(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    fn decode_errors(&self) -> u64 {
        self.receiver
            .as_ref()
            .map_or(0, |receiver| receiver.stats().decode_errors)
    }

    fn dropped(&self) -> u64 {
        self.queue.stats().lost()
    }
}

impl Drop for BoundedQueueSource {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}
