//! Transport receiver that feeds a [`BoundedRecordQueue`] from an async message
//! stream.
//!
//! The receiver runs as a tokio task, separate from the loop thread. Each message
//! is decoded and pushed into the queue; the queue's overflow policy decides what
//! happens when the loop falls behind. Messages that fail to decode are dropped and
//! counted, governed by an [`ErrorPolicy`] that defaults to skipping forever. When
//! the stream ends the queue is closed so the consuming source can report it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::codec::RecordDecoder;
use crate::error_policy::{DecodeErrorContext, ErrorAction, ErrorPolicy};
use crate::queue::{BoundedRecordQueue, OverflowPolicy};

/// An async producer of raw record messages.
#[async_trait]
pub trait MessageStream: Send {
    /// Next message, or `None` once the transport is closed.
    async fn next_message(&mut self) -> Option<Bytes>;
}

#[async_trait]
impl MessageStream for mpsc::Receiver<Bytes> {
    async fn next_message(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

#[async_trait]
impl MessageStream for mpsc::UnboundedReceiver<Bytes> {
    async fn next_message(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

/// Adapts any [`Stream`] of messages.
pub struct StreamMessages<S>(pub S);

#[async_trait]
impl<S> MessageStream for StreamMessages<S>
where
    S: Stream<Item = Bytes> + Unpin + Send,
{
    async fn next_message(&mut self) -> Option<Bytes> {
        self.0.next().await
    }
}

/// Counters describing receiver traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReceiverStats {
    /// Messages taken from the transport.
    pub received: u64,
    /// Messages decoded and accepted by the queue.
    pub queued: u64,
    /// Messages that failed to decode.
    pub decode_errors: u64,
    /// Decoded records the queue refused.
    pub rejected: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    queued: AtomicU64,
    decode_errors: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            received: self.received.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a running receiver task.
pub struct QueueReceiver {
    name: String,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl QueueReceiver {
    /// Spawn the receiver on the current tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn spawn<M>(
        name: impl Into<String>,
        stream: M,
        decoder: Arc<dyn RecordDecoder>,
        queue: Arc<BoundedRecordQueue>,
        policy: ErrorPolicy,
    ) -> Self
    where
        M: MessageStream + 'static,
    {
        Self::spawn_on(&Handle::current(), name, stream, decoder, queue, policy)
    }

    /// Spawn the receiver on a specific runtime.
    pub fn spawn_on<M>(
        runtime: &Handle,
        name: impl Into<String>,
        stream: M,
        decoder: Arc<dyn RecordDecoder>,
        queue: Arc<BoundedRecordQueue>,
        policy: ErrorPolicy,
    ) -> Self
    where
        M: MessageStream + 'static,
    {
        let name = name.into();
        let counters = Arc::new(Counters::default());
        let task = runtime.spawn(receive(
            name.clone(),
            stream,
            decoder,
            queue,
            policy,
            Arc::clone(&counters),
        ));
        Self {
            name,
            counters,
            task,
        }
    }

    /// Channel label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> ReceiverStats {
        self.counters.snapshot()
    }

    /// True once the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the task. The queue is left open.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the task to end.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(channel = %self.name, error = %e, "Receiver task panicked");
            }
        }
    }
}

async fn receive<M: MessageStream>(
    name: String,
    mut stream: M,
    decoder: Arc<dyn RecordDecoder>,
    queue: Arc<BoundedRecordQueue>,
    policy: ErrorPolicy,
    counters: Arc<Counters>,
) {
    info!(channel = %name, capacity = queue.capacity(), "Receiver started");
    let mut consecutive = 0u32;

    while let Some(message) = stream.next_message().await {
        counters.received.fetch_add(1, Ordering::Relaxed);

        let record = match decoder.decode(message) {
            Ok(record) => {
                consecutive = 0;
                record
            }
            Err(e) => {
                consecutive += 1;
                let total = counters.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
                let context = DecodeErrorContext {
                    origin: &name,
                    consecutive,
                    total,
                    error: &e,
                };
                match policy.on_decode_error(&context) {
                    ErrorAction::Skip => {
                        warn!(channel = %name, error = %e, total, "Dropping undecodable message");
                        continue;
                    }
                    ErrorAction::Abort => {
                        error!(channel = %name, error = %e, consecutive, "Receiver giving up");
                        break;
                    }
                }
            }
        };

        let accepted = if queue.overflow() == OverflowPolicy::Block {
            let queue = Arc::clone(&queue);
            match tokio::task::spawn_blocking(move || queue.push(record)).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(channel = %name, error = %e, "Blocking push failed");
                    false
                }
            }
        } else {
            queue.push(record)
        };

        if accepted {
            counters.queued.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %name, "Queue refused record");
        }
    }

    queue.close();
    let stats = counters.snapshot();
    info!(
        channel = %name,
        received = stats.received,
        queued = stats.queued,
        decode_errors = stats.decode_errors,
        rejected = stats.rejected,
        "Receiver stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_event, BankDecoder};
    use std::time::Duration;

    #[tokio::test]
    async fn test_decodes_and_queues_until_stream_ends() {
        let queue = Arc::new(BoundedRecordQueue::default());
        let (tx, rx) = mpsc::channel(8);
        let receiver = QueueReceiver::spawn(
            "test",
            rx,
            Arc::new(BankDecoder),
            Arc::clone(&queue),
            ErrorPolicy::live_default(),
        );

        tx.send(Bytes::from(encode_event(0xFF50, 1, &[]))).await.unwrap();
        tx.send(Bytes::from_static(&[0, 0, 0, 0])).await.unwrap();
        tx.send(Bytes::from(encode_event(0xFF50, 2, &[]))).await.unwrap();
        drop(tx);

        let stats = {
            let counters = Arc::clone(&receiver.counters);
            receiver.join().await;
            counters.snapshot()
        };
        assert_eq!(stats.received, 3);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.decode_errors, 1);
        assert!(queue.is_closed());

        let first = queue.try_pop().unwrap();
        assert_eq!(first.record.sequence(), Some(1));
        assert_eq!(queue.try_pop().unwrap().record.sequence(), Some(2));
    }

    #[tokio::test]
    async fn test_abort_policy_closes_queue_on_first_failure() {
        let queue = Arc::new(BoundedRecordQueue::default());
        let messages = futures::stream::iter(vec![
            Bytes::from_static(&[0, 0, 0, 0]),
            Bytes::from(encode_event(0xFF50, 1, &[])),
        ]);
        let receiver = QueueReceiver::spawn(
            "strict",
            StreamMessages(messages),
            Arc::new(BankDecoder),
            Arc::clone(&queue),
            ErrorPolicy::Abort,
        );
        tokio::time::timeout(Duration::from_secs(5), receiver.join())
            .await
            .unwrap();
        assert!(queue.is_closed());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stream_adapter_yields_messages_in_order() {
        let mut messages = StreamMessages(futures::stream::iter(vec![
            Bytes::from_static(b"first"),
            Bytes::from_static(b"second"),
        ]));
        tokio_test::block_on(async {
            assert_eq!(messages.next_message().await, Some(Bytes::from_static(b"first")));
            assert_eq!(messages.next_message().await, Some(Bytes::from_static(b"second")));
            assert_eq!(messages.next_message().await, None);
        });
    }
}
