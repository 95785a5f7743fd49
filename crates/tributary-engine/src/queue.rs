//! The shared queue between worker threads and the coordinator.
//!
//! Many producers (generator and reader tasks) push [`QueueItem`]s; the
//! driver is the single consumer. The channel is bounded so producers block
//! when the coordinator falls behind.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use tributary_types::{ConnectorError, StreamName};

use crate::errors::ReadError;
use crate::partition::{Partition, PartitionId, Record};
use crate::stream::AbstractStream;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Posted once a stream's partition generator has finished, successfully or not.
#[derive(Debug)]
pub struct PartitionGenerationCompletedSentinel {
    pub stream: Arc<dyn AbstractStream>,
}

/// Posted once a reader task has finished with its partition.
///
/// The partition travels back to the coordinator here so it can be closed.
#[derive(Debug)]
pub struct PartitionCompleteSentinel {
    pub partition_id: PartitionId,
    pub partition: Box<dyn Partition>,
    pub is_successful: bool,
}

/// An error raised on a worker thread, tagged with the stream it belongs to.
#[derive(Debug, Clone, thiserror::Error)]
#[error("StreamThreadException in stream '{stream_name}': {error}")]
pub struct StreamThreadException {
    pub stream_name: StreamName,
    #[source]
    pub error: ConnectorError,
}

impl StreamThreadException {
    #[must_use]
    pub fn new(stream_name: impl Into<StreamName>, error: ConnectorError) -> Self {
        Self {
            stream_name: stream_name.into(),
            error,
        }
    }

    /// Multi-line description used as the stack trace of ERROR traces.
    #[must_use]
    pub fn stack_trace(&self) -> String {
        let mut trace = format!(
            "StreamThreadException: stream '{}'\nCaused by: ConnectorError {}",
            self.stream_name, self.error
        );
        if let Some(details) = &self.error.details {
            trace.push_str(&format!("\nDetails: {details}"));
        }
        trace
    }
}

/// Everything that can travel through the shared queue.
#[derive(Debug)]
pub enum QueueItem {
    Partition(Box<dyn Partition>),
    Record(Record),
    PartitionGenerationCompleted(PartitionGenerationCompletedSentinel),
    PartitionComplete(PartitionCompleteSentinel),
    Exception(StreamThreadException),
}

/// The coordinator stopped consuming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("shared queue receiver was dropped")]
pub struct QueueClosed;

impl From<QueueClosed> for ConnectorError {
    fn from(err: QueueClosed) -> Self {
        ConnectorError::internal("QUEUE_CLOSED", err.to_string())
    }
}

/// Create a bounded queue.
#[must_use]
pub fn shared_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    (QueueSender { inner: tx }, QueueReceiver { inner: rx })
}

/// Producer half. Cloned into every worker task.
#[derive(Debug, Clone)]
pub struct QueueSender {
    inner: SyncSender<QueueItem>,
}

impl QueueSender {
    /// Push an item, blocking while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] once the receiver has been dropped.
    pub fn put(&self, item: QueueItem) -> Result<(), QueueClosed> {
        self.inner.send(item).map_err(|_| QueueClosed)
    }
}

/// Consumer half, owned by the driver.
#[derive(Debug)]
pub struct QueueReceiver {
    inner: Receiver<QueueItem>,
}

impl QueueReceiver {
    /// Wait up to `timeout` for the next item.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::QueueTimeout`] if nothing arrives in time, or
    /// [`ReadError::QueueDisconnected`] if every sender is gone.
    pub fn get(&self, timeout: Duration) -> Result<QueueItem, ReadError> {
        self.inner.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => ReadError::QueueTimeout(timeout),
            RecvTimeoutError::Disconnected => ReadError::QueueDisconnected,
        })
    }

    /// Next item if one is already queued.
    #[must_use]
    pub fn try_get(&self) -> Option<QueueItem> {
        self.inner.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(stream: &str) -> QueueItem {
        QueueItem::Record(Record::new(stream, serde_json::Map::new()))
    }

    #[test]
    fn items_arrive_in_fifo_order() {
        let (tx, rx) = shared_queue(4);
        tx.put(record("a")).unwrap();
        tx.put(record("b")).unwrap();
        let first = rx.get(Duration::from_millis(10)).unwrap();
        let second = rx.try_get().unwrap();
        assert!(matches!(first, QueueItem::Record(r) if r.stream_name.as_str() == "a"));
        assert!(matches!(second, QueueItem::Record(r) if r.stream_name.as_str() == "b"));
        assert!(rx.try_get().is_none());
    }

    #[test]
    fn get_times_out_when_empty() {
        let (_tx, rx) = shared_queue(1);
        let err = rx.get(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, ReadError::QueueTimeout(_)));
    }

    #[test]
    fn get_reports_disconnect() {
        let (tx, rx) = shared_queue(1);
        drop(tx);
        let err = rx.get(Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, ReadError::QueueDisconnected));
    }

    #[test]
    fn put_fails_after_receiver_dropped() {
        let (tx, rx) = shared_queue(1);
        drop(rx);
        assert_eq!(tx.put(record("a")).unwrap_err(), QueueClosed);
        let converted: ConnectorError = QueueClosed.into();
        assert_eq!(converted.code, "QUEUE_CLOSED");
    }

    #[test]
    fn put_blocks_until_consumer_catches_up() {
        let (tx, rx) = shared_queue(1);
        tx.put(record("a")).unwrap();
        let producer = std::thread::spawn(move || tx.put(record("b")));
        let first = rx.get(Duration::from_secs(5)).unwrap();
        let second = rx.get(Duration::from_secs(5)).unwrap();
        assert!(producer.join().unwrap().is_ok());
        assert!(matches!(first, QueueItem::Record(_)));
        assert!(matches!(second, QueueItem::Record(_)));
    }

    #[test]
    fn exception_identifies_stream_and_type() {
        let exc = StreamThreadException::new("A", ConnectorError::data("BAD_ROW", "boom"));
        let msg = exc.to_string();
        assert!(msg.contains("StreamThreadException"));
        assert!(msg.contains("'A'"));
        let trace = exc.stack_trace();
        assert!(trace.contains("StreamThreadException: stream 'A'"));
        assert!(trace.contains("BAD_ROW"));
    }
}
