//! Partition generation on worker threads.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tributary_types::{ConnectorError, StreamName};

use crate::queue::{PartitionGenerationCompletedSentinel, QueueItem, QueueSender};
use crate::stream::AbstractStream;
use crate::thread_pool::{PoolTask, TaskTracker};

/// Pushes a stream's partitions onto the shared queue, holding back while
/// too many tasks are in flight.
#[derive(Debug, Clone)]
pub struct PartitionEnqueuer {
    queue: QueueSender,
    tracker: Arc<TaskTracker>,
    backoff: Duration,
}

impl PartitionEnqueuer {
    #[must_use]
    pub fn new(queue: QueueSender, tracker: Arc<TaskTracker>, backoff: Duration) -> Self {
        Self {
            queue,
            tracker,
            backoff,
        }
    }

    /// Enqueue every partition of `stream`.
    ///
    /// The completion sentinel is not posted here; the pool wrapper posts it
    /// after this returns, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns the stream's generation error, or an internal error if the
    /// queue closed or the pool shut down.
    pub fn generate_partitions(&self, stream: &dyn AbstractStream) -> Result<(), ConnectorError> {
        let mut enqueued = 0_u64;
        for partition in stream.generate_partitions()? {
            let partition = partition?;
            while self.tracker.prune_to_validate_has_reached_futures_limit() {
                if self.tracker.is_cancelled() {
                    return Err(ConnectorError::internal(
                        "POOL_SHUTDOWN",
                        "worker pool shut down during partition generation",
                    ));
                }
                thread::sleep(self.backoff);
            }
            self.queue.put(QueueItem::Partition(partition))?;
            enqueued += 1;
        }
        tracing::debug!(
            stream = stream.name(),
            partitions = enqueued,
            "Partition generation finished"
        );
        Ok(())
    }
}

/// Pool task running one stream's partition generator.
pub struct GeneratePartitionsTask {
    stream: Arc<dyn AbstractStream>,
    stream_name: StreamName,
    enqueuer: PartitionEnqueuer,
}

impl GeneratePartitionsTask {
    #[must_use]
    pub fn new(stream: Arc<dyn AbstractStream>, enqueuer: PartitionEnqueuer) -> Self {
        let stream_name = StreamName::new(stream.name());
        Self {
            stream,
            stream_name,
            enqueuer,
        }
    }
}

impl PoolTask for GeneratePartitionsTask {
    fn stream_name(&self) -> &StreamName {
        &self.stream_name
    }

    fn run(&mut self) -> Result<(), ConnectorError> {
        self.enqueuer.generate_partitions(self.stream.as_ref())
    }

    fn into_terminal(self: Box<Self>, _succeeded: bool) -> QueueItem {
        QueueItem::PartitionGenerationCompleted(PartitionGenerationCompletedSentinel {
            stream: self.stream,
        })
    }
}
