//! Partition reading on worker threads.

use tributary_types::{ConnectorError, StreamName};

use crate::partition::{Partition, PartitionId};
use crate::queue::{PartitionCompleteSentinel, QueueItem, QueueSender};
use crate::thread_pool::PoolTask;

/// Drains a partition's records onto the shared queue.
#[derive(Debug, Clone)]
pub struct PartitionReader {
    queue: QueueSender,
}

impl PartitionReader {
    #[must_use]
    pub fn new(queue: QueueSender) -> Self {
        Self { queue }
    }

    /// Push every record of `partition`, in order. Returns the record count.
    ///
    /// # Errors
    ///
    /// Returns the partition's read error, or an internal error if the queue
    /// closed.
    pub fn process_partition(&self, partition: &mut dyn Partition) -> Result<u64, ConnectorError> {
        let mut count = 0_u64;
        for record in partition.read() {
            self.queue.put(QueueItem::Record(record?))?;
            count += 1;
        }
        Ok(count)
    }
}

/// Pool task reading one partition. The partition returns to the
/// coordinator in the completion sentinel.
pub struct ReadPartitionTask {
    partition_id: PartitionId,
    stream_name: StreamName,
    partition: Box<dyn Partition>,
    reader: PartitionReader,
}

impl ReadPartitionTask {
    #[must_use]
    pub fn new(
        partition_id: PartitionId,
        partition: Box<dyn Partition>,
        reader: PartitionReader,
    ) -> Self {
        let stream_name = StreamName::new(partition.stream_name());
        Self {
            partition_id,
            stream_name,
            partition,
            reader,
        }
    }

    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }
}

impl PoolTask for ReadPartitionTask {
    fn stream_name(&self) -> &StreamName {
        &self.stream_name
    }

    fn run(&mut self) -> Result<(), ConnectorError> {
        let records = self.reader.process_partition(self.partition.as_mut())?;
        tracing::trace!(
            stream = %self.stream_name,
            partition = %self.partition_id,
            records,
            "Partition read"
        );
        Ok(())
    }

    fn into_terminal(self: Box<Self>, succeeded: bool) -> QueueItem {
        QueueItem::PartitionComplete(PartitionCompleteSentinel {
            partition_id: self.partition_id,
            partition: self.partition,
            is_successful: succeeded,
        })
    }
}
