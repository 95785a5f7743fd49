//! The read coordinator.
//!
//! [`ConcurrentReadProcessor`] turns each item pulled from the shared queue
//! into output messages and tracks the lifecycle of every stream:
//!
//! ```text
//! waiting -> generating -> (partitions running) -> COMPLETE | INCOMPLETE
//! ```
//!
//! It runs on the driver thread only. All of its state is plain owned data;
//! worker threads never see it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tributary_types::message::ErrorTrace;
use tributary_types::{ConnectorError, Message, StreamDescriptor, StreamName, StreamStatus};

use crate::enqueuer::{GeneratePartitionsTask, PartitionEnqueuer};
use crate::errors::ReadError;
use crate::partition::{Partition, PartitionId, Record};
use crate::queue::{
    PartitionCompleteSentinel, PartitionGenerationCompletedSentinel, StreamThreadException,
};
use crate::reader::{PartitionReader, ReadPartitionTask};
use crate::repository::MessageRepository;
use crate::slice_logger::SliceLogger;
use crate::stream::AbstractStream;
use crate::thread_pool::TaskSubmitter;

/// Whether a stream can emit its terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    /// Still waiting, generating, running, or already settled.
    Pending,
    /// Nothing left open.
    Done,
    /// Only failed partitions remain and an exception explains them.
    Failed,
}

pub struct ConcurrentReadProcessor {
    stream_order: Vec<StreamName>,
    stream_instances_to_start: VecDeque<Arc<dyn AbstractStream>>,
    stream_name_to_instance: HashMap<StreamName, Arc<dyn AbstractStream>>,
    streams_currently_generating: HashSet<StreamName>,
    streams_to_running_partitions: HashMap<StreamName, HashSet<PartitionId>>,
    failed_partitions: BTreeMap<PartitionId, Box<dyn Partition>>,
    record_counter: HashMap<StreamName, u64>,
    settled_streams: HashSet<StreamName>,
    exceptions_per_stream: BTreeMap<StreamName, Vec<ConnectorError>>,
    next_partition_id: u64,
    partition_enqueuer: PartitionEnqueuer,
    partition_reader: PartitionReader,
    submitter: Arc<dyn TaskSubmitter>,
    slice_logger: Arc<dyn SliceLogger>,
    message_repository: Arc<dyn MessageRepository>,
}

impl ConcurrentReadProcessor {
    #[must_use]
    pub fn new(
        streams: Vec<Arc<dyn AbstractStream>>,
        partition_enqueuer: PartitionEnqueuer,
        submitter: Arc<dyn TaskSubmitter>,
        slice_logger: Arc<dyn SliceLogger>,
        message_repository: Arc<dyn MessageRepository>,
        partition_reader: PartitionReader,
    ) -> Self {
        let stream_order: Vec<StreamName> =
            streams.iter().map(|s| StreamName::new(s.name())).collect();
        let stream_name_to_instance = stream_order
            .iter()
            .cloned()
            .zip(streams.iter().cloned())
            .collect();
        Self {
            stream_order,
            stream_instances_to_start: streams.into(),
            stream_name_to_instance,
            streams_currently_generating: HashSet::new(),
            streams_to_running_partitions: HashMap::new(),
            failed_partitions: BTreeMap::new(),
            record_counter: HashMap::new(),
            settled_streams: HashSet::new(),
            exceptions_per_stream: BTreeMap::new(),
            next_partition_id: 0,
            partition_enqueuer,
            partition_reader,
            submitter,
            slice_logger,
            message_repository,
        }
    }

    /// Start the next waiting stream's partition generator.
    ///
    /// Returns the stream's STARTED status, or `None` when no stream is
    /// waiting.
    pub fn start_next_partition_generator(&mut self) -> Option<Message> {
        let stream = self.stream_instances_to_start.pop_front()?;
        let stream_name = StreamName::new(stream.name());
        self.streams_currently_generating.insert(stream_name.clone());
        self.submitter.submit(Box::new(GeneratePartitionsTask::new(
            Arc::clone(&stream),
            self.partition_enqueuer.clone(),
        )));
        tracing::info!(stream = %stream_name, "Marking stream as STARTED");
        Some(Message::stream_status(
            stream.as_catalog_stream().descriptor(),
            StreamStatus::Started,
        ))
    }

    /// Dispatch a generated partition to a reader task.
    pub fn on_partition(&mut self, partition: Box<dyn Partition>) -> PartitionId {
        let partition_id = PartitionId::new(self.next_partition_id);
        self.next_partition_id += 1;
        let stream_name = StreamName::new(partition.stream_name());

        if self.slice_logger.should_log_slice_message() {
            let slice = partition.to_slice();
            self.message_repository
                .emit_message(self.slice_logger.create_slice_log_message(slice.as_ref()));
        }

        self.streams_to_running_partitions
            .entry(stream_name)
            .or_default()
            .insert(partition_id);
        self.submitter.submit(Box::new(ReadPartitionTask::new(
            partition_id,
            partition,
            self.partition_reader.clone(),
        )));
        partition_id
    }

    /// A stream's generator finished.
    pub fn on_partition_generation_completed(
        &mut self,
        sentinel: PartitionGenerationCompletedSentinel,
    ) -> Vec<Message> {
        let stream_name = StreamName::new(sentinel.stream.name());
        self.streams_currently_generating.remove(&stream_name);

        let mut messages = Vec::new();
        if !self.stream_instances_to_start.is_empty() {
            messages.extend(self.start_next_partition_generator());
        }
        messages.extend(self.drain_and_settle(&stream_name));
        messages
    }

    /// A reader task finished with its partition.
    ///
    /// Successful partitions are checkpointed and closed. Unsuccessful ones
    /// are kept open, so their stream cannot complete normally.
    pub fn on_partition_complete_sentinel(
        &mut self,
        sentinel: PartitionCompleteSentinel,
    ) -> Vec<Message> {
        let PartitionCompleteSentinel {
            partition_id,
            mut partition,
            is_successful,
        } = sentinel;
        let stream_name = StreamName::new(partition.stream_name());
        let mut messages = Vec::new();

        if is_successful {
            if let Some(stream) = self.stream_name_to_instance.get(&stream_name).cloned() {
                if let Err(error) = stream.cursor().close_partition(partition.as_ref()) {
                    messages.extend(
                        self.on_exception(StreamThreadException::new(stream_name.clone(), error)),
                    );
                }
            }
            partition.close();
            if let Some(running) = self.streams_to_running_partitions.get_mut(&stream_name) {
                running.remove(&partition_id);
            }
        } else {
            tracing::warn!(
                stream = %stream_name,
                partition = %partition_id,
                "Partition completed unsuccessfully; leaving it open"
            );
            self.failed_partitions.insert(partition_id, partition);
        }

        messages.extend(self.drain_and_settle(&stream_name));
        messages
    }

    /// A record arrived. The first record of a stream marks it RUNNING.
    pub fn on_record(&mut self, record: Record) -> Vec<Message> {
        let Record { stream_name, data } = record;
        let count = self.record_counter.entry(stream_name.clone()).or_insert(0);
        *count += 1;
        let first_record = *count == 1;

        let mut messages = Vec::new();
        if first_record {
            tracing::info!(stream = %stream_name, "Marking stream as RUNNING");
            messages.push(Message::stream_status(
                self.descriptor_for(&stream_name),
                StreamStatus::Running,
            ));
        }
        messages.push(Message::record(stream_name.as_str(), data));
        messages.extend(self.message_repository.consume_queue());
        messages
    }

    /// Package a worker failure as one ERROR trace and remember it against
    /// its stream. The stream will end INCOMPLETE and `is_done` will raise.
    pub fn on_exception(&mut self, exception: StreamThreadException) -> Vec<Message> {
        tracing::error!(
            stream = %exception.stream_name,
            error = %exception.error,
            "Exception while syncing stream"
        );
        let trace = ErrorTrace {
            message: format!(
                "During the sync, stream '{}' failed: {}",
                exception.stream_name, exception.error.message
            ),
            internal_message: Some(exception.to_string()),
            stack_trace: Some(exception.stack_trace()),
            failure_type: exception.error.failure_type(),
            stream_descriptor: Some(self.descriptor_for(&exception.stream_name)),
        };
        self.exceptions_per_stream
            .entry(exception.stream_name)
            .or_default()
            .push(exception.error);
        vec![Message::error_trace(trace)]
    }

    /// Whether the read has finished.
    ///
    /// # Errors
    ///
    /// Once no work can make progress, returns
    /// [`ReadError::StreamsFailed`] if exceptions were recorded, or
    /// [`ReadError::StuckPartitions`] if only unsuccessfully completed
    /// partitions remain.
    pub fn is_done(&self) -> Result<bool, ReadError> {
        if !self.stream_instances_to_start.is_empty()
            || !self.streams_currently_generating.is_empty()
        {
            return Ok(false);
        }

        let mut stuck: Vec<StreamName> = Vec::new();
        for stream_name in &self.stream_order {
            let Some(running) = self.streams_to_running_partitions.get(stream_name) else {
                continue;
            };
            if running.iter().any(|id| !self.failed_partitions.contains_key(id)) {
                return Ok(false);
            }
            if !running.is_empty() {
                stuck.push(stream_name.clone());
            }
        }

        if !self.exceptions_per_stream.is_empty() {
            return Err(self.streams_failed_error());
        }
        if !stuck.is_empty() {
            return Err(ReadError::StuckPartitions { streams: stuck });
        }
        Ok(true)
    }

    /// Abort the read: drain the repository, mark every started stream that
    /// has no terminal status as INCOMPLETE, and shut the pool down.
    pub fn stop_streams(&mut self) -> Vec<Message> {
        let mut messages = self.message_repository.consume_queue();
        for stream_name in self.stream_order.clone() {
            if self.settled_streams.contains(&stream_name) || self.is_waiting_to_start(&stream_name)
            {
                continue;
            }
            messages.push(self.settle(&stream_name, StreamStatus::Incomplete));
        }
        self.submitter.shutdown();
        messages
    }

    /// Error describing every stream that recorded an exception.
    #[must_use]
    pub fn streams_failed_error(&self) -> ReadError {
        let streams: Vec<StreamName> = self.exceptions_per_stream.keys().cloned().collect();
        let details = self
            .exceptions_per_stream
            .iter()
            .map(|(name, errors)| {
                let errors: Vec<String> = errors.iter().map(ToString::to_string).collect();
                format!("{name}: [{}]", errors.join("; "))
            })
            .collect::<Vec<_>>()
            .join(", ");
        ReadError::StreamsFailed {
            streams,
            message: format!(
                "During the sync, the following streams did not sync successfully: {details}"
            ),
        }
    }

    /// Partitions dispatched for `stream` that have not been closed.
    #[must_use]
    pub fn open_partitions(&self, stream: &str) -> usize {
        self.streams_to_running_partitions
            .get(stream)
            .map_or(0, HashSet::len)
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.exceptions_per_stream.is_empty()
    }

    fn is_waiting_to_start(&self, stream_name: &StreamName) -> bool {
        self.stream_instances_to_start
            .iter()
            .any(|s| s.name() == stream_name.as_str())
    }

    fn descriptor_for(&self, stream_name: &StreamName) -> StreamDescriptor {
        self.stream_name_to_instance.get(stream_name).map_or_else(
            || StreamDescriptor::new(stream_name.as_str()),
            |s| s.as_catalog_stream().descriptor(),
        )
    }

    fn settlement(&self, stream_name: &StreamName) -> Settlement {
        if self.settled_streams.contains(stream_name)
            || self.streams_currently_generating.contains(stream_name)
            || self.is_waiting_to_start(stream_name)
            || !self.stream_name_to_instance.contains_key(stream_name)
        {
            return Settlement::Pending;
        }
        let Some(running) = self
            .streams_to_running_partitions
            .get(stream_name)
            .filter(|r| !r.is_empty())
        else {
            return Settlement::Done;
        };
        let only_failed = running.iter().all(|id| self.failed_partitions.contains_key(id));
        if only_failed && self.exceptions_per_stream.contains_key(stream_name) {
            Settlement::Failed
        } else {
            Settlement::Pending
        }
    }

    /// Repository drain, plus the terminal status if the stream settled.
    fn drain_and_settle(&mut self, stream_name: &StreamName) -> Vec<Message> {
        match self.settlement(stream_name) {
            Settlement::Pending => self.message_repository.consume_queue(),
            Settlement::Done => self.on_stream_is_done(stream_name),
            Settlement::Failed => {
                let mut messages = self.message_repository.consume_queue();
                messages.push(self.settle(stream_name, StreamStatus::Incomplete));
                messages
            }
        }
    }

    fn on_stream_is_done(&mut self, stream_name: &StreamName) -> Vec<Message> {
        let records = self.record_counter.get(stream_name).copied().unwrap_or(0);
        tracing::info!(stream = %stream_name, records, "Read records from stream");
        if let Some(stream) = self.stream_name_to_instance.get(stream_name) {
            stream.cursor().ensure_at_least_one_state_emitted();
        }
        let mut messages = self.message_repository.consume_queue();
        let status = if self.exceptions_per_stream.contains_key(stream_name) {
            StreamStatus::Incomplete
        } else {
            StreamStatus::Complete
        };
        messages.push(self.settle(stream_name, status));
        messages
    }

    fn settle(&mut self, stream_name: &StreamName, status: StreamStatus) -> Message {
        self.settled_streams.insert(stream_name.clone());
        tracing::info!(stream = %stream_name, status = ?status, "Marking stream as done");
        Message::stream_status(self.descriptor_for(stream_name), status)
    }
}

impl std::fmt::Debug for ConcurrentReadProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrentReadProcessor")
            .field("to_start", &self.stream_instances_to_start.len())
            .field("generating", &self.streams_currently_generating)
            .field("running", &self.streams_to_running_partitions)
            .field("failed_partitions", &self.failed_partitions.len())
            .field("settled", &self.settled_streams)
            .finish_non_exhaustive()
    }
}
