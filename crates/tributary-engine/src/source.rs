//! The read driver.
//!
//! [`ConcurrentSource`] wires the shared queue, the worker pool and the
//! coordinator together. [`ConcurrentSource::read`] returns a lazy iterator:
//! each `next()` pulls queue items until the coordinator has output to
//! hand back, so the caller's consumption rate is what throttles the read.

use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::Duration;

use tributary_types::Message;

use crate::config::types::ConcurrencyConfig;
use crate::config::validator::validate_concurrency;
use crate::enqueuer::PartitionEnqueuer;
use crate::errors::ReadError;
use crate::processor::ConcurrentReadProcessor;
use crate::queue::{shared_queue, QueueItem, QueueReceiver};
use crate::reader::PartitionReader;
use crate::repository::MessageRepository;
use crate::slice_logger::SliceLogger;
use crate::stream::AbstractStream;
use crate::thread_pool::ThreadPoolManager;

/// Entry point for concurrent reads.
pub struct ConcurrentSource {
    config: ConcurrencyConfig,
    slice_logger: Arc<dyn SliceLogger>,
    message_repository: Arc<dyn MessageRepository>,
}

impl ConcurrentSource {
    /// Validate `config` and build a source.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Config`] if the concurrency settings are invalid.
    pub fn create(
        config: ConcurrencyConfig,
        slice_logger: Arc<dyn SliceLogger>,
        message_repository: Arc<dyn MessageRepository>,
    ) -> Result<Self, ReadError> {
        validate_concurrency(&config).map_err(ReadError::Config)?;
        Ok(Self {
            config,
            slice_logger,
            message_repository,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ConcurrencyConfig {
        &self.config
    }

    /// Start reading `streams`.
    ///
    /// The first `initial_partition_generators` streams start immediately;
    /// their STARTED statuses are the first items of the returned iterator.
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Runtime`] if the worker pool cannot be started.
    pub fn read(&self, streams: Vec<Arc<dyn AbstractStream>>) -> Result<ConcurrentRead, ReadError> {
        let (sender, receiver) = shared_queue(self.config.queue_capacity);
        let pool = Arc::new(ThreadPoolManager::new(
            self.config.num_workers,
            self.config.max_concurrent_tasks,
            sender.clone(),
        )?);
        let enqueuer = PartitionEnqueuer::new(
            sender.clone(),
            pool.tracker(),
            self.config.generator_backoff(),
        );
        let stream_count = streams.len();
        let mut processor = ConcurrentReadProcessor::new(
            streams,
            enqueuer,
            Arc::clone(&pool) as _,
            Arc::clone(&self.slice_logger),
            Arc::clone(&self.message_repository),
            PartitionReader::new(sender),
        );

        tracing::info!(
            streams = stream_count,
            workers = self.config.num_workers,
            initial_generators = self.config.initial_partition_generators,
            "Starting concurrent read"
        );
        let pending: VecDeque<Message> = (0..self.config.initial_partition_generators)
            .filter_map(|_| processor.start_next_partition_generator())
            .collect();

        Ok(ConcurrentRead {
            processor,
            queue: receiver,
            pool,
            timeout: self.config.timeout(),
            pending,
            failure: None,
            finished: false,
        })
    }
}

/// Output of a running read.
///
/// Yields protocol messages in emission order. A failed read yields its
/// remaining messages (ERROR traces, INCOMPLETE statuses) and then one
/// `Err` as its final item.
pub struct ConcurrentRead {
    processor: ConcurrentReadProcessor,
    queue: QueueReceiver,
    pool: Arc<ThreadPoolManager>,
    timeout: Duration,
    pending: VecDeque<Message>,
    failure: Option<ReadError>,
    finished: bool,
}

impl ConcurrentRead {
    fn step(&mut self) -> Result<(), ReadError> {
        if self.processor.is_done()? {
            if let Some(item) = self.queue.try_get() {
                self.handle(item);
                return Ok(());
            }
            self.pool.check_for_errors_and_shutdown()?;
            tracing::info!("Finished syncing");
            self.finished = true;
            return Ok(());
        }
        let item = self.queue.get(self.timeout)?;
        self.handle(item);
        Ok(())
    }

    fn handle(&mut self, item: QueueItem) {
        match item {
            QueueItem::PartitionGenerationCompleted(sentinel) => {
                let messages = self.processor.on_partition_generation_completed(sentinel);
                self.pending.extend(messages);
            }
            QueueItem::Partition(partition) => {
                self.processor.on_partition(partition);
            }
            QueueItem::PartitionComplete(sentinel) => {
                let messages = self.processor.on_partition_complete_sentinel(sentinel);
                self.pending.extend(messages);
            }
            QueueItem::Record(record) => {
                let messages = self.processor.on_record(record);
                self.pending.extend(messages);
            }
            QueueItem::Exception(exception) => {
                let messages = self.processor.on_exception(exception);
                self.pending.extend(messages);
                let error = self.processor.streams_failed_error();
                self.abort(error);
            }
        }
    }

    /// Stop the read: INCOMPLETE for open streams, then `error` last.
    fn abort(&mut self, error: ReadError) {
        tracing::error!(error = %error, "Aborting read");
        let messages = self.processor.stop_streams();
        self.pending.extend(messages);
        self.failure = Some(error);
        self.finished = true;
    }
}

impl Iterator for ConcurrentRead {
    type Item = Result<Message, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(Ok(message));
            }
            if let Some(error) = self.failure.take() {
                return Some(Err(error));
            }
            if self.finished {
                return None;
            }
            if let Err(error) = self.step() {
                self.abort(error);
            }
        }
    }
}

impl FusedIterator for ConcurrentRead {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::FinalStateCursor;
    use crate::memory::{InMemoryPartition, InMemoryStream};
    use crate::repository::InMemoryMessageRepository;
    use crate::slice_logger::DebugSliceLogger;
    use tributary_types::{ConnectorError, LogLevel, StreamStatus};

    fn source(config: ConcurrencyConfig) -> (ConcurrentSource, Arc<InMemoryMessageRepository>) {
        let repo = Arc::new(InMemoryMessageRepository::new(LogLevel::Info));
        let source = ConcurrentSource::create(config, Arc::new(DebugSliceLogger), repo.clone())
            .unwrap();
        (source, repo)
    }

    fn stream(name: &str, repo: &Arc<InMemoryMessageRepository>, records: usize) -> InMemoryStream {
        let rows = (0..records)
            .map(|i| {
                let mut row = serde_json::Map::new();
                row.insert("id".into(), serde_json::json!(i));
                row
            })
            .collect();
        InMemoryStream::new(
            name,
            vec![InMemoryPartition::new(name, None, rows)],
            Box::new(FinalStateCursor::new(name, repo.clone())),
        )
    }

    fn fast() -> ConcurrencyConfig {
        ConcurrencyConfig {
            num_workers: 2,
            initial_partition_generators: 1,
            timeout_seconds: 10,
            generator_backoff_ms: 1,
            ..ConcurrencyConfig::default()
        }
    }

    #[test]
    fn create_rejects_too_many_generators() {
        let repo = Arc::new(InMemoryMessageRepository::new(LogLevel::Info));
        let config = ConcurrencyConfig {
            num_workers: 2,
            initial_partition_generators: 3,
            ..ConcurrencyConfig::default()
        };
        let result = ConcurrentSource::create(config, Arc::new(DebugSliceLogger), repo);
        assert!(matches!(result, Err(ReadError::Config(_))));
    }

    #[test]
    fn empty_read_finishes_without_output() {
        let (source, _) = source(fast());
        let output: Vec<_> = source.read(Vec::new()).unwrap().collect();
        assert!(output.is_empty());
    }

    #[test]
    fn single_stream_emits_expected_sequence() {
        let (source, repo) = source(fast());
        let output: Vec<Message> = source
            .read(vec![Arc::new(stream("users", &repo, 2))])
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let statuses: Vec<_> = output.iter().filter_map(Message::as_stream_status).collect();
        assert_eq!(
            statuses,
            vec![
                ("users", StreamStatus::Started),
                ("users", StreamStatus::Running),
                ("users", StreamStatus::Complete),
            ]
        );
        assert_eq!(output.iter().filter(|m| m.as_record().is_some()).count(), 2);
        assert_eq!(output.iter().filter(|m| m.as_state().is_some()).count(), 1);
    }

    #[test]
    fn read_failure_ends_with_error_after_incomplete() {
        let (source, repo) = source(fast());
        let failing = InMemoryStream::new(
            "users",
            vec![InMemoryPartition::new("users", None, Vec::new())
                .with_failure(0, ConnectorError::data("BAD_ROW", "boom"))],
            Box::new(FinalStateCursor::new("users", repo.clone())),
        );
        let output: Vec<_> = source.read(vec![Arc::new(failing)]).unwrap().collect();

        let last = output.last().unwrap();
        assert!(matches!(last, Err(ReadError::StreamsFailed { .. })));
        let messages: Vec<&Message> = output.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert!(messages.iter().any(|m| m.as_error_trace().is_some()));
        assert_eq!(
            messages.last().and_then(|m| m.as_stream_status()),
            Some(("users", StreamStatus::Incomplete))
        );
    }
}
