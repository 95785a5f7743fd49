//! Concurrent stream-reading engine.
//!
//! Streams are split into partitions by generator tasks; reader tasks drain
//! partitions into a bounded shared queue; a single-threaded coordinator
//! turns queue items into ordered protocol messages and decides when every
//! stream, and the read as a whole, is finished.

pub mod config;
pub mod cursor;
pub mod enqueuer;
pub mod errors;
pub mod memory;
pub mod partition;
pub mod processor;
pub mod queue;
pub mod reader;
pub mod repository;
pub mod slice_logger;
pub mod source;
pub mod stream;
pub mod thread_pool;

// Re-export public API for convenience
pub use errors::ReadError;
pub use partition::{Partition, PartitionId, Record, RecordData};
pub use processor::ConcurrentReadProcessor;
pub use repository::{InMemoryMessageRepository, MessageRepository, NoopMessageRepository};
pub use source::{ConcurrentRead, ConcurrentSource};
pub use stream::{AbstractStream, Cursor};
