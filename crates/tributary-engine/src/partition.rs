//! Partitions: the unit of work handed to reader threads.
//!
//! A partition covers one slice of one stream. It is created by the
//! stream's partition generator, travels to the coordinator through the
//! shared queue, is moved into exactly one reader task, and comes back to
//! the coordinator inside its completion sentinel to be closed.

use std::fmt;

use tributary_types::{ConnectorError, StreamName};

/// Record payload: one JSON object.
pub type RecordData = serde_json::Map<String, serde_json::Value>;

/// Lazy sequence of records produced by a partition.
pub type RecordIter<'a> = Box<dyn Iterator<Item = Result<Record, ConnectorError>> + 'a>;

/// Identity assigned by the coordinator when a partition is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(u64);

impl PartitionId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// One data item read from a partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub stream_name: StreamName,
    pub data: RecordData,
}

impl Record {
    #[must_use]
    pub fn new(stream_name: impl Into<StreamName>, data: RecordData) -> Self {
        Self {
            stream_name: stream_name.into(),
            data,
        }
    }
}

/// A bounded, readable slice of a stream.
///
/// Implementations are read by a single worker thread and closed by the
/// coordinator, so they need to be `Send` but never `Sync`.
pub trait Partition: Send {
    /// Name of the stream this partition belongs to.
    fn stream_name(&self) -> &str;

    /// Slice descriptor, used for slice logging and cursor state.
    fn to_slice(&self) -> Option<serde_json::Value>;

    /// Records in this partition, in order.
    fn read(&mut self) -> RecordIter<'_>;

    /// Release any held resources.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

impl fmt::Debug for dyn Partition + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("stream", &self.stream_name())
            .field("slice", &self.to_slice())
            .field("closed", &self.is_closed())
            .finish()
    }
}
