//! Stream and cursor capabilities consumed by the read engine.

use std::fmt;

use tributary_types::{CatalogStream, ConnectorError};

use crate::partition::Partition;

/// Lazy, finite sequence of partitions produced by a stream.
pub type PartitionIter<'a> =
    Box<dyn Iterator<Item = Result<Box<dyn Partition>, ConnectorError>> + 'a>;

/// A named source of records with its own cursor.
///
/// Streams are shared between the coordinator and the generator task
/// running on a worker thread.
pub trait AbstractStream: Send + Sync {
    fn name(&self) -> &str;

    /// Partitions for this stream. Called once per read, on a worker thread.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] if partition generation cannot start.
    /// Failures part-way through are reported as items of the iterator.
    fn generate_partitions(&self) -> Result<PartitionIter<'_>, ConnectorError>;

    /// Catalog description, used to build status messages.
    fn as_catalog_stream(&self) -> CatalogStream;

    fn cursor(&self) -> &dyn Cursor;
}

impl fmt::Debug for dyn AbstractStream + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").field("name", &self.name()).finish()
    }
}

/// Checkpointing capability of a stream.
///
/// Cursors publish state messages through a message repository so the
/// coordinator can interleave them with its own output.
pub trait Cursor: Send + Sync {
    /// Account for a fully read partition.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectorError`] when the partition cannot be folded into
    /// the cursor state (e.g. its slice has no usable boundaries).
    fn close_partition(&self, partition: &dyn Partition) -> Result<(), ConnectorError>;

    /// Guarantee the platform sees a final checkpoint for the stream.
    fn ensure_at_least_one_state_emitted(&self);
}
