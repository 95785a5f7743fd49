//! In-memory streams and partitions.
//!
//! Backed by fixed record lists, with optional failure injection. Used by
//! the CLI's synthetic sources and by tests.

use tributary_types::{CatalogStream, ConnectorError, SyncMode};

use crate::partition::{Partition, Record, RecordData, RecordIter};
use crate::stream::{AbstractStream, Cursor, PartitionIter};

/// Partition over a fixed list of records.
#[derive(Debug, Clone)]
pub struct InMemoryPartition {
    stream_name: String,
    slice: Option<serde_json::Value>,
    records: Vec<RecordData>,
    failure: Option<(usize, ConnectorError)>,
    closed: bool,
}

impl InMemoryPartition {
    #[must_use]
    pub fn new(
        stream_name: impl Into<String>,
        slice: Option<serde_json::Value>,
        records: Vec<RecordData>,
    ) -> Self {
        Self {
            stream_name: stream_name.into(),
            slice,
            records,
            failure: None,
            closed: false,
        }
    }

    /// Fail with `error` after yielding `after` records.
    #[must_use]
    pub fn with_failure(mut self, after: usize, error: ConnectorError) -> Self {
        self.failure = Some((after, error));
        self
    }
}

impl Partition for InMemoryPartition {
    fn stream_name(&self) -> &str {
        &self.stream_name
    }

    fn to_slice(&self) -> Option<serde_json::Value> {
        self.slice.clone()
    }

    fn read(&mut self) -> RecordIter<'_> {
        let stream = self.stream_name.as_str();
        let rows = self
            .records
            .iter()
            .map(move |data| Ok::<_, ConnectorError>(Record::new(stream, data.clone())));
        match &self.failure {
            Some((after, error)) => {
                Box::new(rows.take(*after).chain(std::iter::once(Err(error.clone()))))
            }
            None => Box::new(rows),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Stream over a fixed list of partitions.
pub struct InMemoryStream {
    name: String,
    partitions: Vec<InMemoryPartition>,
    generation_failure: Option<(usize, ConnectorError)>,
    cursor: Box<dyn Cursor>,
}

impl InMemoryStream {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        partitions: Vec<InMemoryPartition>,
        cursor: Box<dyn Cursor>,
    ) -> Self {
        Self {
            name: name.into(),
            partitions,
            generation_failure: None,
            cursor,
        }
    }

    /// Fail generation with `error` after yielding `after` partitions.
    #[must_use]
    pub fn with_generation_failure(mut self, after: usize, error: ConnectorError) -> Self {
        self.generation_failure = Some((after, error));
        self
    }
}

impl AbstractStream for InMemoryStream {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_partitions(&self) -> Result<PartitionIter<'_>, ConnectorError> {
        let partitions = self
            .partitions
            .iter()
            .map(|p| Ok::<_, ConnectorError>(Box::new(p.clone()) as Box<dyn Partition>));
        Ok(match &self.generation_failure {
            Some((after, error)) => {
                Box::new(partitions.take(*after).chain(std::iter::once(Err(error.clone()))))
            }
            None => Box::new(partitions),
        })
    }

    fn as_catalog_stream(&self) -> CatalogStream {
        CatalogStream {
            name: self.name.clone(),
            namespace: None,
            json_schema: serde_json::json!({ "type": "object" }),
            supported_sync_modes: vec![SyncMode::FullRefresh],
        }
    }

    fn cursor(&self) -> &dyn Cursor {
        self.cursor.as_ref()
    }
}
