//! Synthetic source definitions.
//!
//! A definition file describes streams by shape (partition count, records
//! per partition, cursor kind) plus optional injected failures, so a read
//! can be exercised without any external system.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Deserialize;
use tributary_engine::config::parser;
use tributary_engine::config::validator::validate_concurrency;
use tributary_engine::config::{ConcurrencyConfig, MessageConfig};
use tributary_engine::cursor::{FinalStateCursor, SliceRangeCursor};
use tributary_engine::memory::{InMemoryPartition, InMemoryStream};
use tributary_engine::stream::Cursor;
use tributary_engine::{AbstractStream, MessageRepository, RecordData};
use tributary_types::ConnectorError;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDefinition {
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub messages: MessageConfig,
    pub streams: Vec<StreamDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorKind {
    /// Single final state when the stream completes.
    #[default]
    None,
    /// Merged slice ranges, checkpointed per partition.
    Slices,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamDefinition {
    pub name: String,
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    #[serde(default = "default_records_per_partition")]
    pub records_per_partition: u32,
    #[serde(default)]
    pub cursor: CursorKind,
    /// Index of a partition that fails half-way through its records.
    #[serde(default)]
    pub fail_partition: Option<u32>,
    /// Fail partition generation after this many partitions.
    #[serde(default)]
    pub fail_generation: Option<u32>,
}

fn default_partitions() -> u32 {
    1
}

fn default_records_per_partition() -> u32 {
    10
}

impl SourceDefinition {
    /// Parse a definition file, expanding `${VAR}` references.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid
    /// definition.
    pub fn load(path: &Path) -> Result<Self> {
        parser::parse_yaml_file(path)
            .with_context(|| format!("Failed to parse source definition: {}", path.display()))
    }

    /// Check concurrency settings and stream shapes, reporting every problem.
    ///
    /// # Errors
    ///
    /// Returns an error listing every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if let Err(e) = validate_concurrency(&self.concurrency) {
            errors.push(format!("{e:#}"));
        }

        let mut seen = HashSet::new();
        for stream in &self.streams {
            if stream.name.trim().is_empty() {
                errors.push("stream name must not be empty".to_string());
            } else if !seen.insert(stream.name.as_str()) {
                errors.push(format!("duplicate stream name '{}'", stream.name));
            }
            if let Some(index) = stream.fail_partition {
                if index >= stream.partitions {
                    errors.push(format!(
                        "stream '{}': fail_partition {} is out of range (partitions: {})",
                        stream.name, index, stream.partitions
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Source definition validation failed:\n  - {}", errors.join("\n  - "));
        }
    }

    /// Build in-memory streams publishing state through `repository`.
    #[must_use]
    pub fn build_streams(
        &self,
        repository: &Arc<dyn MessageRepository>,
    ) -> Vec<Arc<dyn AbstractStream>> {
        self.streams
            .iter()
            .map(|s| Arc::new(s.build(repository)) as Arc<dyn AbstractStream>)
            .collect()
    }
}

impl StreamDefinition {
    fn build(&self, repository: &Arc<dyn MessageRepository>) -> InMemoryStream {
        let per_partition = i64::from(self.records_per_partition);
        let partitions = (0..self.partitions)
            .map(|index| {
                let start = i64::from(index) * per_partition;
                let records = (start..start + per_partition)
                    .map(|id| self.record(id, index))
                    .collect();
                let slice = serde_json::json!({ "start": start, "end": start + per_partition });
                let partition = InMemoryPartition::new(&self.name, Some(slice), records);
                if self.fail_partition == Some(index) {
                    partition.with_failure(
                        (self.records_per_partition / 2) as usize,
                        ConnectorError::data(
                            "INJECTED_READ_FAILURE",
                            format!("partition {index} of '{}' failed", self.name),
                        ),
                    )
                } else {
                    partition
                }
            })
            .collect();

        let cursor: Box<dyn Cursor> = match self.cursor {
            CursorKind::None => Box::new(FinalStateCursor::new(&self.name, Arc::clone(repository))),
            CursorKind::Slices => Box::new(SliceRangeCursor::new(
                &self.name,
                "id",
                Arc::clone(repository),
            )),
        };

        let stream = InMemoryStream::new(&self.name, partitions, cursor);
        match self.fail_generation {
            Some(after) => stream.with_generation_failure(
                after as usize,
                ConnectorError::transient_network(
                    "INJECTED_GENERATION_FAILURE",
                    format!("partition generation for '{}' failed", self.name),
                ),
            ),
            None => stream,
        }
    }

    fn record(&self, id: i64, partition: u32) -> RecordData {
        let mut data = RecordData::new();
        data.insert("id".into(), serde_json::json!(id));
        data.insert("stream".into(), serde_json::json!(self.name));
        data.insert("partition".into(), serde_json::json!(partition));
        data
    }
}
