//! Cursor implementations.
//!
//! Cursors publish state messages through a [`MessageRepository`], which
//! the coordinator drains into its output right after the event that caused
//! them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tributary_types::{ConnectorError, Message, StreamDescriptor};

use crate::partition::Partition;
use crate::repository::MessageRepository;
use crate::stream::Cursor;

/// State key emitted by streams that do not checkpoint.
pub const NO_CURSOR_STATE_KEY: &str = "__no_cursor_state_message";

/// Cursor for full-refresh streams: a single sentinel state once the
/// stream is done.
pub struct FinalStateCursor {
    descriptor: StreamDescriptor,
    repository: Arc<dyn MessageRepository>,
    emitted: AtomicBool,
}

impl FinalStateCursor {
    #[must_use]
    pub fn new(stream_name: &str, repository: Arc<dyn MessageRepository>) -> Self {
        Self {
            descriptor: StreamDescriptor::new(stream_name),
            repository,
            emitted: AtomicBool::new(false),
        }
    }
}

impl Cursor for FinalStateCursor {
    fn close_partition(&self, _partition: &dyn Partition) -> Result<(), ConnectorError> {
        Ok(())
    }

    fn ensure_at_least_one_state_emitted(&self) {
        if self.emitted.swap(true, Ordering::AcqRel) {
            return;
        }
        let state = serde_json::json!({ NO_CURSOR_STATE_KEY: true });
        self.repository
            .emit_message(Message::state(self.descriptor.clone(), state));
    }
}

/// Half-open integer range `[start, end)` covered by a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: i64,
    pub end: i64,
}

impl SliceRange {
    /// Read `start`/`end` boundaries from a partition slice.
    ///
    /// # Errors
    ///
    /// Returns a data error when either boundary is missing, not an integer,
    /// or `end < start`.
    pub fn from_slice(slice: Option<&serde_json::Value>) -> Result<Self, ConnectorError> {
        let boundary = |key: &str| {
            slice
                .and_then(|s| s.get(key))
                .and_then(serde_json::Value::as_i64)
        };
        let (Some(start), Some(end)) = (boundary("start"), boundary("end")) else {
            return Err(ConnectorError::data(
                "INVALID_SLICE",
                format!("slice has no integer start/end boundaries: {}", display_slice(slice)),
            ));
        };
        if end < start {
            return Err(ConnectorError::data(
                "INVALID_SLICE",
                format!("slice end {end} precedes start {start}"),
            ));
        }
        Ok(Self { start, end })
    }
}

fn display_slice(slice: Option<&serde_json::Value>) -> String {
    slice.map_or_else(|| "null".to_owned(), serde_json::Value::to_string)
}

#[derive(Debug, Default)]
struct SliceState {
    ranges: Vec<SliceRange>,
    emitted: bool,
}

impl SliceState {
    fn merge(&mut self, range: SliceRange) {
        self.ranges.push(range);
        self.ranges.sort_by_key(|r| r.start);
        let mut merged: Vec<SliceRange> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }
}

/// Cursor that checkpoints the integer ranges of completed partitions.
///
/// Partitions may complete out of order, so the state is the set of merged
/// ranges rather than a single high-water mark.
pub struct SliceRangeCursor {
    descriptor: StreamDescriptor,
    cursor_field: String,
    repository: Arc<dyn MessageRepository>,
    state: Mutex<SliceState>,
}

impl SliceRangeCursor {
    #[must_use]
    pub fn new(
        stream_name: &str,
        cursor_field: impl Into<String>,
        repository: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            descriptor: StreamDescriptor::new(stream_name),
            cursor_field: cursor_field.into(),
            repository,
            state: Mutex::new(SliceState::default()),
        }
    }

    /// Resume from ranges committed by an earlier read.
    #[must_use]
    pub fn with_committed(self, ranges: impl IntoIterator<Item = SliceRange>) -> Self {
        {
            let mut state = self.state.lock();
            for range in ranges {
                state.merge(range);
            }
        }
        self
    }

    #[must_use]
    pub fn committed(&self) -> Vec<SliceRange> {
        self.state.lock().ranges.clone()
    }

    fn state_message(&self, ranges: &[SliceRange]) -> Message {
        let state = serde_json::json!({
            "cursor_field": self.cursor_field,
            "slices": ranges,
        });
        Message::state(self.descriptor.clone(), state)
    }
}

impl Cursor for SliceRangeCursor {
    fn close_partition(&self, partition: &dyn Partition) -> Result<(), ConnectorError> {
        let range = SliceRange::from_slice(partition.to_slice().as_ref())?;
        let message = {
            let mut state = self.state.lock();
            state.merge(range);
            state.emitted = true;
            self.state_message(&state.ranges)
        };
        self.repository.emit_message(message);
        Ok(())
    }

    fn ensure_at_least_one_state_emitted(&self) {
        let message = {
            let mut state = self.state.lock();
            if state.emitted {
                return;
            }
            state.emitted = true;
            self.state_message(&state.ranges)
        };
        self.repository.emit_message(message);
    }
}
