//! Slice log policy.

use tributary_types::{LogLevel, Message};

pub const SLICE_LOG_PREFIX: &str = "slice:";

/// Decides whether partition slices are echoed into the output as log
/// messages, and formats them.
pub trait SliceLogger: Send + Sync {
    fn should_log_slice_message(&self) -> bool;

    fn create_slice_log_message(&self, slice: Option<&serde_json::Value>) -> Message {
        let printable = slice.map_or_else(|| "null".to_owned(), serde_json::Value::to_string);
        Message::log(LogLevel::Info, format!("{SLICE_LOG_PREFIX}{printable}"))
    }
}

/// Logs slices only when DEBUG tracing is enabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugSliceLogger;

impl SliceLogger for DebugSliceLogger {
    fn should_log_slice_message(&self) -> bool {
        tracing::enabled!(tracing::Level::DEBUG)
    }
}

/// Logs every slice.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysLogSliceLogger;

impl SliceLogger for AlwaysLogSliceLogger {
    fn should_log_slice_message(&self) -> bool {
        true
    }
}
