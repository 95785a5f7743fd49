//! Protocol messages produced by a concurrent read.
//!
//! A read emits an ordered sequence of [`Message`]s: data records, state
//! checkpoints, passthrough logs, and trace messages (stream status
//! transitions and errors). Every message serializes as one JSON object
//! with a `type` discriminator so it can be written as a JSON line.

use serde::{Deserialize, Serialize};

use crate::stream::StreamDescriptor;

/// Milliseconds since the Unix epoch, as stamped on records and traces.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Severity of a log message. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Lifecycle marker for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamStatus {
    Started,
    Running,
    Complete,
    Incomplete,
}

/// Failure classification carried by error traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    SystemError,
    ConfigError,
    TransientError,
}

/// One data record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub stream: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub emitted_at: i64,
}

/// Per-stream checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    pub stream_descriptor: StreamDescriptor,
    pub stream_state: serde_json::Value,
}

/// Passthrough log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: LogLevel,
    pub message: String,
}

/// Stream status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatusTrace {
    pub stream_descriptor: StreamDescriptor,
    pub status: StreamStatus,
}

/// Error report attributed to a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTrace {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    pub failure_type: FailureType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_descriptor: Option<StreamDescriptor>,
}

/// Payload of a trace message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trace_type", rename_all = "snake_case")]
pub enum TracePayload {
    StreamStatus(StreamStatusTrace),
    Error(ErrorTrace),
}

/// Observability trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMessage {
    pub emitted_at: i64,
    #[serde(flatten)]
    pub payload: TracePayload,
}

/// Output protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Record(RecordMessage),
    State(StateMessage),
    Log(LogMessage),
    Trace(TraceMessage),
}

impl Message {
    #[must_use]
    pub fn record(
        stream: impl Into<String>,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::Record(RecordMessage {
            stream: stream.into(),
            data,
            emitted_at: now_millis(),
        })
    }

    #[must_use]
    pub fn state(stream_descriptor: StreamDescriptor, stream_state: serde_json::Value) -> Self {
        Self::State(StateMessage {
            stream_descriptor,
            stream_state,
        })
    }

    #[must_use]
    pub fn log(level: LogLevel, message: impl Into<String>) -> Self {
        Self::Log(LogMessage {
            level,
            message: message.into(),
        })
    }

    #[must_use]
    pub fn stream_status(stream_descriptor: StreamDescriptor, status: StreamStatus) -> Self {
        Self::Trace(TraceMessage {
            emitted_at: now_millis(),
            payload: TracePayload::StreamStatus(StreamStatusTrace {
                stream_descriptor,
                status,
            }),
        })
    }

    #[must_use]
    pub fn error_trace(error: ErrorTrace) -> Self {
        Self::Trace(TraceMessage {
            emitted_at: now_millis(),
            payload: TracePayload::Error(error),
        })
    }

    /// Stream name and status if this is a stream status trace.
    #[must_use]
    pub fn as_stream_status(&self) -> Option<(&str, StreamStatus)> {
        match self {
            Self::Trace(TraceMessage {
                payload: TracePayload::StreamStatus(trace),
                ..
            }) => Some((trace.stream_descriptor.name.as_str(), trace.status)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_error_trace(&self) -> Option<&ErrorTrace> {
        match self {
            Self::Trace(TraceMessage {
                payload: TracePayload::Error(trace),
                ..
            }) => Some(trace),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&RecordMessage> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_state(&self) -> Option<&StateMessage> {
        match self {
            Self::State(state) => Some(state),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_log(&self) -> Option<&LogMessage> {
        match self {
            Self::Log(log) => Some(log),
            _ => None,
        }
    }
}
