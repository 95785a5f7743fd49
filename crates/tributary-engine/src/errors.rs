//! Read error model.

use std::time::Duration;

use tributary_types::StreamName;

/// Errors that end a concurrent read.
///
/// Stream-level failures are first reported as ERROR trace messages in the
/// output; these errors are what the driver raises afterwards so the caller
/// can exit with a failure status.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// One or more streams raised exceptions during the read.
    #[error("{message}")]
    StreamsFailed {
        streams: Vec<StreamName>,
        message: String,
    },

    /// Partitions completed unsuccessfully without any exception explaining
    /// them. They stay open, so their streams can never finish.
    #[error(
        "partitions completed unsuccessfully and were never closed for stream(s): {}",
        join_names(.streams)
    )]
    StuckPartitions { streams: Vec<StreamName> },

    /// No queue item arrived within the configured timeout.
    #[error("timed out after {0:?} waiting for the next queue item")]
    QueueTimeout(Duration),

    /// Every producer dropped its end of the queue while work was outstanding.
    #[error("shared queue disconnected while work was still outstanding")]
    QueueDisconnected,

    /// Worker tasks were still running when the read finished.
    #[error("{0} worker task(s) still running after the read finished")]
    TasksNotDone(usize),

    /// Invalid concurrency configuration.
    #[error("invalid concurrency configuration: {0:#}")]
    Config(anyhow::Error),

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    Runtime(#[from] std::io::Error),
}

impl ReadError {
    /// Names of the streams this error is attributed to, if any.
    #[must_use]
    pub fn streams(&self) -> &[StreamName] {
        match self {
            Self::StreamsFailed { streams, .. } | Self::StuckPartitions { streams } => streams,
            _ => &[],
        }
    }
}

fn join_names(streams: &[StreamName]) -> String {
    streams
        .iter()
        .map(StreamName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}
