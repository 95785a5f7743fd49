//! Shared Tributary protocol message, stream, and error model types.
//!
//! This crate is pure data: it is used by the read engine, by connectors,
//! and by anything that consumes the emitted message stream.

pub mod error;
pub mod message;
pub mod stream;

pub use error::{ConnectorError, ErrorCategory};
pub use message::{LogLevel, Message, StreamStatus};
pub use stream::{CatalogStream, StreamDescriptor, StreamName, SyncMode};
