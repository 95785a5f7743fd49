use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tributary_engine::slice_logger::{AlwaysLogSliceLogger, DebugSliceLogger, SliceLogger};
use tributary_engine::{ConcurrentSource, InMemoryMessageRepository, MessageRepository};
use tributary_types::Message;

use crate::definition::SourceDefinition;

/// Execute the `read` command: run a concurrent read and write each message
/// to stdout as one JSON line.
pub fn execute(source_path: &Path) -> Result<()> {
    let definition = SourceDefinition::load(source_path)?;
    definition.validate()?;

    let repository: Arc<dyn MessageRepository> = Arc::new(InMemoryMessageRepository::new(
        definition.messages.repository_level,
    ));
    let slice_logger: Arc<dyn SliceLogger> = if definition.messages.log_slices {
        Arc::new(AlwaysLogSliceLogger)
    } else {
        Arc::new(DebugSliceLogger)
    };
    let source = ConcurrentSource::create(
        definition.concurrency.clone(),
        slice_logger,
        Arc::clone(&repository),
    )?;

    tracing::info!(
        source = %source_path.display(),
        streams = definition.streams.len(),
        "Source definition validated"
    );

    let start = Instant::now();
    let mut out = BufWriter::new(io::stdout().lock());
    let mut records = 0_u64;
    for item in source.read(definition.build_streams(&repository))? {
        match item {
            Ok(message) => {
                if matches!(message, Message::Record(_)) {
                    records += 1;
                }
                serde_json::to_writer(&mut out, &message)?;
                out.write_all(b"\n")?;
            }
            Err(e) => {
                out.flush()?;
                return Err(e).context("Read failed");
            }
        }
    }
    out.flush()?;

    tracing::info!(
        records,
        duration_secs = start.elapsed().as_secs_f64(),
        "Read completed"
    );
    Ok(())
}
