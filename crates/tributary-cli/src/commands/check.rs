use std::path::Path;

use anyhow::Result;

use crate::definition::{CursorKind, SourceDefinition};

/// Execute the `check` command: parse and validate a source definition.
pub fn execute(source_path: &Path) -> Result<()> {
    let definition = SourceDefinition::load(source_path)?;
    definition.validate()?;

    let concurrency = &definition.concurrency;
    println!("Source definition: OK");
    println!(
        "  Workers:         {} ({} initial generators)",
        concurrency.num_workers, concurrency.initial_partition_generators
    );
    println!("  Queue capacity:  {}", concurrency.queue_capacity);
    println!("  Timeout:         {}s", concurrency.timeout_seconds);
    println!("  Streams:         {}", definition.streams.len());
    for stream in &definition.streams {
        let cursor = match stream.cursor {
            CursorKind::None => "none",
            CursorKind::Slices => "slices",
        };
        println!(
            "    {:16} {} x {} records, cursor: {}",
            stream.name, stream.partitions, stream.records_per_partition, cursor
        );
    }
    Ok(())
}
