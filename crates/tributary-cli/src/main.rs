mod commands;
mod definition;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "tributary",
    version,
    about = "Concurrent partitioned reads over synthetic sources"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Read every stream of a source and print messages as JSON lines
    Read {
        /// Path to source definition YAML file
        source: PathBuf,
    },
    /// Validate a source definition without reading it
    Check {
        /// Path to source definition YAML file
        source: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Read { source } => commands::read::execute(&source),
        Commands::Check { source } => commands::check::execute(&source),
    }
}
