//! Command-line interface built on clap.
//!
//! [`Cli`] carries the subcommands in [`Command`] (run, validate, keys) and
//! the global flags (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Batch document processor: OCR, translation, structuring and persistence.
#[derive(Debug, Parser)]
#[command(name = "docflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to a configuration file (defaults to ./docflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Process every row of a manifest and write the results back.
    Run {
        /// CSV manifest with fileId and targetLangs columns.
        manifest: PathBuf,

        /// Write the result manifest here instead of over the input.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Override the configured concurrency limit.
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Print the final records as JSON instead of a progress bar.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Check a manifest without processing it.
    Validate {
        manifest: PathBuf,
    },

    /// Load the key pool and show its size.
    Keys,
}
