//! clap-based command-line interface.
//!
//! The document-change triggers are delivered by the hosting platform; this
//! binary only drives the scheduled side of the engine (`serve`, `sweep`) and
//! gives operators a manual handle on individual fee records (`settle`).

use clap::{Parser, Subcommand};

/// bidflow — lifecycle workflow engine for a two-sided service marketplace.
#[derive(Debug, Parser)]
#[command(name = "bidflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "bidflow.toml")]
    pub config: String,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the retry-sweep scheduler until interrupted.
    Serve,

    /// Run a single retry sweep and exit.
    Sweep,

    /// Settle one fee record by id (operator tool for stuck records).
    Settle {
        /// Fee record identifier, e.g. `fee_<job id>`.
        record_id: String,
    },
}
