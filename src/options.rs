use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Fixed wireless mesh network planner for 60 GHz deployments.
#[derive(Parser, Debug)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the candidate graph and optimize a deployment plan.
    Plan {
        /// JSON planning configuration.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for topology and report files.
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Check a single site pair for line of sight.
    Los {
        /// JSON planning configuration.
        #[arg(long)]
        config: PathBuf,

        /// Index of the first site in the configuration.
        #[arg(long)]
        first: usize,

        /// Index of the second site in the configuration.
        #[arg(long)]
        second: usize,
    },
}
