//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vortex")]
#[command(about = "Container lifecycle runner with graceful stop and restart supervision", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command as a supervised container
    Run(RunArgs),

    /// Show version information
    Version,
}

#[derive(Args)]
pub struct RunArgs {
    /// Container ID
    #[arg(short, long)]
    pub id: String,

    /// Restart policy: no, always, unless-stopped, on-failure[:N]
    #[arg(long, default_value = "no")]
    pub restart: String,

    /// Seconds to wait after the stop signal before killing (0 kills at once, negative waits forever)
    #[arg(long, allow_hyphen_values = true)]
    pub stop_timeout: Option<String>,

    /// Signal sent to stop the container (e.g. SIGTERM, SIGINT)
    #[arg(long)]
    pub stop_signal: Option<String>,

    /// Stop the container after this many seconds
    #[arg(long)]
    pub stop_after: Option<u64>,

    /// Lifecycle configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Command to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}
