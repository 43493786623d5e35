use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Intent-driven orchestrator for 5G/O-RAN network slices.
#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(about = "Intent-driven orchestrator for 5G/O-RAN network slices")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate intents to QoS profiles and compute placement without
    /// applying anything; writes the rendered plan to --out.
    Plan {
        /// Path to the intents file (one free-text intent per line)
        intents: PathBuf,

        /// Path to write the rendered plan
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Compute the plan but do not write anything to disk
        #[arg(long)]
        dry_run: bool,
    },

    /// Translate intents, place, render packages, and reconcile against
    /// the configured clusters.
    Apply {
        /// Path to the intents file (one free-text intent per line)
        intents: PathBuf,

        /// Path to write the rendered plan and package tree
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Compute and render but do not call cluster clients
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the DMS HTTP façade and metrics/health endpoints.
    Server {
        /// DMS bind port
        #[arg(short, long, default_value_t = 8080)]
        port: u16,

        /// Metrics/health bind port
        #[arg(long, default_value_t = 9090)]
        metrics_port: u16,
    },
}

/// Process exit codes, per the external-interface CLI contract: 0 success,
/// 1 bad usage, 2 validation failure, 3 apply failure.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const BAD_USAGE: i32 = 1;
    pub const VALIDATION_FAILURE: i32 = 2;
    pub const APPLY_FAILURE: i32 = 3;
}
