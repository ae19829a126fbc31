//! CLI argument parsing using clap.
//!
//! This module defines the command-line interface for statarb, including
//! all subcommands and their arguments.

use crate::sandbox::SyntheticConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// statarb - statistical arbitrage pairs trading
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,

    /// Emit JSON log lines
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,

    /// JSON configuration file; defaults apply to anything it omits
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan a synthetic universe for cointegrated pairs
    Discover {
        #[command(flatten)]
        universe: UniverseArgs,
        /// Write ranked candidates to this JSON file
        #[arg(long)]
        output: Option<String>,
    },

    /// Paper-trade a synthetic universe end to end
    Simulate {
        #[command(flatten)]
        universe: UniverseArgs,
        /// Bars used for the initial discovery before replay starts
        #[arg(long, default_value_t = 500)]
        warmup_bars: usize,
        /// Directory for Kalman, position and signal snapshots
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Serve /health and /metrics on this port
        #[arg(long)]
        serve_metrics: Option<u16>,
        /// Close every open position at the end of the replay
        #[arg(long)]
        flatten_on_exit: bool,
    },
}

/// Shape of the generated universe.
#[derive(Args, Debug, Clone)]
pub struct UniverseArgs {
    /// Number of planted cointegrated pairs
    #[arg(long, default_value_t = 3)]
    pub pairs: usize,
    /// Number of independent random walks
    #[arg(long, default_value_t = 6)]
    pub noise: usize,
    /// Bars per instrument
    #[arg(long, default_value_t = 2000)]
    pub bars: usize,
    /// RNG seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl UniverseArgs {
    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            cointegrated_pairs: self.pairs,
            noise_instruments: self.noise,
            length: self.bars,
            seed: self.seed,
            ..Default::default()
        }
    }
}
