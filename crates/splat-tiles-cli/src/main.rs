//! splat-tiles CLI - benchmark and verify tile binning for splat rendering.
//!
//! Runs the binning pipeline on synthetic scenes, either on the GPU or on
//! CPU threads, and checks the output against the pipeline invariants.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;

mod commands;
mod config;
mod scene;

use commands::sort::SortKind;
use config::Config;

/// splat-tiles CLI - tile binning and sorting for splat rendering.
#[derive(Parser, Debug)]
#[command(
    name = "splat-tiles",
    author,
    version,
    about = "Benchmark and verify GPU tile binning for splat rendering",
    long_about = None
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// JSON config file (defaults to the user config directory).
    #[arg(long, global = true, env = "SPLAT_TILES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Bin a synthetic scene for a number of frames and report timings.
    Bench {
        /// Frames to run.
        #[arg(short, long, default_value_t = 100)]
        frames: u32,

        /// Number of splats (overrides the config file).
        #[arg(short, long)]
        splats: Option<usize>,

        /// Run on CPU threads instead of the GPU.
        #[arg(long)]
        host: bool,

        /// Report per-stage GPU times from timestamp queries.
        #[arg(long, conflicts_with = "host")]
        gpu_timings: bool,
    },

    /// Check every pipeline invariant on a synthetic scene.
    ///
    /// Runs the host pipeline and, when an adapter is available, the device
    /// pipeline. Exits non-zero on the first violation.
    Verify {
        /// Camera positions to check.
        #[arg(short, long, default_value_t = 4)]
        frames: u32,

        /// Number of splats (overrides the config file).
        #[arg(short, long)]
        splats: Option<usize>,

        /// Skip the device pipeline.
        #[arg(long)]
        host_only: bool,
    },

    /// Sort random key/value pairs and compare to a reference sort.
    Sort {
        /// Number of pairs.
        #[arg(short, long, default_value_t = 1 << 20)]
        count: u32,

        /// Significant key bits.
        #[arg(short, long, default_value_t = 32)]
        key_bits: u32,

        /// Sorter to use.
        #[arg(long, value_enum, default_value_t = SortKind::Radix)]
        sorter: SortKind,

        /// Run on CPU threads instead of the GPU.
        #[arg(long)]
        host: bool,
    },

    /// Show the effective configuration.
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .init();

    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Bench {
            frames,
            splats,
            host,
            gpu_timings,
        } => {
            if let Some(n) = splats {
                config.scene.splats = n;
            }
            if gpu_timings {
                config.binning.profile_gpu = true;
            }
            commands::bench::execute(&config, frames, host)?;
        }

        Commands::Verify {
            frames,
            splats,
            host_only,
        } => {
            if let Some(n) = splats {
                config.scene.splats = n;
            }
            commands::verify::execute(&config, frames, host_only)?;
        }

        Commands::Sort {
            count,
            key_bits,
            sorter,
            host,
        } => {
            commands::sort::execute(&config, count, key_bits.clamp(1, 32), sorter, host)?;
        }

        Commands::Config => {
            commands::config::show(&config)?;
        }
    }

    Ok(())
}
