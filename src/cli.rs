use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logging::LogArgs;

#[derive(Debug, Args)]
pub struct SamplerArgs {
    /// Sampling period in milliseconds (default: 100)
    #[arg(long)]
    pub period_ms: Option<u64>,

    /// Tolerance fraction around the expected cycle delta (default: 0.05)
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// File announcing the CPU clock rate (default: /proc/cpuinfo)
    #[arg(long)]
    pub cpuinfo: Option<PathBuf>,
}

#[derive(Debug, Parser)]
#[command(name = "tscmon", about = "TSC jitter monitor for Linux")]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Configuration file path (default: /etc/tscmon.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub sampler: SamplerArgs,

    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Continuously sample the TSC and publish the observed per-period delta
    Monitor(MonitorArgs),
    /// Calibrate, run a burst of sample firings and report band statistics
    Check(CheckArgs),
}

#[derive(Debug, Parser)]
pub struct MonitorArgs {
    /// File the current jitter state is published to
    #[arg(short = 's', long, default_value = "/run/tscmon/tsc_jitter")]
    pub status_file: PathBuf,

    /// Configuration file path (default: /etc/tscmon.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub sampler: SamplerArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Parser)]
pub struct CheckArgs {
    /// Number of sample firings to run
    #[arg(short = 'n', long, default_value_t = 20)]
    pub samples: u32,

    /// Configuration file path (default: /etc/tscmon.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub sampler: SamplerArgs,

    #[command(flatten)]
    pub log: LogArgs,
}
