//! CLI definitions for netprobe.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[clap(
    name = "netprobe",
    version,
    about = "Host-local network telemetry harness — reproducible capture throughput/latency regression gating",
    long_about = None
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum FilterArg {
    None,
    Icmp,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum TrafficModeArg {
    None,
    Ping,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Network interface to capture on.
    #[clap(long, short = 'i')]
    pub interface: String,

    /// Number of measurement runs.
    #[clap(long, default_value = "3")]
    pub runs: usize,

    /// Warmup duration per run, in seconds.
    #[clap(long, default_value = "2")]
    pub warmup_sec: f64,

    /// Measurement duration per run, in seconds. 0 means unlimited (governed
    /// by --packets instead).
    #[clap(long, default_value = "10")]
    pub duration_sec: f64,

    /// Number of worker threads.
    #[clap(long, default_value = "4")]
    pub threads: usize,

    /// Bounded queue capacity between capture and the worker pool.
    #[clap(long, default_value = "100")]
    pub queue_capacity: usize,

    /// In-kernel filter program to install.
    #[clap(long, value_enum, default_value = "none")]
    pub filter: FilterArg,

    /// External traffic generator mode.
    #[clap(long, value_enum, default_value = "none")]
    pub traffic_mode: TrafficModeArg,

    /// Traffic generator target (host/IP), required when traffic-mode=ping.
    #[clap(long)]
    pub traffic_target: Option<String>,

    /// Traffic generator rate, in packets/sec.
    #[clap(long, default_value = "10")]
    pub traffic_rate: u32,

    /// Stop a run early after this many packets have been processed.
    #[clap(long)]
    pub packets: Option<u64>,

    /// Write the resulting baseline/metrics JSON to this path.
    #[clap(long)]
    pub save_baseline: Option<PathBuf>,

    /// Emit the report as JSON instead of a human-readable table.
    #[clap(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform N measurement runs and print the aggregate + per-run table.
    Run(RunArgs),

    /// Like `run`, but also judges the result against a stored baseline and
    /// exits with the documented regression exit codes.
    Regress {
        #[clap(flatten)]
        run: RunArgs,

        /// Baseline/metrics JSON file to compare against.
        #[clap(long)]
        baseline: PathBuf,

        /// Relative regression threshold (θ).
        #[clap(long, default_value = "0.10")]
        threshold: f64,

        /// Minimum total processed packets required for a verdict.
        #[clap(long, default_value = "1")]
        min_packets: u64,
    },

    /// Pretty-print a stored baseline file.
    ShowBaseline {
        /// Baseline/metrics JSON file to display.
        path: PathBuf,
    },
}
