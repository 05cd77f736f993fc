//! Assembles a `netprobe_core::RunConfig` + `RunMetadata` from parsed CLI
//! flags and environment defaults.
//!
//! spec.md scopes CLI argument parsing as the whole configuration surface —
//! there is no on-disk run-config file here, unlike the teacher's
//! `ProbeConfig::load` TOML reader. This module is the thin assembly step
//! that replaces it.

use netprobe_core::baseline::RunMetadata;
use netprobe_core::controller::RunConfig;
use netprobe_core::filter::{FilterCompiler, FilterProgram};

use crate::cli::{FilterArg, RunArgs, TrafficModeArg};

pub const DEFAULT_BPF_BUFFER_SIZE: i64 = 128 * 1024;

pub fn run_config_from_args(args: &RunArgs) -> RunConfig {
    RunConfig {
        runs: args.runs,
        warmup_sec: args.warmup_sec,
        measure_sec: args.duration_sec,
        threads: args.threads,
        queue_capacity: args.queue_capacity,
        pin_cores: None,
        packet_limit: args.packets,
    }
}

pub fn filter_program_from_arg(arg: FilterArg) -> Option<FilterProgram> {
    match arg {
        FilterArg::None => FilterCompiler::none(),
        FilterArg::Icmp => Some(FilterCompiler::icmp_only()),
    }
}

fn filter_name(arg: FilterArg) -> &'static str {
    match arg {
        FilterArg::None => "none",
        FilterArg::Icmp => "icmp",
    }
}

fn traffic_mode_name(arg: TrafficModeArg) -> &'static str {
    match arg {
        TrafficModeArg::None => "none",
        TrafficModeArg::Ping => "ping",
    }
}

fn current_os() -> &'static str {
    std::env::consts::OS
}

/// The git SHA the binary was built at, if known. `netprobe` has no build
/// script wiring this up (not worth the added dependency for a warn-only
/// metadata field); defaults to empty, which the Judge treats as just
/// another warn-only mismatch against a baseline that does record one.
fn git_sha() -> String {
    std::env::var("NETPROBE_GIT_SHA").unwrap_or_default()
}

pub fn run_metadata_from_args(args: &RunArgs, interface: &str) -> RunMetadata {
    RunMetadata {
        interface: interface.to_string(),
        filter: filter_name(args.filter).to_string(),
        threads: args.threads as i64,
        bpf_buffer_size: DEFAULT_BPF_BUFFER_SIZE,
        duration_sec: args.duration_sec as i64,
        warmup_sec: args.warmup_sec as i64,
        traffic_mode: traffic_mode_name(args.traffic_mode).to_string(),
        traffic_target: args.traffic_target.clone().unwrap_or_default(),
        traffic_rate: args.traffic_rate as i64,
        os: current_os().to_string(),
        git_sha: git_sha(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_carries_packet_limit() {
        let args = RunArgs {
            interface: "eth0".into(),
            runs: 5,
            warmup_sec: 1.0,
            duration_sec: 10.0,
            threads: 2,
            queue_capacity: 50,
            filter: FilterArg::Icmp,
            traffic_mode: TrafficModeArg::None,
            traffic_target: None,
            traffic_rate: 10,
            packets: Some(1000),
            save_baseline: None,
            json: false,
        };
        let cfg = run_config_from_args(&args);
        assert_eq!(cfg.runs, 5);
        assert_eq!(cfg.packet_limit, Some(1000));
    }
}
