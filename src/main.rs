//! netprobe — host-local network telemetry harness.
//!
//! Captures link-layer frames, measures throughput/latency across N
//! warmup→measure runs, and optionally gates CI on regression against a
//! stored baseline. Run `netprobe --help` for usage.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use netprobe_core::aggregator::aggregate;
use netprobe_core::baseline::Baseline;
use netprobe_core::controller::{run_measurement, NoTraffic};
use netprobe_core::filter::FilterProgram;
use netprobe_core::judge::judge;
use netprobe_core::metrics::METRICS;

mod cli;
mod config;
mod report;
mod traffic;

use cli::{Cli, Commands, RunArgs, TrafficModeArg};
use traffic::PingTraffic;

/// Set directly by the SIGINT/SIGTERM handler (signal-safe: a single
/// relaxed store, nothing else runs in signal context).
static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_stop_signal(_sig: libc::c_int) {
    STOP.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGINT, handle_stop_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_stop_signal as libc::sighandler_t);
    }
}

fn open_backend_for(
    interface: &str,
    filter: Option<FilterProgram>,
) -> Result<Box<dyn netprobe_core::capture::CaptureBackend>> {
    #[cfg(target_os = "linux")]
    {
        let backend = netprobe_core::capture::LinuxCapture::open(interface, filter.as_ref())
            .context("opening AF_PACKET capture socket (are you running as root?)")?;
        Ok(Box::new(backend))
    }
    #[cfg(any(
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        let backend = netprobe_core::capture::BsdCapture::open(interface, true, filter.as_ref())
            .context("opening /dev/bpfN capture device (are you running as root?)")?;
        Ok(Box::new(backend))
    }
    #[cfg(not(any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    )))]
    {
        let _ = (interface, filter);
        anyhow::bail!("no capture backend available for this platform")
    }
}

fn traffic_control_for(args: &RunArgs) -> Result<Box<dyn netprobe_core::controller::TrafficControl>> {
    match (args.traffic_mode, &args.traffic_target) {
        (TrafficModeArg::Ping, Some(target)) => {
            Ok(Box::new(PingTraffic::new(target.clone(), args.traffic_rate)))
        }
        (TrafficModeArg::Ping, None) => {
            anyhow::bail!("--traffic-mode ping requires --traffic-target")
        }
        (TrafficModeArg::None, _) => Ok(Box::new(NoTraffic)),
    }
}

fn run_command(args: &RunArgs, stop: &Arc<AtomicBool>) -> Result<()> {
    let run_config = config::run_config_from_args(args);
    let filter = config::filter_program_from_arg(args.filter);
    let mut traffic = traffic_control_for(args)?;

    // Acquired once per process and shared across every run (spec.md §5) —
    // only the queue/worker pool/metrics state are rebuilt per run.
    let mut backend = open_backend_for(&args.interface, filter)?;

    let outcomes = run_measurement(&run_config, &METRICS, stop, traffic.as_mut(), backend.as_mut());

    let (results, errors) = report::completed_results(&outcomes);
    for e in &errors {
        tracing::error!(error = %e, "run ended with a capture engine error");
    }

    let agg_outcome = if results.is_empty() {
        None
    } else {
        Some(aggregate(&results, 1))
    };

    if args.json {
        let rendered = report::build_report(&results, agg_outcome.as_ref());
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        report::print_table(&results, agg_outcome.as_ref(), &errors);
    }

    if let Some(path) = &args.save_baseline {
        let snap = METRICS.snapshot();
        let metadata = config::run_metadata_from_args(args, &args.interface);
        Baseline::from_snapshot(&snap, metadata)
            .save(path)
            .with_context(|| format!("saving baseline to {}", path.display()))?;
    }

    Ok(())
}

fn regress_command(
    args: &RunArgs,
    baseline_path: &PathBuf,
    threshold: f64,
    min_packets: u64,
    stop: &Arc<AtomicBool>,
) -> Result<i32> {
    let baseline = match Baseline::load(baseline_path) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "failed to load baseline; skipping regression stage");
            return Ok(1);
        }
    };

    let run_config = config::run_config_from_args(args);
    let filter = config::filter_program_from_arg(args.filter);
    let mut traffic = traffic_control_for(args)?;

    let mut backend = open_backend_for(&args.interface, filter)?;

    let outcomes = run_measurement(&run_config, &METRICS, stop, traffic.as_mut(), backend.as_mut());

    let (results, errors) = report::completed_results(&outcomes);
    for e in &errors {
        tracing::error!(error = %e, "run ended with a capture engine error");
    }

    let agg_outcome = aggregate(&results, min_packets);
    report::print_table(&results, Some(&agg_outcome), &errors);

    let current_metadata = config::run_metadata_from_args(args, &args.interface);
    let judge_report = judge(&baseline, &results, &agg_outcome, &current_metadata, threshold);
    report::print_judge_report(&judge_report);

    let code = match judge_report.outcome {
        netprobe_core::judge::JudgeOutcome::Pass => 0,
        netprobe_core::judge::JudgeOutcome::Regression { .. } => 2,
        netprobe_core::judge::JudgeOutcome::Insufficient { .. } => 3,
        netprobe_core::judge::JudgeOutcome::MetadataMismatch { .. } => 4,
    };

    if let Some(path) = &args.save_baseline {
        let snap = METRICS.snapshot();
        Baseline::from_snapshot(&snap, current_metadata)
            .save(path)
            .with_context(|| format!("saving baseline to {}", path.display()))?;
    }

    Ok(code)
}

fn show_baseline_command(path: &PathBuf) -> Result<()> {
    let baseline = Baseline::load(path)?;
    println!("{}", serde_json::to_string_pretty(&baseline)?);
    println!(
        "rate_pps={} rate_mbps={}",
        baseline.rate_pps_display(),
        baseline.rate_mbps_display()
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    install_signal_handlers();
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        std::thread::spawn(move || loop {
            if STOP.load(Ordering::Relaxed) {
                stop.store(true, Ordering::Relaxed);
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        });
    }

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run(args) => {
            run_command(&args, &stop)?;
            0
        }
        Commands::Regress {
            run,
            baseline,
            threshold,
            min_packets,
        } => regress_command(&run, &baseline, threshold, min_packets, &stop)?,
        Commands::ShowBaseline { path } => {
            show_baseline_command(&path)?;
            0
        }
    };

    std::process::exit(exit_code);
}
