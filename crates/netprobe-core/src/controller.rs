//! Measurement controller: owns the Idle → Warmup → Measure → Drain →
//! Reported phase machine for each of `runs` iterations.
//!
//! Grounded in the teacher's `bench.rs` fixed-duration run loop (progress
//! ticks, timed phases) and `run.rs`'s sleep/snapshot loop structure,
//! generalized to the warmup/measure/N-runs shape spec.md §4.G pins down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::RunResult;
use crate::capture::{CaptureBackend, CaptureStatus};
use crate::clock::now_ns;
use crate::metrics::MetricsCore;
use crate::queue::{new_queue, WorkerPool};

/// Drain sleep after `stop_capture()`, letting in-flight frames settle
/// before the snapshot is taken (spec.md §4.G).
const DRAIN_SLEEP: Duration = Duration::from_millis(500);

/// Capture-loop retry sleep on a transient "no packet" result.
const NO_PACKET_SLEEP: Duration = Duration::from_micros(200);

/// Implemented by the binary crate's external traffic-generator adapter.
/// Kept as a trait so this crate has no process-spawning dependency of its
/// own — the Controller only needs to start/stop it at the right phase
/// edges.
pub trait TrafficControl {
    /// Start the generator. Failure is a warning, never fatal (spec.md
    /// §4.G) — implementations should log and return normally either way.
    fn start(&mut self);
    fn stop(&mut self);
}

/// A no-op traffic control for runs that don't drive external traffic.
pub struct NoTraffic;
impl TrafficControl for NoTraffic {
    fn start(&mut self) {}
    fn stop(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub runs: usize,
    pub warmup_sec: f64,
    /// 0.0 means unlimited — governed instead by `packet_limit` or the stop flag.
    pub measure_sec: f64,
    pub threads: usize,
    pub queue_capacity: usize,
    pub pin_cores: Option<Vec<usize>>,
    pub packet_limit: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            runs: 3,
            warmup_sec: 2.0,
            measure_sec: 10.0,
            threads: 4,
            queue_capacity: 100,
            pin_cores: None,
            packet_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Measure,
}

/// Outcome of one run.
pub enum RunOutcome {
    Completed(RunResult),
    /// The capture backend reported a fatal OS error; the run ends early.
    Error(String),
}

/// Drives `config.runs` iterations of the phase machine against a single
/// capture backend acquired once by the caller and shared across every run
/// (spec.md §5: "the capture file descriptor and its kernel buffer are
/// acquired once per process, released on shutdown") — only the queue,
/// worker pool, and metrics state are rebuilt per run.
pub fn run_measurement(
    config: &RunConfig,
    metrics: &'static MetricsCore,
    stop_flag: &Arc<AtomicBool>,
    traffic: &mut dyn TrafficControl,
    backend: &mut dyn CaptureBackend,
) -> Vec<RunOutcome> {
    let mut results = Vec::with_capacity(config.runs);

    for _run_index in 0..config.runs {
        metrics.init();
        traffic.start();

        let (producer, rx) = new_queue(config.queue_capacity, metrics);
        let pool = WorkerPool::spawn(
            config.threads,
            rx,
            metrics,
            config.pin_cores.clone().map(Arc::new),
        );

        let mut phase = Phase::Warmup;
        let phase_start = now_ns();
        let warmup_end = phase_start + (config.warmup_sec * 1e9) as u64;
        let measure_end_offset = (config.measure_sec * 1e9) as u64;
        let mut measure_end = 0u64; // set once we enter Measure
        let mut packets_in_measure = 0u64;
        let mut run_error: Option<String> = None;

        loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }

            let t = now_ns();
            if phase == Phase::Warmup && t >= warmup_end {
                metrics.init();
                metrics.start();
                phase = Phase::Measure;
                measure_end = if measure_end_offset > 0 {
                    t + measure_end_offset
                } else {
                    0
                };
            }
            if phase == Phase::Measure && measure_end > 0 && t >= measure_end {
                break;
            }
            if phase == Phase::Measure {
                if let Some(limit) = config.packet_limit {
                    if packets_in_measure >= limit {
                        break;
                    }
                }
            }

            match backend.poll() {
                CaptureStatus::Frame(frame) => {
                    metrics.inc_captured(frame.len() as u64);
                    if phase == Phase::Measure {
                        packets_in_measure += 1;
                    }
                    producer.try_enqueue(frame);
                }
                CaptureStatus::NoPacket => {
                    std::thread::sleep(NO_PACKET_SLEEP);
                }
                CaptureStatus::Fatal(err) => {
                    tracing::error!(error = %err, "capture backend reported a fatal error; ending run");
                    run_error = Some(err.to_string());
                    break;
                }
            }
        }

        metrics.stop_capture();
        traffic.stop();
        drop(producer);
        pool.join();
        std::thread::sleep(DRAIN_SLEEP);

        match run_error {
            Some(msg) => results.push(RunOutcome::Error(msg)),
            None => {
                let snap = metrics.snapshot();
                results.push(RunOutcome::Completed(RunResult::from_snapshot(&snap)));
            }
        }

        if stop_flag.load(Ordering::Relaxed) {
            break;
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::MockBackend;

    fn frame_bytes() -> Vec<u8> {
        let mut v = vec![0u8; 14];
        v[12] = 0x08;
        v[13] = 0x00; // IPv4
        v.extend_from_slice(&{
            let mut ip = vec![0u8; 20];
            ip[0] = 0x45;
            ip[9] = 17; // UDP
            ip
        });
        v.extend_from_slice(&[0u8; 8]); // UDP header
        v
    }

    #[test]
    fn single_short_run_completes_and_produces_a_result() {
        static M: MetricsCore = MetricsCore::new();
        let stop = Arc::new(AtomicBool::new(false));
        let config = RunConfig {
            runs: 1,
            warmup_sec: 0.0,
            measure_sec: 0.0,
            threads: 1,
            queue_capacity: 16,
            pin_cores: None,
            packet_limit: Some(5),
        };
        let frames: Vec<Vec<u8>> = (0..5).map(|_| frame_bytes()).collect();
        let mut traffic = NoTraffic;
        let mut backend = MockBackend::new(frames);
        let results = run_measurement(&config, &M, &stop, &mut traffic, &mut backend);
        assert_eq!(results.len(), 1);
        match &results[0] {
            RunOutcome::Completed(r) => assert!(r.processed <= 5),
            RunOutcome::Error(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn stop_flag_ends_remaining_runs() {
        static M: MetricsCore = MetricsCore::new();
        let stop = Arc::new(AtomicBool::new(true));
        let config = RunConfig {
            runs: 3,
            warmup_sec: 0.0,
            measure_sec: 0.0,
            threads: 1,
            queue_capacity: 16,
            pin_cores: None,
            packet_limit: Some(1),
        };
        let mut traffic = NoTraffic;
        let mut backend = MockBackend::new(vec![]);
        let results = run_measurement(&config, &M, &stop, &mut traffic, &mut backend);
        assert_eq!(results.len(), 1);
    }
}
