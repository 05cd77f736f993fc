//! Capture, decode, and measurement core for netprobe.
//!
//! This crate has no knowledge of CLI flags, config files, or process
//! management — those are the binary crate's job. It owns the hot path:
//! raw-socket/BPF capture, zero-copy decoding, lock-free metrics, the
//! worker pool, the run phase machine, aggregation, and regression
//! judging against a persisted baseline.

pub mod aggregator;
pub mod baseline;
pub mod capture;
pub mod clock;
pub mod controller;
pub mod decoder;
pub mod filter;
pub mod judge;
pub mod metrics;
pub mod queue;

pub use aggregator::{aggregate, Aggregate, AggregateOutcome, RunResult};
pub use baseline::{Baseline, RunMetadata};
pub use capture::{CaptureBackend, CaptureStatus, CapturedFrame};
pub use clock::now_ns;
pub use controller::{run_measurement, NoTraffic, RunConfig, RunOutcome, TrafficControl};
pub use decoder::{decode, DecodeError, DecodedFrame};
pub use filter::{FilterCompiler, FilterProgram};
pub use judge::{judge, JudgeOutcome, JudgeReport, Metric};
pub use metrics::{EtherKind, L4Kind, MetricsCore, MetricsSnapshot, METRICS};
