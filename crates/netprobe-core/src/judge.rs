//! Regression judge: compares a measured aggregate against a stored
//! baseline and decides pass/regression/insufficient/metadata-mismatch.
//!
//! Never panics and never returns `Err` for a business-logic disagreement —
//! always a structured [`JudgeReport`]. Exit-code mapping is owned by the
//! binary crate (`main.rs`), matching the spec's explicit ownership split.

use crate::aggregator::{Aggregate, AggregateOutcome, RunResult};
use crate::baseline::{Baseline, RunMetadata};

/// Default relative-regression threshold (θ), used unless the caller
/// overrides it.
pub const DEFAULT_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Pps,
    Mbps,
    LatencyP95,
    DropRate,
}

#[derive(Debug, Clone)]
pub struct MetadataMismatch {
    pub field: &'static str,
    pub baseline: String,
    pub current: String,
}

#[derive(Debug, Clone)]
pub enum JudgeOutcome {
    Pass,
    Regression { metrics: Vec<Metric> },
    Insufficient { total_processed: u64 },
    MetadataMismatch { mismatches: Vec<MetadataMismatch> },
}

#[derive(Debug, Clone)]
pub struct JudgeReport {
    pub outcome: JudgeOutcome,
    /// Warn-only metadata drift, always reported regardless of outcome.
    pub warnings: Vec<MetadataMismatch>,
}

/// Must-match metadata fields: any mismatch is fatal (`MetadataMismatch`).
fn check_must_match(baseline: &RunMetadata, current: &RunMetadata) -> Vec<MetadataMismatch> {
    let mut mismatches = Vec::new();
    macro_rules! check {
        ($field:ident, $name:expr) => {
            if baseline.$field != current.$field {
                mismatches.push(MetadataMismatch {
                    field: $name,
                    baseline: format!("{:?}", baseline.$field),
                    current: format!("{:?}", current.$field),
                });
            }
        };
    }
    check!(filter, "filter");
    check!(threads, "threads");
    check!(warmup_sec, "warmup_sec");
    check!(duration_sec, "duration_sec");
    check!(traffic_mode, "traffic_mode");
    check!(traffic_target, "traffic_target");
    check!(traffic_rate, "traffic_rate");
    mismatches
}

/// Warn-only metadata fields: logged, never fatal.
fn check_warn_only(baseline: &RunMetadata, current: &RunMetadata) -> Vec<MetadataMismatch> {
    let mut mismatches = Vec::new();
    macro_rules! check {
        ($field:ident, $name:expr) => {
            if baseline.$field != current.$field {
                mismatches.push(MetadataMismatch {
                    field: $name,
                    baseline: format!("{:?}", baseline.$field),
                    current: format!("{:?}", current.$field),
                });
            }
        };
    }
    check!(interface, "interface");
    check!(os, "os");
    check!(bpf_buffer_size, "bpf_buffer_size");
    check!(git_sha, "git_sha");
    mismatches
}

fn throughput_regressed(current: f64, baseline: f64, theta: f64) -> bool {
    current < baseline * (1.0 - theta)
}

fn latency_regressed(current: f64, baseline: f64, theta: f64) -> bool {
    current > baseline * (1.0 + theta)
}

fn drop_rate_regressed(current: f64, baseline: f64, theta: f64) -> bool {
    if baseline > 0.0 {
        current > baseline * (1.0 + theta)
    } else {
        current > theta
    }
}

/// Per-run regression flags, used by the persistence rule below.
fn regressed_metrics_for_run(run: &RunResult, baseline: &Baseline, theta: f64) -> Vec<Metric> {
    let mut flags = Vec::new();
    if throughput_regressed(run.pps, baseline.packets.rate_pps, theta) {
        flags.push(Metric::Pps);
    }
    if throughput_regressed(run.mbps, baseline.bytes.rate_mbps, theta) {
        flags.push(Metric::Mbps);
    }
    if latency_regressed(run.p95_ns as f64, baseline.latency_ns.p95 as f64, theta) {
        flags.push(Metric::LatencyP95);
    }
    if drop_rate_regressed(run.drop_rate, 0.0, theta) {
        // Baseline carries no stored drop-rate field in the schema; the
        // comparison is against the θ absolute floor per spec.md §4.I.
        flags.push(Metric::DropRate);
    }
    flags
}

/// `ceil(0.6 * runs)`, minimum 1 — a metric must regress in at least this
/// many runs to be declared overall-regressed.
fn persistence_floor(runs: usize) -> usize {
    ((runs as f64 * 0.6).ceil() as usize).max(1)
}

/// Judge a full multi-run measurement against a baseline.
pub fn judge(
    baseline: &Baseline,
    runs: &[RunResult],
    aggregate_outcome: &AggregateOutcome,
    current_metadata: &RunMetadata,
    theta: f64,
) -> JudgeReport {
    let warnings = match &baseline.metadata {
        Some(baseline_meta) => check_warn_only(baseline_meta, current_metadata),
        None => vec![MetadataMismatch {
            field: "metadata",
            baseline: "<absent>".to_string(),
            current: "<present>".to_string(),
        }],
    };

    if let Some(baseline_meta) = &baseline.metadata {
        let fatal = check_must_match(baseline_meta, current_metadata);
        if !fatal.is_empty() {
            return JudgeReport {
                outcome: JudgeOutcome::MetadataMismatch { mismatches: fatal },
                warnings,
            };
        }
    }

    let total_processed = match aggregate_outcome {
        AggregateOutcome::Insufficient { total_processed } => {
            return JudgeReport {
                outcome: JudgeOutcome::Insufficient {
                    total_processed: *total_processed,
                },
                warnings,
            };
        }
        AggregateOutcome::Ok(Aggregate { total_processed, .. }) => *total_processed,
    };
    let _ = total_processed;

    let floor = persistence_floor(runs.len());
    let mut regression_counts: std::collections::HashMap<Metric, usize> =
        std::collections::HashMap::new();
    for run in runs {
        for metric in regressed_metrics_for_run(run, baseline, theta) {
            *regression_counts.entry(metric).or_insert(0) += 1;
        }
    }

    let persistent: Vec<Metric> = regression_counts
        .into_iter()
        .filter(|(_, count)| *count >= floor)
        .map(|(metric, _)| metric)
        .collect();

    let outcome = if persistent.is_empty() {
        JudgeOutcome::Pass
    } else {
        JudgeOutcome::Regression { metrics: persistent }
    };

    JudgeReport { outcome, warnings }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline_with(pps: f64, mbps: f64, p95: u64) -> Baseline {
        let mut b = Baseline::default();
        b.packets.rate_pps = pps;
        b.bytes.rate_mbps = mbps;
        b.latency_ns.p95 = p95;
        b.metadata = Some(RunMetadata::default());
        b
    }

    fn run(pps: f64, mbps: f64, p95_ns: u64) -> RunResult {
        RunResult {
            pps,
            mbps,
            p95_ns,
            processed: 1000,
            elapsed_sec: 1.0,
            drop_rate: 0.0,
        }
    }

    #[test]
    fn pass_when_no_metric_regresses() {
        let baseline = baseline_with(1000.0, 10.0, 5000);
        let runs = vec![run(1000.0, 10.0, 5000); 5];
        let agg = AggregateOutcome::Ok(Aggregate {
            median_pps: 1000.0,
            median_mbps: 10.0,
            median_p95_ns: 5000.0,
            median_drop_rate: 0.0,
            total_processed: 5000,
        });
        let report = judge(&baseline, &runs, &agg, &RunMetadata::default(), DEFAULT_THRESHOLD);
        assert!(matches!(report.outcome, JudgeOutcome::Pass));
    }

    #[test]
    fn regression_requires_persistence_across_k_of_n_runs() {
        let baseline = baseline_with(1000.0, 10.0, 5000);
        // 5 runs, only 2 regress on pps (below 60% persistence floor of 3).
        let mut runs = vec![run(1000.0, 10.0, 5000); 3];
        runs.extend(vec![run(500.0, 10.0, 5000); 2]);
        let agg = AggregateOutcome::Ok(Aggregate {
            median_pps: 1000.0,
            median_mbps: 10.0,
            median_p95_ns: 5000.0,
            median_drop_rate: 0.0,
            total_processed: 5000,
        });
        let report = judge(&baseline, &runs, &agg, &RunMetadata::default(), DEFAULT_THRESHOLD);
        assert!(matches!(report.outcome, JudgeOutcome::Pass));
    }

    #[test]
    fn regression_declared_when_persistent() {
        let baseline = baseline_with(1000.0, 10.0, 5000);
        let runs = vec![run(500.0, 10.0, 5000); 5];
        let agg = AggregateOutcome::Ok(Aggregate {
            median_pps: 500.0,
            median_mbps: 10.0,
            median_p95_ns: 5000.0,
            median_drop_rate: 0.0,
            total_processed: 5000,
        });
        let report = judge(&baseline, &runs, &agg, &RunMetadata::default(), DEFAULT_THRESHOLD);
        match report.outcome {
            JudgeOutcome::Regression { metrics } => assert!(metrics.contains(&Metric::Pps)),
            other => panic!("expected Regression, got {other:?}"),
        }
    }

    #[test]
    fn must_match_mismatch_is_fatal() {
        let baseline = baseline_with(1000.0, 10.0, 5000);
        let mut current = RunMetadata::default();
        current.threads = 8;
        let runs = vec![run(1000.0, 10.0, 5000)];
        let agg = AggregateOutcome::Ok(Aggregate {
            median_pps: 1000.0,
            median_mbps: 10.0,
            median_p95_ns: 5000.0,
            median_drop_rate: 0.0,
            total_processed: 1000,
        });
        let report = judge(&baseline, &runs, &agg, &current, DEFAULT_THRESHOLD);
        assert!(matches!(report.outcome, JudgeOutcome::MetadataMismatch { .. }));
    }

    #[test]
    fn missing_baseline_metadata_warns_but_does_not_fail() {
        let mut baseline = baseline_with(1000.0, 10.0, 5000);
        baseline.metadata = None;
        let runs = vec![run(1000.0, 10.0, 5000)];
        let agg = AggregateOutcome::Ok(Aggregate {
            median_pps: 1000.0,
            median_mbps: 10.0,
            median_p95_ns: 5000.0,
            median_drop_rate: 0.0,
            total_processed: 1000,
        });
        let report = judge(&baseline, &runs, &agg, &RunMetadata::default(), DEFAULT_THRESHOLD);
        assert!(matches!(report.outcome, JudgeOutcome::Pass));
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn insufficient_sample_short_circuits_regression_check() {
        let baseline = baseline_with(1000.0, 10.0, 5000);
        let runs = vec![run(1.0, 0.01, 5000)];
        let agg = AggregateOutcome::Insufficient { total_processed: 5 };
        let report = judge(&baseline, &runs, &agg, &RunMetadata::default(), DEFAULT_THRESHOLD);
        assert!(matches!(report.outcome, JudgeOutcome::Insufficient { total_processed: 5 }));
    }
}
