//! Human-readable and JSON report rendering.
//!
//! Grounded in the teacher's fixed-width `println!("{:<20} {:>9} ...")`
//! table idiom and `bench.rs`'s `serde_json::to_string_pretty` write path.

use serde::Serialize;

use netprobe_core::aggregator::{Aggregate, AggregateOutcome, RunResult};
use netprobe_core::controller::RunOutcome;
use netprobe_core::judge::{JudgeOutcome, JudgeReport, Metric};

#[derive(Serialize)]
pub struct RunReport {
    pub per_run: Vec<RunResultView>,
    pub aggregate: Option<AggregateView>,
    pub insufficient_total_processed: Option<u64>,
}

#[derive(Serialize)]
pub struct RunResultView {
    pub pps: f64,
    pub mbps: f64,
    pub p95_ns: u64,
    pub processed: u64,
    pub drop_rate: f64,
}

#[derive(Serialize)]
pub struct AggregateView {
    pub median_pps: f64,
    pub median_mbps: f64,
    pub median_p95_ns: f64,
    pub median_drop_rate: f64,
    pub total_processed: u64,
}

impl From<&RunResult> for RunResultView {
    fn from(r: &RunResult) -> Self {
        Self {
            pps: r.pps,
            mbps: r.mbps,
            p95_ns: r.p95_ns,
            processed: r.processed,
            drop_rate: r.drop_rate,
        }
    }
}

impl From<&Aggregate> for AggregateView {
    fn from(a: &Aggregate) -> Self {
        Self {
            median_pps: a.median_pps,
            median_mbps: a.median_mbps,
            median_p95_ns: a.median_p95_ns,
            median_drop_rate: a.median_drop_rate,
            total_processed: a.total_processed,
        }
    }
}

/// Split completed runs from run-level errors; errors are reported but
/// don't participate in aggregation.
pub fn completed_results(outcomes: &[RunOutcome]) -> (Vec<RunResult>, Vec<&str>) {
    let mut results = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            RunOutcome::Completed(r) => results.push(*r),
            RunOutcome::Error(msg) => errors.push(msg.as_str()),
        }
    }
    (results, errors)
}

pub fn build_report(results: &[RunResult], aggregate_outcome: Option<&AggregateOutcome>) -> RunReport {
    let per_run = results.iter().map(RunResultView::from).collect();
    let (aggregate, insufficient) = match aggregate_outcome {
        Some(AggregateOutcome::Ok(agg)) => (Some(AggregateView::from(agg)), None),
        Some(AggregateOutcome::Insufficient { total_processed }) => (None, Some(*total_processed)),
        None => (None, None),
    };
    RunReport {
        per_run,
        aggregate,
        insufficient_total_processed: insufficient,
    }
}

/// Print the fixed-width per-run + aggregate table.
pub fn print_table(results: &[RunResult], aggregate_outcome: Option<&AggregateOutcome>, errors: &[&str]) {
    println!(
        "{:<6} {:>12} {:>10} {:>12} {:>10} {:>10}",
        "run", "pps", "mbps", "p95_ns", "processed", "drop%"
    );
    for (i, r) in results.iter().enumerate() {
        println!(
            "{:<6} {:>12.2} {:>10.4} {:>12} {:>10} {:>10.3}",
            i + 1,
            r.pps,
            r.mbps,
            r.p95_ns,
            r.processed,
            r.drop_rate * 100.0
        );
    }
    for (i, msg) in errors.iter().enumerate() {
        println!("run {} errored: {}", results.len() + i + 1, msg);
    }

    match aggregate_outcome {
        Some(AggregateOutcome::Ok(agg)) => {
            println!("---");
            println!(
                "median  {:>12.2} {:>10.4} {:>12.0} {:>10} {:>10.3}",
                agg.median_pps,
                agg.median_mbps,
                agg.median_p95_ns,
                agg.total_processed,
                agg.median_drop_rate * 100.0
            );
        }
        Some(AggregateOutcome::Insufficient { total_processed }) => {
            println!("insufficient sample: only {total_processed} packets processed");
        }
        None => {}
    }
}

pub fn print_judge_report(report: &JudgeReport) {
    for w in &report.warnings {
        tracing::warn!(
            field = w.field,
            baseline = %w.baseline,
            current = %w.current,
            "baseline metadata drift (warn-only)"
        );
    }
    match &report.outcome {
        JudgeOutcome::Pass => println!("judge: pass"),
        JudgeOutcome::Regression { metrics } => {
            println!("judge: regression in {}", describe_metrics(metrics));
        }
        JudgeOutcome::Insufficient { total_processed } => {
            println!("judge: insufficient sample ({total_processed} packets processed)");
        }
        JudgeOutcome::MetadataMismatch { mismatches } => {
            println!("judge: baseline metadata mismatch:");
            for m in mismatches {
                println!("  {}: baseline={} current={}", m.field, m.baseline, m.current);
            }
        }
    }
}

fn describe_metrics(metrics: &[Metric]) -> String {
    metrics
        .iter()
        .map(|m| match m {
            Metric::Pps => "pps",
            Metric::Mbps => "mbps",
            Metric::LatencyP95 => "p95 latency",
            Metric::DropRate => "drop rate",
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_results_separates_errors() {
        let outcomes = vec![
            RunOutcome::Completed(RunResult {
                pps: 1.0,
                mbps: 1.0,
                p95_ns: 1,
                processed: 1,
                elapsed_sec: 1.0,
                drop_rate: 0.0,
            }),
            RunOutcome::Error("boom".into()),
        ];
        let (results, errors) = completed_results(&outcomes);
        assert_eq!(results.len(), 1);
        assert_eq!(errors, vec!["boom"]);
    }
}
