//! Aggregates a sequence of per-run results into one multi-run verdict.
//!
//! Grounded in the teacher's `source_metrics.rs::LeadTimeReservoir::percentiles`
//! "sort a small Vec once, index by position" idiom, applied here at
//! aggregation time across runs instead of per-sample within one run.

use crate::metrics::MetricsSnapshot;

/// One run's derived result. Lives until aggregation, then discarded.
#[derive(Debug, Clone, Copy)]
pub struct RunResult {
    pub pps: f64,
    pub mbps: f64,
    pub p95_ns: u64,
    pub processed: u64,
    pub elapsed_sec: f64,
    pub drop_rate: f64,
}

impl RunResult {
    pub fn from_snapshot(snap: &MetricsSnapshot) -> Self {
        Self {
            pps: snap.rate_pps(),
            mbps: snap.rate_mbps(),
            p95_ns: snap.p95_ns(),
            processed: snap.pkts_processed,
            elapsed_sec: snap.capture_elapsed_sec,
            drop_rate: snap.drop_rate(),
        }
    }
}

/// Aggregation across `runs` RunResults.
#[derive(Debug, Clone, Copy)]
pub struct Aggregate {
    pub median_pps: f64,
    pub median_mbps: f64,
    pub median_p95_ns: f64,
    pub median_drop_rate: f64,
    pub total_processed: u64,
}

/// The Aggregator's overall verdict.
#[derive(Debug, Clone, Copy)]
pub enum AggregateOutcome {
    Ok(Aggregate),
    /// `total_processed` fell below the configured `min_packets` floor.
    Insufficient { total_processed: u64 },
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).expect("non-NaN metric value"));
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Aggregate `runs` independently for pps, mbps, and p95_ns, per spec.md
/// §4.H. Declares `Insufficient` when `total_processed < min_packets`.
pub fn aggregate(runs: &[RunResult], min_packets: u64) -> AggregateOutcome {
    let total_processed: u64 = runs.iter().map(|r| r.processed).sum();
    if total_processed < min_packets {
        return AggregateOutcome::Insufficient { total_processed };
    }

    let median_pps = median(runs.iter().map(|r| r.pps).collect());
    let median_mbps = median(runs.iter().map(|r| r.mbps).collect());
    let median_p95_ns = median(runs.iter().map(|r| r.p95_ns as f64).collect());
    let median_drop_rate = median(runs.iter().map(|r| r.drop_rate).collect());

    AggregateOutcome::Ok(Aggregate {
        median_pps,
        median_mbps,
        median_p95_ns,
        median_drop_rate,
        total_processed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(pps: f64, processed: u64) -> RunResult {
        RunResult {
            pps,
            mbps: pps * 0.01,
            p95_ns: 10_000,
            processed,
            elapsed_sec: 1.0,
            drop_rate: 0.0,
        }
    }

    #[test]
    fn median_of_odd_count() {
        let runs = vec![run(100.0, 100), run(300.0, 100), run(200.0, 100)];
        match aggregate(&runs, 0) {
            AggregateOutcome::Ok(agg) => assert_eq!(agg.median_pps, 200.0),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn median_of_even_count_is_mean_of_middle_two() {
        let runs = vec![run(100.0, 100), run(200.0, 100), run(300.0, 100), run(400.0, 100)];
        match aggregate(&runs, 0) {
            AggregateOutcome::Ok(agg) => assert_eq!(agg.median_pps, 250.0),
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn insufficient_when_below_min_packets() {
        let runs = vec![run(100.0, 5), run(100.0, 5)];
        match aggregate(&runs, 100) {
            AggregateOutcome::Insufficient { total_processed } => assert_eq!(total_processed, 10),
            _ => panic!("expected Insufficient"),
        }
    }

    #[test]
    fn total_processed_sums_across_runs() {
        let runs = vec![run(100.0, 40), run(100.0, 60)];
        match aggregate(&runs, 1) {
            AggregateOutcome::Ok(agg) => assert_eq!(agg.total_processed, 100),
            _ => panic!("expected Ok"),
        }
    }
}
