//! On-disk baseline/metrics JSON schema: read, write, and the
//! missing-key-tolerant loader.
//!
//! Grounded in the teacher's `config.rs::ProbeConfig::load` (read, parse,
//! wrap with `anyhow::Context`) and `bench.rs`'s `serde_json::to_string_pretty`
//! write path, adapted from TOML run-config to the JSON metrics snapshot the
//! Baseline schema defines.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PacketCounts {
    #[serde(default)]
    pub captured: u64,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub rate_pps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ByteCounts {
    #[serde(default)]
    pub captured: u64,
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub rate_mbps: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ErrorCounts {
    #[serde(default)]
    pub parse_errors: u64,
    #[serde(default)]
    pub checksum_failures: u64,
    #[serde(default)]
    pub queue_drops: u64,
    #[serde(default)]
    pub capture_drops: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EthertypeCounts {
    #[serde(default)]
    pub ipv4: u64,
    #[serde(default)]
    pub ipv6: u64,
    #[serde(default)]
    pub arp: u64,
    #[serde(default)]
    pub other: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProtocolCounts {
    #[serde(default)]
    pub tcp: u64,
    #[serde(default)]
    pub udp: u64,
    #[serde(default)]
    pub icmp: u64,
    #[serde(default)]
    pub other: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStats {
    #[serde(default)]
    pub depth_max: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LatencyStats {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub sum: u64,
    #[serde(default)]
    pub avg: u64,
    #[serde(default)]
    pub max: u64,
    #[serde(default)]
    pub p50: u64,
    #[serde(default)]
    pub p95: u64,
    #[serde(default)]
    pub p99: u64,
}

/// Must-match vs warn-only classification lives in `judge.rs`; this struct
/// just carries the fields the schema defines.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RunMetadata {
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub filter: String,
    #[serde(default)]
    pub threads: i64,
    #[serde(default)]
    pub bpf_buffer_size: i64,
    #[serde(default)]
    pub duration_sec: i64,
    #[serde(default)]
    pub warmup_sec: i64,
    #[serde(default)]
    pub traffic_mode: String,
    #[serde(default)]
    pub traffic_target: String,
    #[serde(default)]
    pub traffic_rate: i64,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub git_sha: String,
}

fn default_histogram() -> Vec<u64> {
    vec![0; crate::metrics::HISTOGRAM_BUCKETS]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub elapsed_sec: f64,
    #[serde(default)]
    pub capture_elapsed_sec: f64,
    #[serde(default)]
    pub packets: PacketCounts,
    #[serde(default)]
    pub bytes: ByteCounts,
    #[serde(default)]
    pub errors: ErrorCounts,
    #[serde(default)]
    pub ethertype: EthertypeCounts,
    #[serde(default)]
    pub protocols: ProtocolCounts,
    #[serde(default)]
    pub queue: QueueStats,
    #[serde(default)]
    pub latency_ns: LatencyStats,
    #[serde(default = "default_histogram")]
    pub latency_histogram: Vec<u64>,
    /// Absent entirely when the file predates metadata — compatibility
    /// checking treats that as "pass with a warning" (see `judge.rs`).
    #[serde(default)]
    pub metadata: Option<RunMetadata>,
}

impl Default for Baseline {
    fn default() -> Self {
        Self {
            elapsed_sec: 0.0,
            capture_elapsed_sec: 0.0,
            packets: PacketCounts::default(),
            bytes: ByteCounts::default(),
            errors: ErrorCounts::default(),
            ethertype: EthertypeCounts::default(),
            protocols: ProtocolCounts::default(),
            queue: QueueStats::default(),
            latency_ns: LatencyStats::default(),
            latency_histogram: default_histogram(),
            metadata: None,
        }
    }
}

impl Baseline {
    /// Build a Baseline directly from a live snapshot plus the run's metadata.
    pub fn from_snapshot(snap: &MetricsSnapshot, metadata: RunMetadata) -> Self {
        let mut histogram = vec![0u64; crate::metrics::HISTOGRAM_BUCKETS];
        histogram.copy_from_slice(&snap.histogram);

        Self {
            elapsed_sec: snap.elapsed_sec,
            capture_elapsed_sec: snap.capture_elapsed_sec,
            packets: PacketCounts {
                captured: snap.pkts_captured,
                processed: snap.pkts_processed,
                rate_pps: snap.rate_pps(),
            },
            bytes: ByteCounts {
                captured: snap.bytes_captured,
                processed: snap.bytes_processed,
                rate_mbps: snap.rate_mbps(),
            },
            errors: ErrorCounts {
                parse_errors: snap.parse_errors,
                checksum_failures: snap.checksum_failures,
                queue_drops: snap.queue_drops,
                capture_drops: snap.capture_drops,
            },
            ethertype: EthertypeCounts {
                ipv4: snap.ether_ipv4,
                ipv6: snap.ether_ipv6,
                arp: snap.ether_arp,
                other: snap.ether_other,
            },
            protocols: ProtocolCounts {
                tcp: snap.proto_tcp,
                udp: snap.proto_udp,
                icmp: snap.proto_icmp,
                other: snap.proto_other,
            },
            queue: QueueStats {
                depth_max: snap.queue_depth_max,
            },
            latency_ns: LatencyStats {
                count: snap.latency_count,
                sum: snap.latency_sum_ns,
                avg: snap.avg_ns(),
                max: snap.latency_max_ns,
                p50: snap.p50_ns(),
                p95: snap.p95_ns(),
                p99: snap.p99_ns(),
            },
            latency_histogram: histogram,
            metadata: Some(metadata),
        }
    }

    /// Recompute `rate_pps`/`rate_mbps` when a loaded file predates them or
    /// wrote zero, per the schema's Loader-tolerance rule.
    fn backfill_rates(&mut self) {
        if self.packets.rate_pps == 0.0 && self.capture_elapsed_sec > 0.0 {
            self.packets.rate_pps = self.packets.processed as f64 / self.capture_elapsed_sec;
        }
        if self.bytes.rate_mbps == 0.0 && self.capture_elapsed_sec > 0.0 {
            self.bytes.rate_mbps =
                (self.bytes.processed as f64 * 8.0) / self.capture_elapsed_sec / 1_000_000.0;
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading baseline file {}", path.display()))?;
        let mut baseline: Baseline = serde_json::from_str(&raw)
            .with_context(|| format!("parsing baseline JSON from {}", path.display()))?;
        baseline.backfill_rates();
        Ok(baseline)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("serializing baseline to JSON")?;
        fs::write(path, json)
            .with_context(|| format!("writing baseline file {}", path.display()))?;
        Ok(())
    }

    /// Render `rate_pps` to 2 decimal places, as the schema's rendering rule
    /// requires (this is formatting only; the stored f64 is unaffected).
    pub fn rate_pps_display(&self) -> String {
        format!("{:.2}", self.packets.rate_pps)
    }

    /// Render `rate_mbps` to 4 decimal places.
    pub fn rate_mbps_display(&self) -> String {
        format!("{:.4}", self.bytes.rate_mbps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_tolerates_missing_keys() {
        let json = r#"{"packets": {"processed": 1000}, "capture_elapsed_sec": 2.0}"#;
        let mut baseline: Baseline = serde_json::from_str(json).unwrap();
        baseline.backfill_rates();
        assert_eq!(baseline.errors.parse_errors, 0);
        assert_eq!(baseline.latency_histogram.len(), crate::metrics::HISTOGRAM_BUCKETS);
        assert!(baseline.metadata.is_none());
        assert!((baseline.packets.rate_pps - 500.0).abs() < 1e-9);
    }

    #[test]
    fn round_trips_through_json() {
        let snap = MetricsSnapshot {
            elapsed_sec: 1.0,
            capture_elapsed_sec: 1.0,
            pkts_captured: 10,
            pkts_processed: 9,
            bytes_captured: 1400,
            bytes_processed: 1260,
            ..Default::default()
        };
        let baseline = Baseline::from_snapshot(&snap, RunMetadata::default());
        let json = serde_json::to_string(&baseline).unwrap();
        let reloaded: Baseline = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.packets.processed, 9);
        assert_eq!(reloaded.bytes.processed, 1260);
    }

    #[test]
    fn rate_display_uses_fixed_decimals() {
        let mut baseline = Baseline::default();
        baseline.packets.rate_pps = 1234.5;
        baseline.bytes.rate_mbps = 12.3;
        assert_eq!(baseline.rate_pps_display(), "1234.50");
        assert_eq!(baseline.rate_mbps_display(), "12.3000");
    }
}
