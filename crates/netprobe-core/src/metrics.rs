//! Lock-free metrics core: atomic counters, latency histogram, snapshot protocol.
//!
//! A single process-wide [`MetricsCore`] instance (`METRICS`) is shared by the
//! capture thread, the worker pool, and the Controller. Every field is an
//! atomic; there is no lock anywhere in this module. `snapshot()` takes an
//! independent load of each field — by design there is no cross-field
//! consistency guarantee, which is sufficient for rate and percentile
//! estimation (see spec §5).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::clock::now_ns;

/// Number of exponential-by-microsecond latency buckets.
pub const HISTOGRAM_BUCKETS: usize = 32;

/// Ethertype classification bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherKind {
    Ipv4,
    Ipv6,
    Arp,
    Other,
}

/// L4 protocol classification bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Kind {
    Tcp,
    Udp,
    Icmp,
    Other,
}

/// Compute the histogram bucket index for a latency sample in nanoseconds.
///
/// `µs = ns/1000`; bucket 0 = `[0,1)` µs; bucket i∈[1,30] = `[2^(i-1), 2^i)` µs;
/// bucket 31 catches everything `≥ 2^30` µs.
pub fn bucket(ns: u64) -> usize {
    let us = ns / 1000;
    if us == 0 {
        return 0;
    }
    // floor(log2(us)) + 1, capped at 31.
    let log2 = 63 - us.leading_zeros();
    (log2 as usize + 1).min(31)
}

/// Lower/upper bound (in µs) for a bucket index, used by percentile midpoint extraction.
fn bucket_bounds_us(i: usize) -> (u64, u64) {
    if i == 0 {
        (0, 1)
    } else {
        (1u64 << (i - 1), 1u64 << i)
    }
}

/// Process-wide atomic metrics singleton.
///
/// All fields use `Relaxed` ordering for increments (sampling counters, not
/// synchronization primitives); `start()`/`init()` use `Release` so that a
/// subsequent `is_active()`/`snapshot()` on another thread observes a
/// consistent zeroed-then-started state (`Acquire` on the reading side).
pub struct MetricsCore {
    pub(crate) start_ns: AtomicU64,
    pub(crate) capture_end_ns: AtomicU64,

    pkts_captured: AtomicU64,
    pkts_processed: AtomicU64,
    bytes_captured: AtomicU64,
    bytes_processed: AtomicU64,
    parse_errors: AtomicU64,
    checksum_failures: AtomicU64,
    queue_drops: AtomicU64,
    capture_drops: AtomicU64,

    ether_ipv4: AtomicU64,
    ether_ipv6: AtomicU64,
    ether_arp: AtomicU64,
    ether_other: AtomicU64,

    proto_tcp: AtomicU64,
    proto_udp: AtomicU64,
    proto_icmp: AtomicU64,
    proto_other: AtomicU64,

    queue_depth_max: AtomicU32,

    latency_count: AtomicU64,
    latency_sum_ns: AtomicU64,
    latency_max_ns: AtomicU64,
    histogram: [AtomicU64; HISTOGRAM_BUCKETS],
}

/// Plain-struct snapshot of [`MetricsCore`] — no atomics, safe to move/serialize.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub elapsed_sec: f64,
    pub capture_elapsed_sec: f64,

    pub pkts_captured: u64,
    pub pkts_processed: u64,
    pub bytes_captured: u64,
    pub bytes_processed: u64,
    pub parse_errors: u64,
    pub checksum_failures: u64,
    pub queue_drops: u64,
    pub capture_drops: u64,

    pub ether_ipv4: u64,
    pub ether_ipv6: u64,
    pub ether_arp: u64,
    pub ether_other: u64,

    pub proto_tcp: u64,
    pub proto_udp: u64,
    pub proto_icmp: u64,
    pub proto_other: u64,

    pub queue_depth_max: u32,

    pub latency_count: u64,
    pub latency_sum_ns: u64,
    pub latency_max_ns: u64,
    pub histogram: [u64; HISTOGRAM_BUCKETS],
}

impl MetricsSnapshot {
    /// Mean latency in ns, or 0 if no samples.
    pub fn avg_ns(&self) -> u64 {
        if self.latency_count == 0 {
            0
        } else {
            self.latency_sum_ns / self.latency_count
        }
    }

    /// Percentile extraction: walk buckets accumulating counts, return the
    /// midpoint (in ns) of the first bucket whose cumulative count ≥ p·total.
    /// Bucket 0 returns 500ns; empty histograms return 0.
    pub fn percentile_ns(&self, p: f64) -> u64 {
        if self.latency_count == 0 {
            return 0;
        }
        let target = (p * self.latency_count as f64).ceil() as u64;
        let mut cumulative = 0u64;
        for (i, &count) in self.histogram.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                if i == 0 {
                    return 500;
                }
                let (lo, hi) = bucket_bounds_us(i);
                return (lo + hi) / 2 * 1000;
            }
        }
        // Every bucket accounted for less than `target`; fall back to the
        // midpoint of the last non-empty bucket.
        for (i, &count) in self.histogram.iter().enumerate().rev() {
            if count > 0 {
                if i == 0 {
                    return 500;
                }
                let (lo, hi) = bucket_bounds_us(i);
                return (lo + hi) / 2 * 1000;
            }
        }
        0
    }

    pub fn p50_ns(&self) -> u64 {
        self.percentile_ns(0.50)
    }

    pub fn p95_ns(&self) -> u64 {
        self.percentile_ns(0.95)
    }

    pub fn p99_ns(&self) -> u64 {
        self.percentile_ns(0.99)
    }

    pub fn rate_pps(&self) -> f64 {
        if self.capture_elapsed_sec > 0.0 {
            self.pkts_processed as f64 / self.capture_elapsed_sec
        } else {
            0.0
        }
    }

    pub fn rate_mbps(&self) -> f64 {
        if self.capture_elapsed_sec > 0.0 {
            (self.bytes_processed as f64 * 8.0) / self.capture_elapsed_sec / 1_000_000.0
        } else {
            0.0
        }
    }

    pub fn drop_rate(&self) -> f64 {
        let total = self.pkts_captured + self.queue_drops;
        if total == 0 {
            0.0
        } else {
            (self.queue_drops + self.capture_drops) as f64 / total as f64
        }
    }
}

impl MetricsCore {
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        Self {
            start_ns: AtomicU64::new(0),
            capture_end_ns: AtomicU64::new(0),
            pkts_captured: AtomicU64::new(0),
            pkts_processed: AtomicU64::new(0),
            bytes_captured: AtomicU64::new(0),
            bytes_processed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            checksum_failures: AtomicU64::new(0),
            queue_drops: AtomicU64::new(0),
            capture_drops: AtomicU64::new(0),
            ether_ipv4: AtomicU64::new(0),
            ether_ipv6: AtomicU64::new(0),
            ether_arp: AtomicU64::new(0),
            ether_other: AtomicU64::new(0),
            proto_tcp: AtomicU64::new(0),
            proto_udp: AtomicU64::new(0),
            proto_icmp: AtomicU64::new(0),
            proto_other: AtomicU64::new(0),
            queue_depth_max: AtomicU32::new(0),
            latency_count: AtomicU64::new(0),
            latency_sum_ns: AtomicU64::new(0),
            latency_max_ns: AtomicU64::new(0),
            histogram: [ZERO; HISTOGRAM_BUCKETS],
        }
    }

    /// Zero every field. Must not race with a concurrent `snapshot()` —
    /// the Controller only calls this between runs, while no worker holds
    /// a live reference into the Measure phase.
    pub fn init(&self) {
        self.start_ns.store(0, Ordering::Release);
        self.capture_end_ns.store(0, Ordering::Release);
        self.pkts_captured.store(0, Ordering::Relaxed);
        self.pkts_processed.store(0, Ordering::Relaxed);
        self.bytes_captured.store(0, Ordering::Relaxed);
        self.bytes_processed.store(0, Ordering::Relaxed);
        self.parse_errors.store(0, Ordering::Relaxed);
        self.checksum_failures.store(0, Ordering::Relaxed);
        self.queue_drops.store(0, Ordering::Relaxed);
        self.capture_drops.store(0, Ordering::Relaxed);
        self.ether_ipv4.store(0, Ordering::Relaxed);
        self.ether_ipv6.store(0, Ordering::Relaxed);
        self.ether_arp.store(0, Ordering::Relaxed);
        self.ether_other.store(0, Ordering::Relaxed);
        self.proto_tcp.store(0, Ordering::Relaxed);
        self.proto_udp.store(0, Ordering::Relaxed);
        self.proto_icmp.store(0, Ordering::Relaxed);
        self.proto_other.store(0, Ordering::Relaxed);
        self.queue_depth_max.store(0, Ordering::Relaxed);
        self.latency_count.store(0, Ordering::Relaxed);
        self.latency_sum_ns.store(0, Ordering::Relaxed);
        self.latency_max_ns.store(0, Ordering::Relaxed);
        for b in &self.histogram {
            b.store(0, Ordering::Relaxed);
        }
    }

    pub fn start(&self) {
        self.start_ns.store(now_ns(), Ordering::Release);
    }

    pub fn stop_capture(&self) {
        self.capture_end_ns.store(now_ns(), Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.start_ns.load(Ordering::Acquire) > 0
    }

    #[inline]
    pub fn inc_captured(&self, bytes: u64) {
        self.pkts_captured.fetch_add(1, Ordering::Relaxed);
        self.bytes_captured.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_processed(&self, bytes: u64) {
        self.pkts_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn observe_latency(&self, ns: u64) {
        self.latency_count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ns.fetch_add(ns, Ordering::Relaxed);

        let mut cur = self.latency_max_ns.load(Ordering::Relaxed);
        while ns > cur {
            match self.latency_max_ns.compare_exchange_weak(
                cur,
                ns,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }

        self.histogram[bucket(ns)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ethertype(&self, kind: EtherKind) {
        let counter = match kind {
            EtherKind::Ipv4 => &self.ether_ipv4,
            EtherKind::Ipv6 => &self.ether_ipv6,
            EtherKind::Arp => &self.ether_arp,
            EtherKind::Other => &self.ether_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_protocol(&self, kind: L4Kind) {
        let counter = match kind {
            L4Kind::Tcp => &self.proto_tcp,
            L4Kind::Udp => &self.proto_udp,
            L4Kind::Icmp => &self.proto_icmp,
            L4Kind::Other => &self.proto_other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_queue_drops(&self) {
        self.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_capture_drops(&self) {
        self.capture_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_parse_errors(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_checksum_failures(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_queue_depth_max(&self, n: u32) {
        let mut cur = self.queue_depth_max.load(Ordering::Relaxed);
        while n > cur {
            match self.queue_depth_max.compare_exchange_weak(
                cur,
                n,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = now_ns();
        let start = self.start_ns.load(Ordering::Acquire);
        let capture_end = self.capture_end_ns.load(Ordering::Acquire);

        let elapsed_sec = if start > 0 {
            (now.saturating_sub(start)) as f64 / 1e9
        } else {
            0.0
        };
        let capture_elapsed_sec = if capture_end > 0 && start > 0 {
            (capture_end.saturating_sub(start)) as f64 / 1e9
        } else {
            elapsed_sec
        };

        let mut histogram = [0u64; HISTOGRAM_BUCKETS];
        for (i, slot) in histogram.iter_mut().enumerate() {
            *slot = self.histogram[i].load(Ordering::Relaxed);
        }

        MetricsSnapshot {
            elapsed_sec,
            capture_elapsed_sec,
            pkts_captured: self.pkts_captured.load(Ordering::Relaxed),
            pkts_processed: self.pkts_processed.load(Ordering::Relaxed),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            capture_drops: self.capture_drops.load(Ordering::Relaxed),
            ether_ipv4: self.ether_ipv4.load(Ordering::Relaxed),
            ether_ipv6: self.ether_ipv6.load(Ordering::Relaxed),
            ether_arp: self.ether_arp.load(Ordering::Relaxed),
            ether_other: self.ether_other.load(Ordering::Relaxed),
            proto_tcp: self.proto_tcp.load(Ordering::Relaxed),
            proto_udp: self.proto_udp.load(Ordering::Relaxed),
            proto_icmp: self.proto_icmp.load(Ordering::Relaxed),
            proto_other: self.proto_other.load(Ordering::Relaxed),
            queue_depth_max: self.queue_depth_max.load(Ordering::Relaxed),
            latency_count: self.latency_count.load(Ordering::Relaxed),
            latency_sum_ns: self.latency_sum_ns.load(Ordering::Relaxed),
            latency_max_ns: self.latency_max_ns.load(Ordering::Relaxed),
            histogram,
        }
    }
}

impl Default for MetricsCore {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide metrics singleton.
pub static METRICS: MetricsCore = MetricsCore::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_boundaries() {
        assert_eq!(bucket(999), 0);
        assert_eq!(bucket(1000), 1);
        assert_eq!(bucket(0), 0);
        assert!(bucket(2_000_000_000) >= 21);
    }

    #[test]
    fn bucket_monotonic_with_ns() {
        let mut prev = bucket(0);
        for ns in [999u64, 1000, 1999, 2000, 3999, 4000, 1_000_000, 2_000_000_000] {
            let b = bucket(ns);
            assert!(b >= prev, "bucket should be non-decreasing as ns grows");
            prev = b;
        }
    }

    #[test]
    fn captured_processed_invariant() {
        let m = MetricsCore::new();
        m.init();
        m.inc_captured(100);
        m.inc_captured(200);
        m.inc_queue_drops();
        m.inc_processed(100);
        let snap = m.snapshot();
        assert!(snap.pkts_processed <= snap.pkts_captured);
        assert!(snap.bytes_processed <= snap.bytes_captured);
        assert_eq!(snap.pkts_captured, 2);
        assert_eq!(snap.pkts_processed, 1);
        assert_eq!(snap.queue_drops, 1);
    }

    #[test]
    fn histogram_sum_matches_latency_count() {
        let m = MetricsCore::new();
        m.init();
        for ns in [500u64, 1500, 999_999, 2_000_000_000, 10] {
            m.observe_latency(ns);
        }
        let snap = m.snapshot();
        let hist_sum: u64 = snap.histogram.iter().sum();
        assert_eq!(hist_sum, snap.latency_count);
        assert_eq!(snap.latency_count, 5);
    }

    #[test]
    fn percentile_ordering_holds() {
        let m = MetricsCore::new();
        m.init();
        for i in 1..=1000u64 {
            m.observe_latency(i * 1000);
        }
        let snap = m.snapshot();
        assert!(snap.p50_ns() <= snap.p95_ns());
        assert!(snap.p95_ns() <= snap.p99_ns());
        assert!(snap.p99_ns() <= snap.latency_max_ns || snap.p99_ns() <= snap.latency_max_ns + 1);
    }

    #[test]
    fn ethertype_sum_equals_processed_when_every_packet_classified() {
        let m = MetricsCore::new();
        m.init();
        m.start();
        for _ in 0..3 {
            m.record_ethertype(EtherKind::Ipv4);
            m.inc_processed(64);
        }
        m.record_ethertype(EtherKind::Ipv6);
        m.inc_processed(64);
        let snap = m.snapshot();
        let ether_sum = snap.ether_ipv4 + snap.ether_ipv6 + snap.ether_arp + snap.ether_other;
        assert_eq!(ether_sum, snap.pkts_processed);
    }

    #[test]
    fn reset_zeroes_all_counters() {
        let m = MetricsCore::new();
        m.init();
        m.inc_captured(10);
        m.observe_latency(5000);
        m.start();
        m.init();
        let snap = m.snapshot();
        assert_eq!(snap.pkts_captured, 0);
        assert_eq!(snap.latency_count, 0);
        assert_eq!(snap.histogram.iter().sum::<u64>(), 0);
        assert!(!m.is_active());
    }

    #[test]
    fn queue_depth_max_is_a_true_watermark() {
        let m = MetricsCore::new();
        m.init();
        m.update_queue_depth_max(5);
        m.update_queue_depth_max(2);
        m.update_queue_depth_max(9);
        m.update_queue_depth_max(3);
        assert_eq!(m.snapshot().queue_depth_max, 9);
    }

    #[test]
    fn median_of_five_equal_values() {
        // Sanity check on the percentile machinery with a uniform load.
        let m = MetricsCore::new();
        m.init();
        for _ in 0..5 {
            m.observe_latency(500_000);
        }
        let snap = m.snapshot();
        assert_eq!(snap.p50_ns(), snap.p95_ns());
    }
}
