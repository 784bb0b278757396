//! Counter aggregates (§3 "Counter aggregates", §10.4).
//!
//! Ported in the style of the corpus's own hand-rolled `ProtocolMetrics`:
//! plain `AtomicU64`/`AtomicU32` fields plus a manual Prometheus text
//! exporter, rather than a registry-based metrics crate — this is an
//! in-process, single-binary counter set with no remote push path.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use vigil_protocol::Verdict;

/// Per-verdict and transport-health counters held by the inspection loop,
/// flushed to logs (and exportable as Prometheus text) on the configured
/// metric-reporting period.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    pub verdict_accept: AtomicU64,
    pub verdict_drop: AtomicU64,
    pub verdict_inject: AtomicU64,
    pub verdict_irrelevant: AtomicU64,
    pub verdict_inspect: AtomicU64,
    pub verdict_reconf: AtomicU64,
    pub verdict_wait: AtomicU64,

    pub response_inspections: AtomicU64,

    pub networking_registration_successes: AtomicU64,
    pub networking_registration_failures: AtomicU64,

    pub compression_successes: AtomicU64,
    pub compression_failures: AtomicU64,

    pub parse_failures: AtomicU64,
    pub irrelevant_signals: AtomicU64,
    pub orphan_chunks: AtomicU64,

    transaction_table_min: AtomicU32,
    transaction_table_max: AtomicU32,
    transaction_table_sum: AtomicU64,
    transaction_table_samples: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        WorkerMetrics {
            transaction_table_min: AtomicU32::new(u32::MAX),
            ..Default::default()
        }
    }

    pub fn record_verdict(&self, verdict: &Verdict) {
        let counter = match verdict {
            Verdict::Accept => &self.verdict_accept,
            Verdict::Drop(_) => &self.verdict_drop,
            Verdict::Inject(_) => &self.verdict_inject,
            Verdict::Irrelevant => &self.verdict_irrelevant,
            Verdict::Inspect => &self.verdict_inspect,
            Verdict::Reconf => &self.verdict_reconf,
            Verdict::Wait => &self.verdict_wait,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_inspection(&self) {
        self.response_inspections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration_success(&self) {
        self.networking_registration_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registration_failure(&self) {
        self.networking_registration_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression_success(&self) {
        self.compression_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression_failure(&self) {
        self.compression_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_irrelevant_signal(&self) {
        self.irrelevant_signals.fetch_add(1, Ordering::Relaxed);
    }

    /// A chunk referenced a session id with no preceding `RequestStart`;
    /// dropped silently, no verdict emitted.
    pub fn record_orphan_chunk(&self) {
        self.orphan_chunks.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds one observation of the session table's current size into the
    /// running min/max/average (§3 "transaction-table min/max/average
    /// size").
    pub fn record_table_size(&self, size: u32) {
        self.transaction_table_min.fetch_min(size, Ordering::Relaxed);
        self.transaction_table_max.fetch_max(size, Ordering::Relaxed);
        self.transaction_table_sum.fetch_add(size as u64, Ordering::Relaxed);
        self.transaction_table_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerMetricsSnapshot {
        let samples = self.transaction_table_samples.load(Ordering::Relaxed);
        let min = self.transaction_table_min.load(Ordering::Relaxed);
        WorkerMetricsSnapshot {
            verdict_accept: self.verdict_accept.load(Ordering::Relaxed),
            verdict_drop: self.verdict_drop.load(Ordering::Relaxed),
            verdict_inject: self.verdict_inject.load(Ordering::Relaxed),
            verdict_irrelevant: self.verdict_irrelevant.load(Ordering::Relaxed),
            verdict_inspect: self.verdict_inspect.load(Ordering::Relaxed),
            verdict_reconf: self.verdict_reconf.load(Ordering::Relaxed),
            verdict_wait: self.verdict_wait.load(Ordering::Relaxed),
            response_inspections: self.response_inspections.load(Ordering::Relaxed),
            networking_registration_successes: self
                .networking_registration_successes
                .load(Ordering::Relaxed),
            networking_registration_failures: self
                .networking_registration_failures
                .load(Ordering::Relaxed),
            compression_successes: self.compression_successes.load(Ordering::Relaxed),
            compression_failures: self.compression_failures.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            irrelevant_signals: self.irrelevant_signals.load(Ordering::Relaxed),
            orphan_chunks: self.orphan_chunks.load(Ordering::Relaxed),
            transaction_table_min: if samples == 0 { 0 } else { min },
            transaction_table_max: self.transaction_table_max.load(Ordering::Relaxed),
            transaction_table_avg: if samples == 0 {
                0.0
            } else {
                self.transaction_table_sum.load(Ordering::Relaxed) as f64 / samples as f64
            },
        }
    }

    /// Renders the current snapshot as Prometheus text exposition format.
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let snap = self.snapshot();
        let mut out = String::with_capacity(1024);

        for (name, help, value) in [
            ("verdict_accept_total", "Accept verdicts issued", snap.verdict_accept),
            ("verdict_drop_total", "Drop verdicts issued", snap.verdict_drop),
            ("verdict_inject_total", "Inject verdicts issued", snap.verdict_inject),
            ("verdict_irrelevant_total", "Irrelevant verdicts issued", snap.verdict_irrelevant),
            ("verdict_inspect_total", "Inspect verdicts issued", snap.verdict_inspect),
            ("verdict_reconf_total", "Reconf verdicts issued", snap.verdict_reconf),
            ("verdict_wait_total", "Wait verdicts issued", snap.verdict_wait),
            ("response_inspections_total", "Response chunks inspected", snap.response_inspections),
            (
                "registration_successes_total",
                "Successful ring (re-)registrations",
                snap.networking_registration_successes,
            ),
            (
                "registration_failures_total",
                "Failed or corrupted ring registrations",
                snap.networking_registration_failures,
            ),
            ("compression_successes_total", "Successful compress/decompress calls", snap.compression_successes),
            ("compression_failures_total", "Failed compress/decompress calls", snap.compression_failures),
            ("parse_failures_total", "Chunk parse failures", snap.parse_failures),
            ("irrelevant_signals_total", "Signals for a different session id than the head frame", snap.irrelevant_signals),
            ("orphan_chunks_total", "Chunks dropped for referencing a session with no active RequestStart", snap.orphan_chunks),
        ] {
            out.push_str(&format!(
                "# HELP {prefix}_{name} {help}\n# TYPE {prefix}_{name} counter\n{prefix}_{name} {value}\n\n"
            ));
        }

        out.push_str(&format!(
            "# HELP {prefix}_transaction_table_size Session table size (min/max/avg)\n\
             # TYPE {prefix}_transaction_table_size gauge\n\
             {prefix}_transaction_table_size{{stat=\"min\"}} {}\n\
             {prefix}_transaction_table_size{{stat=\"max\"}} {}\n\
             {prefix}_transaction_table_size{{stat=\"avg\"}} {:.3}\n\n",
            snap.transaction_table_min, snap.transaction_table_max, snap.transaction_table_avg
        ));

        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerMetricsSnapshot {
    pub verdict_accept: u64,
    pub verdict_drop: u64,
    pub verdict_inject: u64,
    pub verdict_irrelevant: u64,
    pub verdict_inspect: u64,
    pub verdict_reconf: u64,
    pub verdict_wait: u64,
    pub response_inspections: u64,
    pub networking_registration_successes: u64,
    pub networking_registration_failures: u64,
    pub compression_successes: u64,
    pub compression_failures: u64,
    pub parse_failures: u64,
    pub irrelevant_signals: u64,
    pub orphan_chunks: u64,
    pub transaction_table_min: u32,
    pub transaction_table_max: u32,
    pub transaction_table_avg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_protocol::WebResponseDescriptor;

    #[test]
    fn records_verdicts_by_kind() {
        let metrics = WorkerMetrics::new();
        metrics.record_verdict(&Verdict::Accept);
        metrics.record_verdict(&Verdict::Accept);
        metrics.record_verdict(&Verdict::Drop(WebResponseDescriptor::Custom {
            response_code: 403,
            title: "Blocked".into(),
            body: "Go away".into(),
            incident_uuid: "x".into(),
        }));

        let snap = metrics.snapshot();
        assert_eq!(snap.verdict_accept, 2);
        assert_eq!(snap.verdict_drop, 1);
    }

    #[test]
    fn table_size_tracks_min_max_avg() {
        let metrics = WorkerMetrics::new();
        metrics.record_table_size(2);
        metrics.record_table_size(8);
        metrics.record_table_size(5);

        let snap = metrics.snapshot();
        assert_eq!(snap.transaction_table_min, 2);
        assert_eq!(snap.transaction_table_max, 8);
        assert!((snap.transaction_table_avg - 5.0).abs() < 1e-9);
    }

    #[test]
    fn prometheus_export_contains_counters() {
        let metrics = WorkerMetrics::new();
        metrics.record_verdict(&Verdict::Accept);
        let text = metrics.to_prometheus("vigil_agent");
        assert!(text.contains("vigil_agent_verdict_accept_total 1"));
    }
}
