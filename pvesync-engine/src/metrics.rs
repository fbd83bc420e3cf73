//! Sync counters and gauges.
//!
//! Produced by the engine, rendered in Prometheus text format for whoever
//! serves them.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide sync metrics.
#[derive(Default)]
pub struct SyncMetrics {
    full_syncs_total: AtomicU64,
    quick_checks_total: AtomicU64,
    vms_synced_total: AtomicU64,
    lxc_synced_total: AtomicU64,
    errors_total: AtomicU64,
    vms_tracked: AtomicU64,
    lxc_tracked: AtomicU64,
    last_sync_duration_ms: AtomicU64,
    last_sync_timestamp: AtomicU64,
    changes_detected: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub full_syncs_total: u64,
    pub quick_checks_total: u64,
    pub vms_synced_total: u64,
    pub lxc_synced_total: u64,
    pub errors_total: u64,
    pub vms_tracked: u64,
    pub lxc_tracked: u64,
    pub last_sync_duration_ms: u64,
    pub last_sync_timestamp: u64,
    pub changes_detected: u64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_full_sync(&self) {
        self.full_syncs_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A full pass finished; `timestamp` is unix seconds.
    pub fn record_full_sync_end(&self, duration: Duration, timestamp: u64) {
        self.last_sync_duration_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
        self.last_sync_timestamp.store(timestamp, Ordering::Relaxed);
    }

    pub fn record_quick_check(&self, changes: u64) {
        self.quick_checks_total.fetch_add(1, Ordering::Relaxed);
        self.changes_detected.store(changes, Ordering::Relaxed);
    }

    pub fn record_synced(&self, vms: u64, containers: u64) {
        self.vms_synced_total.fetch_add(vms, Ordering::Relaxed);
        self.lxc_synced_total.fetch_add(containers, Ordering::Relaxed);
    }

    pub fn record_errors(&self, count: u64) {
        self.errors_total.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_tracked(&self, vms: u64, containers: u64) {
        self.vms_tracked.store(vms, Ordering::Relaxed);
        self.lxc_tracked.store(containers, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            full_syncs_total: self.full_syncs_total.load(Ordering::Relaxed),
            quick_checks_total: self.quick_checks_total.load(Ordering::Relaxed),
            vms_synced_total: self.vms_synced_total.load(Ordering::Relaxed),
            lxc_synced_total: self.lxc_synced_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
            vms_tracked: self.vms_tracked.load(Ordering::Relaxed),
            lxc_tracked: self.lxc_tracked.load(Ordering::Relaxed),
            last_sync_duration_ms: self.last_sync_duration_ms.load(Ordering::Relaxed),
            last_sync_timestamp: self.last_sync_timestamp.load(Ordering::Relaxed),
            changes_detected: self.changes_detected.load(Ordering::Relaxed),
        }
    }

    /// Prometheus text exposition.
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let rows: [(&str, &str, &str, String); 10] = [
            ("full_syncs_total", "counter", "Total number of full synchronizations", s.full_syncs_total.to_string()),
            ("quick_checks_total", "counter", "Total number of quick checks", s.quick_checks_total.to_string()),
            ("vms_synced_total", "counter", "Total number of VMs synchronized", s.vms_synced_total.to_string()),
            ("lxc_synced_total", "counter", "Total number of LXC containers synchronized", s.lxc_synced_total.to_string()),
            ("errors_total", "counter", "Total number of errors", s.errors_total.to_string()),
            ("vms_tracked", "gauge", "Number of VMs currently tracked", s.vms_tracked.to_string()),
            ("lxc_tracked", "gauge", "Number of LXC containers currently tracked", s.lxc_tracked.to_string()),
            (
                "last_sync_duration_seconds",
                "gauge",
                "Duration of last sync in seconds",
                format!("{:.2}", s.last_sync_duration_ms as f64 / 1000.0),
            ),
            (
                "last_sync_timestamp_seconds",
                "gauge",
                "Timestamp of last successful sync",
                s.last_sync_timestamp.to_string(),
            ),
            ("changes_detected", "gauge", "Number of changes detected in last quick check", s.changes_detected.to_string()),
        ];

        let mut out = String::new();
        for (name, kind, help, value) in rows {
            let _ = writeln!(out, "# HELP pvesync_{} {}", name, help);
            let _ = writeln!(out, "# TYPE pvesync_{} {}", name, kind);
            let _ = writeln!(out, "pvesync_{} {}", name, value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prometheus() {
        let metrics = SyncMetrics::new();
        metrics.record_full_sync();
        metrics.record_synced(3, 2);
        metrics.record_errors(1);
        metrics.record_full_sync_end(Duration::from_millis(1500), 1_700_000_000);

        let text = metrics.render_prometheus();

        assert!(text.contains("# TYPE pvesync_full_syncs_total counter"));
        assert!(text.contains("pvesync_full_syncs_total 1\n"));
        assert!(text.contains("pvesync_vms_synced_total 3\n"));
        assert!(text.contains("pvesync_lxc_synced_total 2\n"));
        assert!(text.contains("pvesync_errors_total 1\n"));
        assert!(text.contains("pvesync_last_sync_duration_seconds 1.50\n"));
        assert!(text.contains("pvesync_last_sync_timestamp_seconds 1700000000\n"));
    }

    #[test]
    fn test_quick_check_sets_gauge() {
        let metrics = SyncMetrics::new();
        metrics.record_quick_check(4);
        metrics.record_quick_check(1);

        let s = metrics.snapshot();
        assert_eq!(s.quick_checks_total, 2);
        assert_eq!(s.changes_detected, 1);
    }
}
