//! Plain atomic counters surfaced for delivery/crash/backlog visibility. Not
//! a telemetry backend: with the `telemetry` Cargo feature off (the
//! default), these are the only signal emitted besides `tracing` log lines.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub worker_crashes: AtomicU64,
    pub dropped_deliveries: AtomicU64,
    pub mailbox_over_soft_limit: AtomicU64,
}

impl Metrics {
    pub fn record_crash(&self) {
        self.worker_crashes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped_delivery(&self) {
        self.dropped_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mailbox_over_soft_limit(&self) {
        self.mailbox_over_soft_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            worker_crashes: self.worker_crashes.load(Ordering::Relaxed),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
            mailbox_over_soft_limit: self.mailbox_over_soft_limit.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub worker_crashes: u64,
    pub dropped_deliveries: u64,
    pub mailbox_over_soft_limit: u64,
}
