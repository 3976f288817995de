use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Cheap, always-on counters for [`Pool`][crate::pool::Pool] activity.
///
/// All counters are monotonic over the life of the pool; read them through
/// [`snapshot`][Self::snapshot].
#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    pub(crate) acquires: AtomicU64,
    pub(crate) acquire_timeouts: AtomicU64,
    pub(crate) connections_created: AtomicU64,
    pub(crate) connections_closed: AtomicU64,
    pub(crate) create_failures: AtomicU64,
    pub(crate) validations: AtomicU64,
    pub(crate) validation_failures: AtomicU64,
    pub(crate) leaks_detected: AtomicU64,

    // sum of time spent inside `acquire`, for the average
    acquire_wait_micros: AtomicU64,
}

impl PoolMetrics {
    pub(crate) fn record_acquire(&self, wait: Duration) {
        self.acquires.fetch_add(1, Ordering::Relaxed);
        self.acquire_wait_micros
            .fetch_add(wait.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolMetricsSnapshot {
        let acquires = self.acquires.load(Ordering::Relaxed);
        let wait = self.acquire_wait_micros.load(Ordering::Relaxed);

        PoolMetricsSnapshot {
            acquires,
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            create_failures: self.create_failures.load(Ordering::Relaxed),
            validations: self.validations.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            leaks_detected: self.leaks_detected.load(Ordering::Relaxed),
            avg_acquire_time: if acquires == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(wait / acquires)
            },
        }
    }
}

/// A point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub acquires: u64,
    pub acquire_timeouts: u64,
    pub connections_created: u64,
    pub connections_closed: u64,
    pub create_failures: u64,
    pub validations: u64,
    pub validation_failures: u64,
    pub leaks_detected: u64,
    pub avg_acquire_time: Duration,
}
