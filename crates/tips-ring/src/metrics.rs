use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for monitoring a [`crate::RingBuffer`]'s behavior.
///
/// Every field is an independent atomic counter so producers and readers
/// never contend with each other just to update metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Slots successfully claimed (across all producers).
    pub claimed: AtomicU64,
    /// Slots successfully committed.
    pub committed: AtomicU64,
    /// Number of times `claim`/`kill_claim` had to back off waiting for room.
    pub claim_spins: AtomicU64,
    /// Number of readers forcibly marked dead by `purge()` or `kill_claim`.
    pub readers_killed: AtomicU64,
    /// Number of `peek` calls that returned zero slots.
    pub empty_peeks: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_claim(&self, n: u64) {
        self.claimed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_commit(&self, n: u64) {
        self.committed.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_spin(&self) {
        self.claim_spins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_reader_killed(&self) {
        self.readers_killed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_empty_peek(&self) {
        self.empty_peeks.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time snapshot, useful for logging/telemetry without holding
    /// references into the live counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            claim_spins: self.claim_spins.load(Ordering::Relaxed),
            readers_killed: self.readers_killed.load(Ordering::Relaxed),
            empty_peeks: self.empty_peeks.load(Ordering::Relaxed),
        }
    }
}

/// A copyable point-in-time read of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub claimed: u64,
    pub committed: u64,
    pub claim_spins: u64,
    pub readers_killed: u64,
    pub empty_peeks: u64,
}
