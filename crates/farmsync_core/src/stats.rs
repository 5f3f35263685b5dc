//! Sync statistics.
//!
//! Counters are atomic and can be read while calls are in flight. All of
//! them increase monotonically for the lifetime of an orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for sync calls served by one orchestrator.
#[derive(Debug, Default)]
pub struct SyncStats {
    /// Sync, push and pull calls started.
    calls: AtomicU64,
    /// Calls whose change batch was committed.
    commits: AtomicU64,
    /// Calls whose change batch was rolled back.
    rollbacks: AtomicU64,
    /// Rows written.
    rows_applied: AtomicU64,
    /// Rows skipped.
    rows_skipped: AtomicU64,
    /// Placeholder parents created.
    parents_synthesized: AtomicU64,
    /// Rows returned in deltas.
    rows_pulled: AtomicU64,
}

impl SyncStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self, applied: u64, skipped: u64, synthesized: u64) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.rows_applied.fetch_add(applied, Ordering::Relaxed);
        self.rows_skipped.fetch_add(skipped, Ordering::Relaxed);
        self.parents_synthesized
            .fetch_add(synthesized, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pulled(&self, rows: u64) {
        self.rows_pulled.fetch_add(rows, Ordering::Relaxed);
    }

    /// Returns the number of calls started.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Returns the number of committed change batches.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of rolled back change batches.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns the number of rows written.
    pub fn rows_applied(&self) -> u64 {
        self.rows_applied.load(Ordering::Relaxed)
    }

    /// Returns the number of rows skipped.
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped.load(Ordering::Relaxed)
    }

    /// Returns the number of placeholder parents created.
    pub fn parents_synthesized(&self) -> u64 {
        self.parents_synthesized.load(Ordering::Relaxed)
    }

    /// Returns the number of rows returned in deltas.
    pub fn rows_pulled(&self) -> u64 {
        self.rows_pulled.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            calls: self.calls(),
            commits: self.commits(),
            rollbacks: self.rollbacks(),
            rows_applied: self.rows_applied(),
            rows_skipped: self.rows_skipped(),
            parents_synthesized: self.parents_synthesized(),
            rows_pulled: self.rows_pulled(),
        }
    }
}

/// A point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Calls started.
    pub calls: u64,
    /// Committed change batches.
    pub commits: u64,
    /// Rolled back change batches.
    pub rollbacks: u64,
    /// Rows written.
    pub rows_applied: u64,
    /// Rows skipped.
    pub rows_skipped: u64,
    /// Placeholder parents created.
    pub parents_synthesized: u64,
    /// Rows returned in deltas.
    pub rows_pulled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = SyncStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn commits_accumulate_rows() {
        let stats = SyncStats::new();
        stats.record_call();
        stats.record_commit(3, 1, 2);
        stats.record_call();
        stats.record_commit(2, 0, 0);
        stats.record_call();
        stats.record_rollback();
        stats.record_pulled(7);

        let snap = stats.snapshot();
        assert_eq!(snap.calls, 3);
        assert_eq!(snap.commits, 2);
        assert_eq!(snap.rollbacks, 1);
        assert_eq!(snap.rows_applied, 5);
        assert_eq!(snap.rows_skipped, 1);
        assert_eq!(snap.parents_synthesized, 2);
        assert_eq!(snap.rows_pulled, 7);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(SyncStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_call();
                        s.record_pulled(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.calls(), 800);
        assert_eq!(stats.rows_pulled(), 800);
    }
}
