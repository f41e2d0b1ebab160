//! Event counters for the placement, removal and read paths.
//!
//! Only the events that say something about table health are counted: read
//! retries, overflow placements, relocations and failed inserts. Hits and
//! misses are left to the caller, which already sees every result.

use std::sync::atomic::{AtomicU64, Ordering};

/// Relaxed atomic counters shared by all threads using one cache.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Lock-free reads restarted because a writer moved the segment version.
    pub read_retries: AtomicU64,
    /// Entries placed by the forward or backward overflow scan.
    pub overflow_placements: AtomicU64,
    /// Entries moved into a freed slot by defragmentation.
    pub relocations: AtomicU64,
    /// Inserts rejected with [`CacheError::TableFull`](crate::CacheError::TableFull).
    pub table_full: AtomicU64,
}

impl CacheMetrics {
    /// Create a set of zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one restarted lock-free read.
    #[inline]
    pub fn record_read_retry(&self) {
        self.read_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one entry placed by an overflow scan.
    #[inline]
    pub fn record_overflow_placement(&self) {
        self.overflow_placements.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one defragmentation move.
    #[inline]
    pub fn record_relocation(&self) {
        self.relocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one rejected insert.
    #[inline]
    pub fn record_table_full(&self) {
        self.table_full.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            read_retries: self.read_retries.load(Ordering::Relaxed),
            overflow_placements: self.overflow_placements.load(Ordering::Relaxed),
            relocations: self.relocations.load(Ordering::Relaxed),
            table_full: self.table_full.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.read_retries.store(0, Ordering::Relaxed);
        self.overflow_placements.store(0, Ordering::Relaxed);
        self.relocations.store(0, Ordering::Relaxed);
        self.table_full.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// See [`CacheMetrics::read_retries`].
    pub read_retries: u64,
    /// See [`CacheMetrics::overflow_placements`].
    pub overflow_placements: u64,
    /// See [`CacheMetrics::relocations`].
    pub relocations: u64,
    /// See [`CacheMetrics::table_full`].
    pub table_full: u64,
}
