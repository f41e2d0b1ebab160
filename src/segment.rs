//! Lock and version partition over a contiguous range of home buckets.
//!
//! Writers serialize on the segment's spin lock. Lock-free readers detect
//! interference through the version counter, which works like a seqlock:
//!
//! ```text
//!   even ---- begin_unsafe ---> odd ---- end_unsafe ---> even
//!        (unlink/clear/relocate happens while odd)
//! ```
//!
//! Only mutations that can break a traversal already in flight (removal and
//! relocation) move the version. Insertion publishes a fully written entry
//! before linking it and leaves the version alone.

use crate::sync::{AtomicU32, Ordering, fence, spin_loop};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// A version counter plus an exclusive spin lock.
#[repr(align(64))]
pub(crate) struct Segment {
    version: AtomicU32,
    lock: AtomicU32,
}

impl Segment {
    pub fn new() -> Self {
        Self {
            version: AtomicU32::new(0),
            lock: AtomicU32::new(UNLOCKED),
        }
    }

    /// Spin until the lock moves from unlocked to locked.
    ///
    /// There is no timeout and no fairness between spinning writers.
    #[inline]
    pub fn lock(&self) -> SegmentGuard<'_> {
        while self
            .lock
            .compare_exchange_weak(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.lock.load(Ordering::Relaxed) == LOCKED {
                spin_loop();
            }
        }
        SegmentGuard { segment: self }
    }

    /// Current version. Exposed for diagnostics and tests.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    /// Snapshot the version for an optimistic read, waiting out any unsafe
    /// mutation that is in progress.
    #[inline]
    pub fn read_begin(&self) -> u32 {
        loop {
            let version = self.version.load(Ordering::Acquire);
            if version & 1 == 0 {
                return version;
            }
            spin_loop();
        }
    }

    /// Check that no unsafe mutation ran since `read_begin` returned `start`.
    #[inline]
    pub fn read_validate(&self, start: u32) -> bool {
        fence(Ordering::Acquire);
        self.version.load(Ordering::Relaxed) == start
    }
}

impl Default for Segment {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one segment. Unlocks on drop.
pub(crate) struct SegmentGuard<'a> {
    segment: &'a Segment,
}

impl SegmentGuard<'_> {
    /// Mark the start of a mutation that may invalidate in-flight readers.
    #[inline]
    pub fn begin_unsafe(&self) {
        let version = self.segment.version.load(Ordering::Relaxed);
        self.segment
            .version
            .store(version.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Mark the end of a mutation started with [`SegmentGuard::begin_unsafe`].
    #[inline]
    pub fn end_unsafe(&self) {
        let version = self.segment.version.load(Ordering::Relaxed);
        self.segment
            .version
            .store(version.wrapping_add(1), Ordering::Release);
    }
}

impl Drop for SegmentGuard<'_> {
    fn drop(&mut self) {
        let prev = self.segment.lock.swap(UNLOCKED, Ordering::Release);
        debug_assert_eq!(prev, LOCKED, "segment unlocked while not held");
    }
}
