//! The shared cache: construction, lock-free lookups and diagnostics.
//!
//! Insertion lives in [`crate::insert`], removal and defragmentation in
//! [`crate::remove`].

use tracing::debug;

use crate::bucket::EMPTY_KEY;
use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::handle::Handle;
use crate::metrics::CacheMetrics;
use crate::segment::Segment;
use crate::sync::spin_loop;
use crate::table::{BucketTable, Probe};

/// Fixed-capacity concurrent cache mapping pre-hashed `u32` keys to opaque
/// [`Handle`]s.
///
/// - Lookups never lock. They retry when the key's segment version shows a
///   concurrent removal or relocation.
/// - Mutations take the key's segment lock, so writers in different segments
///   run in parallel.
/// - Capacity is fixed at construction; a full neighbourhood makes `put`
///   return [`CacheError::TableFull`](crate::CacheError::TableFull).
///
/// Keys are used as bucket addresses directly and should already be well
/// distributed. `u32::MAX` is reserved.
pub struct DeltaCache {
    pub(crate) table: BucketTable,
    pub(crate) segments: Box<[Segment]>,
    segment_mask: u32,
    segment_shift: u32,
    pub(crate) cacheline_placement: bool,
    overflow_span: usize,
    pub(crate) metrics: CacheMetrics,
}

impl DeltaCache {
    /// Create a cache.
    ///
    /// - `capacity`: home buckets, rounded up to a power of two
    /// - `threads`: expected concurrent writers, sets the segment count
    /// - `line_size`: cache line size in bytes
    /// - `cacheline_placement`: place entries in the home cache line first
    ///   and defragment after removals
    pub fn new(
        capacity: usize,
        threads: usize,
        line_size: usize,
        cacheline_placement: bool,
    ) -> CacheResult<Self> {
        Self::from_config(&CacheConfig {
            capacity,
            threads,
            line_size,
            cacheline_placement,
            ..Default::default()
        })
    }

    /// Create a cache from a [`CacheConfig`].
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let geometry = config.geometry()?;

        let table = BucketTable::new(
            geometry.capacity,
            geometry.overflow_span,
            geometry.line_span,
        );
        let segments = (0..geometry.num_segments)
            .map(|_| Segment::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        debug!(
            capacity = geometry.capacity,
            segments = geometry.num_segments,
            segment_shift = geometry.segment_shift,
            line_span = geometry.line_span,
            overflow_span = geometry.overflow_span,
            cacheline_placement = config.cacheline_placement,
            "cache initialized"
        );

        Ok(Self {
            table,
            segments,
            segment_mask: geometry.segment_mask,
            segment_shift: geometry.segment_shift,
            cacheline_placement: config.cacheline_placement,
            overflow_span: geometry.overflow_span,
            metrics: CacheMetrics::new(),
        })
    }

    /// Start building a cache.
    pub fn builder() -> DeltaCacheBuilder {
        DeltaCacheBuilder::new()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: u32) -> bool {
        self.get(key).is_some()
    }

    /// Look up the handle stored for `key`.
    ///
    /// Lock-free. The chain is walked optimistically and the walk is retried
    /// until the segment version is unchanged across it. A key inserted
    /// concurrently may not be seen yet; a key removed before the call
    /// returns is never reported.
    pub fn get(&self, key: u32) -> Option<Handle> {
        if key == EMPTY_KEY {
            return None;
        }

        let home = self.table.home(key);
        let segment = &self.segments[self.segment_index(key)];

        loop {
            let start = segment.read_begin();

            let result = match self.table.probe(home, key) {
                Probe::Found(index) => match self.table.bucket(index).data() {
                    Some(data) => Some(data),
                    // cleared under us
                    None => {
                        self.metrics.record_read_retry();
                        spin_loop();
                        continue;
                    }
                },
                Probe::Absent => None,
                Probe::Interfered => {
                    self.metrics.record_read_retry();
                    spin_loop();
                    continue;
                }
            };

            if segment.read_validate(start) {
                return result;
            }

            self.metrics.record_read_retry();
        }
    }

    /// Approximate number of stored entries.
    ///
    /// A full unsynchronized scan of the bucket array, overflow region
    /// included. Concurrent writers can make it under- or over-count.
    pub fn size(&self) -> usize {
        self.table.occupied()
    }

    /// Percentage of entries stored inside their home bucket's cache-line
    /// group, or `None` when the cache is empty.
    ///
    /// Unsynchronized, like [`DeltaCache::size`].
    pub fn cacheline_locality(&self) -> Option<f64> {
        self.table.locality()
    }

    /// Number of home buckets (capacity rounded up to a power of two).
    pub fn capacity(&self) -> usize {
        self.table.len() - self.overflow_span - 1
    }

    /// Number of lock/version segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    /// Buckets per cache-line group.
    pub fn line_span(&self) -> usize {
        self.table.line_span()
    }

    /// Buckets past the home range reserved for overflow entries.
    pub fn overflow_span(&self) -> usize {
        self.overflow_span
    }

    /// Whether cache-line-local placement and defragmentation are enabled.
    pub fn is_cacheline_placement(&self) -> bool {
        self.cacheline_placement
    }

    /// Event counters.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Segment owning `key`'s home bucket.
    #[inline]
    pub(crate) fn segment_index(&self, key: u32) -> usize {
        ((key >> self.segment_shift) & self.segment_mask) as usize
    }

    /// Segment owning the chain anchored at home bucket `home`.
    #[inline]
    pub(crate) fn segment_of_home(&self, home: usize) -> usize {
        self.segment_index(home as u32)
    }

    /// Store `link` in whichever bucket links to a chain member: the anchor's
    /// head when `prev` is `None`, otherwise `prev`'s next.
    #[inline]
    pub(crate) fn set_link(&self, anchor: usize, prev: Option<usize>, link: i16) {
        match prev {
            None => self.table.bucket(anchor).set_head(link),
            Some(prev) => self.table.bucket(prev).set_next(link),
        }
    }
}

/// Builder for [`DeltaCache`].
///
/// ```
/// use deltacache::DeltaCache;
///
/// let cache = DeltaCache::builder()
///     .capacity(1 << 16)
///     .threads(8)
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(cache.capacity(), 65536);
/// assert_eq!(cache.num_segments(), 8);
/// ```
#[derive(Debug, Clone, Default)]
pub struct DeltaCacheBuilder {
    config: CacheConfig,
}

impl DeltaCacheBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested number of home buckets (default: 1024).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Expected number of concurrent writers (default: 1).
    pub fn threads(mut self, threads: usize) -> Self {
        self.config.threads = threads;
        self
    }

    /// Cache line size in bytes (default: 64).
    pub fn line_size(mut self, line_size: usize) -> Self {
        self.config.line_size = line_size;
        self
    }

    /// Enable cache-line-local placement and defragmentation (default: on).
    pub fn cacheline_placement(mut self, enabled: bool) -> Self {
        self.config.cacheline_placement = enabled;
        self
    }

    /// Buckets reserved past the home range (default: 4096).
    pub fn overflow_span(mut self, span: usize) -> Self {
        self.config.overflow_span = span;
        self
    }

    /// Build the cache.
    pub fn build(self) -> CacheResult<DeltaCache> {
        DeltaCache::from_config(&self.config)
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::sync::Arc;
    use loom::thread;

    fn handle(raw: u64) -> Handle {
        Handle::from_raw(raw).unwrap()
    }

    /// Four home buckets and one spare, one segment.
    fn small_cache() -> DeltaCache {
        DeltaCache::builder()
            .capacity(4)
            .overflow_span(0)
            .build()
            .unwrap()
    }

    /// Two writers inserting colliding keys both succeed.
    #[test]
    fn test_concurrent_put_colliding_keys() {
        loom::model(|| {
            let cache = Arc::new(small_cache());

            let c1 = cache.clone();
            let c2 = cache.clone();

            let t1 = thread::spawn(move || c1.put(1, handle(1)));
            let t2 = thread::spawn(move || c2.put(5, handle(5)));

            assert_eq!(t1.join().unwrap(), Ok(None));
            assert_eq!(t2.join().unwrap(), Ok(None));

            assert_eq!(cache.get(1), Some(handle(1)));
            assert_eq!(cache.get(5), Some(handle(5)));
            assert_eq!(cache.size(), 2);
        });
    }

    /// Two writers racing on one key: exactly one wins and both observe the
    /// winner's handle afterwards.
    #[test]
    fn test_concurrent_put_same_key() {
        loom::model(|| {
            let cache = Arc::new(small_cache());

            let c1 = cache.clone();
            let c2 = cache.clone();

            let t1 = thread::spawn(move || c1.put(2, handle(10)));
            let t2 = thread::spawn(move || c2.put(2, handle(20)));

            let r1 = t1.join().unwrap();
            let r2 = t2.join().unwrap();

            let winner = match (r1, r2) {
                (Ok(None), Ok(Some(existing))) => {
                    assert_eq!(existing, handle(10));
                    handle(10)
                }
                (Ok(Some(existing)), Ok(None)) => {
                    assert_eq!(existing, handle(20));
                    handle(20)
                }
                other => panic!("unexpected results: {:?}", other),
            };

            assert_eq!(cache.get(2), Some(winner));
            assert_eq!(cache.size(), 1);
        });
    }

    /// A reader walking a chain while its head entry is removed still finds
    /// the entry behind it and never reports the removed one afterwards.
    #[test]
    fn test_get_during_remove() {
        loom::model(|| {
            let cache = Arc::new(small_cache());
            cache.put(1, handle(1)).unwrap();
            cache.put(5, handle(5)).unwrap();
            cache.put(9, handle(9)).unwrap();

            let writer = cache.clone();
            let reader = cache.clone();

            let t1 = thread::spawn(move || writer.remove(5));
            let t2 = thread::spawn(move || (reader.get(1), reader.get(9)));

            assert_eq!(t1.join().unwrap(), Some(handle(5)));
            let (first, last) = t2.join().unwrap();
            assert_eq!(first, Some(handle(1)));
            assert_eq!(last, Some(handle(9)));

            assert_eq!(cache.get(5), None);
        });
    }
}
