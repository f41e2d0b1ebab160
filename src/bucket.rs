//! Bucket record layout, sentinels and relative-offset arithmetic.
//!
//! A bucket plays two independent roles at once:
//!
//! - **Anchor**: `head` links to the first entry of the chain whose home is
//!   this bucket.
//! - **Entry**: `hash`, `key`, `data` and `next` hold one key/value pair that
//!   belongs to some chain, not necessarily the one anchored here.
//!
//! ```text
//! +------+------+-----------+---------+------+-----+------+
//! | head | next | rsv cnt x2| rsv lnk | hash | key | data |
//! | i16  | i16  |   u16 x2  | u32 x2  | u32  | u32 | u64  |
//! +------+------+-----------+---------+------+-----+------+
//!                     32 bytes per record
//! ```
//!
//! Links are signed 16-bit distances in bucket units from the bucket holding
//! the link, with `i16::MIN` meaning "no link".

use crate::handle::Handle;
use crate::sync::{AtomicI16, AtomicU32, AtomicU64, Ordering};

/// Link value meaning "chain ends here".
pub const NO_LINK: i16 = i16::MIN;

/// Hash value of an unused bucket.
pub const EMPTY_HASH: u32 = u32::MAX;

/// Key value of an unused bucket. Keys equal to this cannot be stored.
pub const EMPTY_KEY: u32 = u32::MAX;

/// Size in bytes of one bucket record, used to derive buckets per cache line.
pub const RECORD_SIZE: usize = 32;

/// Largest distance a placement scan may move away from the home bucket.
pub const MAX_PROBE_DISTANCE: usize = i16::MAX as usize - 1;

/// Largest distance between any two members of one chain.
///
/// Holding every chain to this bound keeps the link produced by splicing out
/// any member representable.
pub const MAX_CHAIN_SPREAD: usize = i16::MAX as usize;

/// One fixed-size record of the bucket array.
#[repr(C)]
pub(crate) struct Bucket {
    head: AtomicI16,
    next: AtomicI16,
    // per-entry reader/writer counts, reserved
    _reserved_counters: [u16; 2],
    // eviction list links, reserved
    _reserved_links: [u32; 2],
    hash: AtomicU32,
    key: AtomicU32,
    data: AtomicU64,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(std::mem::size_of::<Bucket>() == RECORD_SIZE);

impl Bucket {
    pub fn new() -> Self {
        Self {
            head: AtomicI16::new(NO_LINK),
            next: AtomicI16::new(NO_LINK),
            _reserved_counters: [0; 2],
            _reserved_links: [0; 2],
            hash: AtomicU32::new(EMPTY_HASH),
            key: AtomicU32::new(EMPTY_KEY),
            data: AtomicU64::new(Handle::to_bits(None)),
        }
    }

    /// Link to the first entry of the chain anchored here.
    #[inline]
    pub fn head(&self) -> i16 {
        self.head.load(Ordering::Acquire)
    }

    /// Publish a new head link. Everything written to the target entry before
    /// this call is visible to readers that follow the link.
    #[inline]
    pub fn set_head(&self, link: i16) {
        self.head.store(link, Ordering::Release);
    }

    /// Link to the next entry of the chain this entry belongs to.
    #[inline]
    pub fn next(&self) -> i16 {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_next(&self, link: i16) {
        self.next.store(link, Ordering::Release);
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash.load(Ordering::Acquire)
    }

    #[inline]
    pub fn key(&self) -> u32 {
        self.key.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn data(&self) -> Option<Handle> {
        Handle::from_bits(self.data.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hash() == EMPTY_HASH
    }

    /// Exact match: the hash is a cheap filter, the key is authoritative.
    #[inline]
    pub fn matches(&self, hash: u32, key: u32) -> bool {
        self.hash() == hash && self.key() == key
    }

    /// Claim an empty bucket for a new entry by swapping the empty hash
    /// sentinel for `hash`.
    ///
    /// Placement scans of different segments may race for the same free
    /// bucket; exactly one claim succeeds.
    #[inline]
    pub fn try_claim(&self, hash: u32) -> bool {
        self.hash
            .compare_exchange(EMPTY_HASH, hash, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Fill a claimed bucket. The entry is not reachable until a link to it
    /// is published.
    #[inline]
    pub fn fill(&self, key: u32, data: Handle, next: i16) {
        self.key.store(key, Ordering::Relaxed);
        self.data
            .store(Handle::to_bits(Some(data)), Ordering::Relaxed);
        self.next.store(next, Ordering::Release);
    }

    /// Return the entry fields to the empty state.
    ///
    /// The hash is cleared last: once it reads empty another writer may claim
    /// the bucket and overwrite the rest.
    #[inline]
    pub fn clear(&self) {
        self.next.store(NO_LINK, Ordering::Relaxed);
        self.key.store(EMPTY_KEY, Ordering::Relaxed);
        self.data.store(Handle::to_bits(None), Ordering::Relaxed);
        self.hash.store(EMPTY_HASH, Ordering::Release);
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self::new()
    }
}

/// Link from bucket `from` to bucket `to`, if the distance fits in a link.
#[inline]
pub(crate) fn link_between(from: usize, to: usize) -> Option<i16> {
    let delta = to as isize - from as isize;
    if delta.unsigned_abs() <= i16::MAX as usize {
        Some(delta as i16)
    } else {
        None
    }
}

/// Bucket reached by following `link` from bucket `from`.
///
/// Returns `None` for `NO_LINK` and for links that would leave
/// `0..len`, which only a reader racing a writer can observe.
#[inline]
pub(crate) fn follow(from: usize, link: i16, len: usize) -> Option<usize> {
    if link == NO_LINK {
        return None;
    }
    let to = from.checked_add_signed(link as isize)?;
    (to < len).then_some(to)
}

/// Re-express a link held by bucket `from` as a link held by bucket `to`.
///
/// `NO_LINK` stays `NO_LINK`.
#[inline]
pub(crate) fn relink(from: usize, link: i16, to: usize) -> Option<i16> {
    if link == NO_LINK {
        return Some(NO_LINK);
    }
    let target = from.checked_add_signed(link as isize)?;
    link_between(to, target)
}
