//! Flat bucket array with a fixed overflow region.
//!
//! Indices `0..=bucket_mask` are home buckets addressed directly by keys.
//! The `overflow_span + 1` buckets past them are never a home and only host
//! entries placed there by a forward overflow scan.
//!
//! Buckets are grouped into aligned runs of `line_span` records, one hardware
//! cache line each. A chain whose members all sit in its home group is read
//! with a single line fill.

use std::ops::Range;

use crate::bucket::{Bucket, MAX_CHAIN_SPREAD, NO_LINK, follow};

/// Outcome of a lock-free chain probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// The key is stored at this bucket index.
    Found(usize),
    /// The chain ended without a match.
    Absent,
    /// The walk left the table or did not terminate. Only possible while a
    /// writer is mutating the chain, so the caller retries.
    Interfered,
}

/// A chain member and the bucket holding the link that reaches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Member {
    pub index: usize,
    /// `None` when the link is the anchor's `head`.
    pub prev: Option<usize>,
}

pub(crate) struct BucketTable {
    buckets: Box<[Bucket]>,
    bucket_mask: u32,
    line_span: usize,
}

impl BucketTable {
    /// Allocate `capacity + overflow_span + 1` empty buckets.
    ///
    /// `capacity` and `line_span` must be powers of two.
    pub fn new(capacity: usize, overflow_span: usize, line_span: usize) -> Self {
        debug_assert!(capacity.is_power_of_two());
        debug_assert!(line_span.is_power_of_two());

        let buckets = (0..capacity + overflow_span + 1)
            .map(|_| Bucket::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            buckets,
            bucket_mask: (capacity - 1) as u32,
            line_span,
        }
    }

    /// Total number of buckets, overflow region included.
    #[inline]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub fn bucket(&self, index: usize) -> &Bucket {
        &self.buckets[index]
    }

    #[inline]
    pub fn home(&self, key: u32) -> usize {
        (key & self.bucket_mask) as usize
    }

    /// Whether `index` can anchor a chain.
    #[inline]
    pub fn is_home(&self, index: usize) -> bool {
        index <= self.bucket_mask as usize
    }

    #[inline]
    pub fn line_span(&self) -> usize {
        self.line_span
    }

    /// The cache-line group containing `index`, clipped to the table.
    #[inline]
    pub fn group(&self, index: usize) -> Range<usize> {
        let start = index & !(self.line_span - 1);
        start..(start + self.line_span).min(self.len())
    }

    /// Indices of `index`'s group, starting at `index` and wrapping around
    /// within the group.
    pub fn group_from(&self, index: usize) -> impl Iterator<Item = usize> + use<> {
        let group = self.group(index);
        let width = group.len();
        let offset = index - group.start;
        (0..width).map(move |i| group.start + (offset + i) % width)
    }

    /// Look for `key` in the chain anchored at `home` without locking.
    ///
    /// Every step is bounds checked and the walk is capped at the table
    /// length, so a concurrent writer can only cause `Interfered`, never an
    /// out-of-range access or an endless walk.
    pub fn probe(&self, home: usize, key: u32) -> Probe {
        let len = self.len();
        let mut holder = home;
        let mut link = self.bucket(home).head();

        // one pass per member plus one to read the final link of a chain
        // that holds every bucket
        for _ in 0..=len {
            if link == NO_LINK {
                return Probe::Absent;
            }
            let Some(index) = follow(holder, link, len) else {
                return Probe::Interfered;
            };
            let bucket = self.bucket(index);
            if bucket.matches(key, key) {
                return Probe::Found(index);
            }
            holder = index;
            link = bucket.next();
        }

        Probe::Interfered
    }

    /// Iterate the chain anchored at `home`.
    ///
    /// Stable only while the home segment's lock is held; unlocked callers
    /// (diagnostics) get a best-effort walk that is still bounded.
    pub fn chain(&self, home: usize) -> Chain<'_> {
        Chain {
            table: self,
            holder: home,
            prev: None,
            link: self.bucket(home).head(),
            budget: self.len(),
        }
    }

    /// Lowest and highest member index of a chain, ignoring `skip`.
    pub fn chain_bounds(&self, home: usize, skip: Option<usize>) -> Option<(usize, usize)> {
        self.chain(home)
            .map(|member| member.index)
            .filter(|&index| Some(index) != skip)
            .fold(None, |bounds, index| match bounds {
                None => Some((index, index)),
                Some((lo, hi)) => Some((lo.min(index), hi.max(index))),
            })
    }

    /// Number of non-empty buckets.
    ///
    /// Unsynchronized: concurrent writers make this an estimate.
    pub fn occupied(&self) -> usize {
        self.buckets.iter().filter(|b| !b.is_empty()).count()
    }

    /// Percentage of chained entries that sit inside their home bucket's
    /// cache-line group, or `None` if no chain has entries.
    pub fn locality(&self) -> Option<f64> {
        let mut total = 0usize;
        let mut local = 0usize;

        for home in 0..=self.bucket_mask as usize {
            let group = self.group(home);
            for member in self.chain(home) {
                total += 1;
                if group.contains(&member.index) {
                    local += 1;
                }
            }
        }

        (total > 0).then(|| local as f64 / total as f64 * 100.0)
    }
}

/// Whether adding `candidate` to a chain spanning `bounds` keeps every pair
/// of members within link range of each other.
#[inline]
pub(crate) fn within_spread(bounds: Option<(usize, usize)>, candidate: usize) -> bool {
    match bounds {
        None => true,
        Some((lo, hi)) => hi.max(candidate) - lo.min(candidate) <= MAX_CHAIN_SPREAD,
    }
}

/// Iterator over the members of one chain. See [`BucketTable::chain`].
pub(crate) struct Chain<'a> {
    table: &'a BucketTable,
    holder: usize,
    prev: Option<usize>,
    link: i16,
    budget: usize,
}

impl Iterator for Chain<'_> {
    type Item = Member;

    fn next(&mut self) -> Option<Member> {
        if self.budget == 0 {
            return None;
        }
        self.budget -= 1;

        let index = follow(self.holder, self.link, self.table.len())?;
        let member = Member {
            index,
            prev: self.prev,
        };

        self.prev = Some(index);
        self.holder = index;
        self.link = self.table.bucket(index).next();

        Some(member)
    }
}
