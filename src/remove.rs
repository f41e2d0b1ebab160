//! Removal engine and cache-line defragmentation.
//!
//! Removing an entry splices it out of its chain and clears its bucket, both
//! inside an unsafe section of the home segment's version so lock-free
//! readers walking through it retry.
//!
//! With cache-line placement on, the freed bucket is then offered to the
//! chains anchored in its cache-line group: the first chain member found
//! stored outside the group is moved into it. One relocation per removal at
//! most.

use tracing::{error, trace};

use crate::bucket::{EMPTY_KEY, link_between, relink};
use crate::cache::DeltaCache;
use crate::handle::Handle;
use crate::segment::SegmentGuard;
use crate::table::{Member, within_spread};

impl DeltaCache {
    /// Remove `key` and return its handle, or `None` if it was not present.
    pub fn remove(&self, key: u32) -> Option<Handle> {
        if key == EMPTY_KEY {
            return None;
        }

        let home = self.table.home(key);
        let segment = self.segment_index(key);
        let guard = self.segments[segment].lock();

        let member = self
            .table
            .chain(home)
            .find(|member| self.table.bucket(member.index).matches(key, key))?;

        let bucket = self.table.bucket(member.index);
        let data = bucket.data();

        // the successor as seen from whoever links to the removed entry
        let holder = member.prev.unwrap_or(home);
        let link = relink(member.index, bucket.next(), holder);
        debug_assert!(link.is_some(), "chain members must stay within link range");
        let Some(link) = link else {
            error!(key, home, "chain link out of range, entry left in place");
            return None;
        };

        guard.begin_unsafe();
        self.set_link(home, member.prev, link);
        bucket.clear();
        guard.end_unsafe();

        if self.cacheline_placement {
            self.defragment(&guard, segment, member.index);
        }

        data
    }

    /// Move one out-of-group chain member into the bucket at `freed`.
    ///
    /// Only chains anchored in `segment` are considered: those are the only
    /// ones the held lock protects.
    fn defragment(&self, guard: &SegmentGuard<'_>, segment: usize, freed: usize) {
        let group = self.table.group(freed);

        for anchor in group.clone() {
            if !self.table.is_home(anchor) || self.segment_of_home(anchor) != segment {
                continue;
            }
            // another segment's writer claimed the bucket
            if !self.table.bucket(freed).is_empty() {
                return;
            }

            let Some(member) = self
                .table
                .chain(anchor)
                .find(|member| !group.contains(&member.index))
            else {
                continue;
            };

            if self.relocate(guard, anchor, member, freed) {
                return;
            }
        }
    }

    /// Copy `member` of the chain anchored at `anchor` into the empty bucket
    /// `target`, repoint its predecessor, and clear the old bucket.
    ///
    /// Returns `false` without touching anything if the move would put a
    /// link out of range or `target` was claimed by someone else.
    fn relocate(
        &self,
        guard: &SegmentGuard<'_>,
        anchor: usize,
        member: Member,
        target: usize,
    ) -> bool {
        let source = self.table.bucket(member.index);

        if !within_spread(self.table.chain_bounds(anchor, Some(member.index)), target) {
            return false;
        }
        let holder = member.prev.unwrap_or(anchor);
        let (Some(incoming), Some(outgoing)) = (
            link_between(holder, target),
            relink(member.index, source.next(), target),
        ) else {
            return false;
        };
        let (hash, key) = (source.hash(), source.key());
        let Some(data) = source.data() else {
            return false;
        };

        let bucket = self.table.bucket(target);
        if !bucket.try_claim(hash) {
            return false;
        }
        // unreachable until the predecessor is repointed below
        bucket.fill(key, data, outgoing);

        guard.begin_unsafe();
        self.set_link(anchor, member.prev, incoming);
        source.clear();
        guard.end_unsafe();

        self.metrics.record_relocation();
        trace!(key, from = member.index, to = target, "relocated into home cache line");

        true
    }
}
