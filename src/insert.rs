//! Insertion engine.
//!
//! Placement order for a new entry, under the home segment's lock:
//!
//! 1. A free bucket in the home bucket's cache-line group (when cache-line
//!    placement is on), linked at the head of the chain.
//! 2. The first free bucket scanning forward from just past the home group,
//!    up to `MAX_PROBE_DISTANCE` past the home bucket or the end of the
//!    table, linked at the tail.
//! 3. The first free bucket scanning backward from just before the home
//!    group, symmetrically, linked at the tail.
//!
//! With cache-line placement off there is no step 1 and the scans start at
//! the home bucket itself instead of skipping its group, so a key whose home
//! bucket is free is stored there.
//!
//! A candidate is only taken if every pair of chain members stays within
//! link range afterwards, and only once it has been claimed by swapping its
//! empty hash sentinel. Writers of other segments scanning overlapping
//! neighbourhoods therefore never take the same bucket.

use tracing::warn;

use crate::bucket::{EMPTY_KEY, MAX_PROBE_DISTANCE, NO_LINK, link_between, relink};
use crate::cache::DeltaCache;
use crate::error::{CacheError, CacheResult};
use crate::handle::Handle;
use crate::table::within_spread;

/// A claimed bucket and the links needed to splice it into a chain.
struct Placement {
    slot: usize,
    /// Link stored in the new entry.
    next: i16,
    /// Link to the new entry, stored in the anchor's head or the chain tail.
    link: i16,
    /// Holder of `link`: `None` for the anchor's head.
    holder: Option<usize>,
}

impl DeltaCache {
    /// Insert `data` for `key` unless the key is already present.
    ///
    /// Returns `Ok(None)` when the entry was added, or `Ok(Some(existing))`
    /// without modifying anything when the key is already stored: the first
    /// writer wins. Fails with [`CacheError::TableFull`] when no free bucket
    /// is reachable from the key's home bucket and with
    /// [`CacheError::ReservedKey`] for `u32::MAX`.
    pub fn put(&self, key: u32, data: Handle) -> CacheResult<Option<Handle>> {
        if key == EMPTY_KEY {
            return Err(CacheError::ReservedKey);
        }

        let home = self.table.home(key);
        let _guard = self.segments[self.segment_index(key)].lock();

        let mut last = None;
        let mut bounds: Option<(usize, usize)> = None;
        for member in self.table.chain(home) {
            let bucket = self.table.bucket(member.index);
            if bucket.matches(key, key) {
                return Ok(bucket.data());
            }
            last = Some(member.index);
            bounds = Some(match bounds {
                None => (member.index, member.index),
                Some((lo, hi)) => (lo.min(member.index), hi.max(member.index)),
            });
        }

        let local = if self.cacheline_placement {
            self.claim_in_group(home, key, bounds)
        } else {
            None
        };

        let placement = match local {
            Some(placement) => placement,
            None => match self.claim_overflow(home, key, last, bounds) {
                Some(placement) => {
                    self.metrics.record_overflow_placement();
                    placement
                }
                None => {
                    self.metrics.record_table_full();
                    warn!(key, home, "no free bucket within range of home bucket");
                    return Err(CacheError::TableFull);
                }
            },
        };

        // the entry is complete before the link that makes it reachable
        self.table
            .bucket(placement.slot)
            .fill(key, data, placement.next);
        self.set_link(home, placement.holder, placement.link);

        Ok(None)
    }

    /// Claim a free bucket in `home`'s cache-line group for a new chain head.
    fn claim_in_group(
        &self,
        home: usize,
        key: u32,
        bounds: Option<(usize, usize)>,
    ) -> Option<Placement> {
        let head = self.table.bucket(home).head();

        for slot in self.table.group_from(home) {
            let bucket = self.table.bucket(slot);
            if !bucket.is_empty() || !within_spread(bounds, slot) {
                continue;
            }
            let (Some(next), Some(link)) = (relink(home, head, slot), link_between(home, slot))
            else {
                continue;
            };
            if bucket.try_claim(key) {
                return Some(Placement {
                    slot,
                    next,
                    link,
                    holder: None,
                });
            }
        }

        None
    }

    /// Claim a free bucket outside the home group for a new chain tail,
    /// scanning forward first and backward second.
    fn claim_overflow(
        &self,
        home: usize,
        key: u32,
        last: Option<usize>,
        bounds: Option<(usize, usize)>,
    ) -> Option<Placement> {
        // without group placement the home group is part of the scan
        let (forward_start, backward_start) = if self.cacheline_placement {
            let group = self.table.group(home);
            (group.end, group.start.checked_sub(1))
        } else {
            (home, home.checked_sub(1))
        };
        let forward_end = (home + MAX_PROBE_DISTANCE).min(self.table.len() - 1);
        let backward_end = home.saturating_sub(MAX_PROBE_DISTANCE);

        let forward = forward_start..=forward_end;
        let backward = backward_start
            .into_iter()
            .flat_map(move |start| (backward_end..=start).rev());

        let tail = last.unwrap_or(home);

        for slot in forward.chain(backward) {
            let bucket = self.table.bucket(slot);
            if !bucket.is_empty() || !within_spread(bounds, slot) {
                continue;
            }
            let Some(link) = link_between(tail, slot) else {
                continue;
            };
            if bucket.try_claim(key) {
                return Some(Placement {
                    slot,
                    next: NO_LINK,
                    link,
                    holder: last,
                });
            }
        }

        None
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::table::Probe;

    fn handle(raw: u64) -> Handle {
        Handle::from_raw(raw).unwrap()
    }

    fn slot_of(cache: &DeltaCache, key: u32) -> usize {
        match cache.table.probe(cache.table.home(key), key) {
            Probe::Found(index) => index,
            other => panic!("key {} not found: {:?}", key, other),
        }
    }

    #[test]
    fn test_put_returns_none_for_new_key() {
        let cache = DeltaCache::new(16, 1, 64, true).unwrap();
        assert_eq!(cache.put(3, handle(30)), Ok(None));
        assert_eq!(cache.get(3), Some(handle(30)));
    }

    #[test]
    fn test_first_writer_wins() {
        let cache = DeltaCache::new(16, 1, 64, true).unwrap();
        assert_eq!(cache.put(3, handle(1)), Ok(None));
        assert_eq!(cache.put(3, handle(2)), Ok(Some(handle(1))));
        assert_eq!(cache.get(3), Some(handle(1)));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_cacheline_placement_links_at_head() {
        let cache = DeltaCache::new(16, 1, 64, true).unwrap();
        cache.put(1, handle(1)).unwrap();
        cache.put(17, handle(2)).unwrap();

        // home group of bucket 1 is [0, 1]
        assert_eq!(slot_of(&cache, 1), 1);
        assert_eq!(slot_of(&cache, 17), 0);

        // newest entry is checked first
        let order: Vec<_> = cache.table.chain(1).map(|m| m.index).collect();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(cache.metrics().snapshot().overflow_placements, 0);
    }

    #[test]
    fn test_overflow_links_at_tail() {
        let cache = DeltaCache::new(16, 1, 64, true).unwrap();
        cache.put(1, handle(1)).unwrap();
        cache.put(17, handle(2)).unwrap();
        cache.put(33, handle(3)).unwrap();

        // group full, first free bucket past the group
        assert_eq!(slot_of(&cache, 33), 2);
        let order: Vec<_> = cache.table.chain(1).map(|m| m.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(cache.metrics().snapshot().overflow_placements, 1);
        let locality = cache.cacheline_locality().unwrap();
        assert!((locality - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_forward_scan_skips_occupied() {
        let cache = DeltaCache::new(16, 1, 64, true).unwrap();
        cache.put(2, handle(2)).unwrap();
        cache.put(3, handle(3)).unwrap();
        cache.put(1, handle(1)).unwrap();
        cache.put(17, handle(17)).unwrap();
        cache.put(33, handle(33)).unwrap();

        assert_eq!(slot_of(&cache, 33), 4);
        assert!(cache.contains(2));
        assert!(cache.contains(3));
    }

    #[test]
    fn test_forward_scan_reaches_overflow_region() {
        let cache = DeltaCache::builder()
            .capacity(16)
            .overflow_span(4)
            .build()
            .unwrap();

        // home 15, group [14, 15]
        for (i, key) in [15u32, 31, 47, 63].into_iter().enumerate() {
            cache.put(key, handle(i as u64 + 1)).unwrap();
        }

        assert_eq!(slot_of(&cache, 47), 16);
        assert_eq!(slot_of(&cache, 63), 17);
        assert!(!cache.table.is_home(17));
    }

    #[test]
    fn test_backward_scan() {
        let cache = DeltaCache::builder()
            .capacity(16)
            .overflow_span(0)
            .build()
            .unwrap();

        // 17 buckets; home 15 group is [14, 15], forward only reaches 16
        for (i, key) in [15u32, 31, 47, 63, 79].into_iter().enumerate() {
            cache.put(key, handle(i as u64 + 1)).unwrap();
        }

        assert_eq!(slot_of(&cache, 47), 16);
        assert_eq!(slot_of(&cache, 63), 13);
        assert_eq!(slot_of(&cache, 79), 12);

        let order: Vec<_> = cache.table.chain(15).map(|m| m.index).collect();
        assert_eq!(order, vec![14, 15, 16, 13, 12]);
    }

    #[test]
    fn test_without_cacheline_placement() {
        let cache = DeltaCache::new(16, 1, 64, false).unwrap();
        cache.put(1, handle(1)).unwrap();
        cache.put(17, handle(2)).unwrap();
        cache.put(33, handle(3)).unwrap();

        // forward from the home bucket itself, always appended
        assert_eq!(slot_of(&cache, 1), 1);
        assert_eq!(slot_of(&cache, 17), 2);
        assert_eq!(slot_of(&cache, 33), 3);

        let order: Vec<_> = cache.table.chain(1).map(|m| m.index).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(cache.metrics().snapshot().overflow_placements, 3);
    }

    #[test]
    fn test_table_full_is_recoverable() {
        let cache = DeltaCache::builder()
            .capacity(4)
            .overflow_span(0)
            .build()
            .unwrap();

        // five buckets in total, all reachable from home 0
        for key in [0u32, 4, 8, 12, 16] {
            assert_eq!(cache.put(key, handle(key as u64 + 1)), Ok(None));
        }

        assert_eq!(cache.put(20, handle(99)), Err(CacheError::TableFull));
        assert_eq!(cache.metrics().snapshot().table_full, 1);

        // state is untouched and a removal makes room again
        assert_eq!(cache.size(), 5);
        assert!(!cache.contains(20));
        assert_eq!(cache.remove(8), Some(handle(9)));
        assert_eq!(cache.put(20, handle(99)), Ok(None));
        assert_eq!(cache.get(20), Some(handle(99)));
    }

    const FAR_HOME: usize = 1 << 15;

    /// 65536 home buckets and no overflow region, so both scan windows of
    /// `FAR_HOME` fit inside the table.
    fn large_cache() -> DeltaCache {
        DeltaCache::builder()
            .capacity(1 << 16)
            .overflow_span(0)
            .build()
            .unwrap()
    }

    /// Claim every bucket except `free` without linking it anywhere.
    fn occupy_all_except(cache: &DeltaCache, free: &[usize]) {
        for index in 0..cache.table.len() {
            if !free.contains(&index) {
                assert!(cache.table.bucket(index).try_claim(0));
            }
        }
    }

    #[test]
    fn test_forward_scan_window() {
        let key = FAR_HOME as u32;
        for (free, expected) in [
            (FAR_HOME + MAX_PROBE_DISTANCE, Ok(None)),
            (FAR_HOME + MAX_PROBE_DISTANCE + 1, Err(CacheError::TableFull)),
        ] {
            let cache = large_cache();
            occupy_all_except(&cache, &[free]);

            assert_eq!(cache.put(key, handle(1)), expected, "free bucket {free}");
            if expected.is_ok() {
                assert_eq!(slot_of(&cache, key), free);
            }
        }
    }

    #[test]
    fn test_backward_scan_window() {
        let key = FAR_HOME as u32;
        for (free, expected) in [
            (FAR_HOME - MAX_PROBE_DISTANCE, Ok(None)),
            (FAR_HOME - MAX_PROBE_DISTANCE - 1, Err(CacheError::TableFull)),
        ] {
            let cache = large_cache();
            occupy_all_except(&cache, &[free]);

            assert_eq!(cache.put(key, handle(1)), expected, "free bucket {free}");
            if expected.is_ok() {
                assert_eq!(slot_of(&cache, key), free);
            }
        }
    }

    #[test]
    fn test_placement_keeps_chain_within_link_range() {
        let cache = large_cache();
        let first = FAR_HOME as u32;
        let second = first + (1 << 16);
        let third = first + (2 << 16);
        let low = FAR_HOME - MAX_PROBE_DISTANCE;

        occupy_all_except(&cache, &[FAR_HOME, low]);
        cache.put(first, handle(1)).unwrap();
        cache.put(second, handle(2)).unwrap();
        assert_eq!(slot_of(&cache, first), FAR_HOME);
        assert_eq!(slot_of(&cache, second), low);

        // the chain now spans MAX_PROBE_DISTANCE buckets; the bucket just past
        // the home group is close to home but too far from `low`
        let near = FAR_HOME + 2;
        cache.table.bucket(near).clear();
        cache.table.bucket(low + 1).clear();

        cache.put(third, handle(3)).unwrap();
        assert_eq!(slot_of(&cache, third), low + 1);
        assert!(cache.table.bucket(near).is_empty());
        let order: Vec<_> = cache.table.chain(FAR_HOME).map(|m| m.index).collect();
        assert_eq!(order, vec![FAR_HOME, low, low + 1]);

        // splicing out the middle member links home straight to `low + 1`
        assert_eq!(cache.remove(second), Some(handle(2)));
        let order: Vec<_> = cache.table.chain(FAR_HOME).map(|m| m.index).collect();
        assert_eq!(order, vec![FAR_HOME, low + 1]);
        assert_eq!(cache.get(first), Some(handle(1)));
        assert_eq!(cache.get(third), Some(handle(3)));
    }

    #[test]
    fn test_insert_does_not_move_version() {
        let cache = DeltaCache::new(16, 1, 64, true).unwrap();
        for key in 0..20u32 {
            cache.put(key, handle(key as u64 + 1)).unwrap();
        }
        assert_eq!(cache.segments[0].version(), 0);
    }

    #[test]
    fn test_fill_whole_table() {
        let cache = DeltaCache::builder()
            .capacity(256)
            .threads(4)
            .overflow_span(64)
            .build()
            .unwrap();

        let total = cache.capacity() + cache.overflow_span() + 1;
        for key in 0..total as u32 {
            assert_eq!(cache.put(key, handle(key as u64 + 1)), Ok(None));
        }
        assert_eq!(cache.size(), total);
        assert_eq!(
            cache.put(total as u32, handle(1)),
            Err(CacheError::TableFull)
        );

        for key in 0..total as u32 {
            assert_eq!(cache.get(key), Some(handle(key as u64 + 1)));
        }
    }
}
