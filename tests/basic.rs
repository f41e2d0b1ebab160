//! Single-threaded behaviour of the public API.

#![cfg(not(feature = "loom"))]

use deltacache::{CacheConfig, CacheError, DeltaCache, EMPTY_KEY, Handle};
use std::ptr::NonNull;

fn handle(raw: u64) -> Handle {
    Handle::from_raw(raw).expect("non-zero handle")
}

// =============================================================================
// Insert / lookup / remove
// =============================================================================

#[test]
fn test_colliding_keys_scenario() {
    let cache = DeltaCache::new(16, 1, 64, true).expect("valid cache");
    let (a, b, c) = (handle(0xA), handle(0xB), handle(0xC));

    cache.put(1, a).expect("put 1");
    cache.put(17, b).expect("put 17");
    cache.put(33, c).expect("put 33");

    assert!(cache.contains(1) && cache.contains(17) && cache.contains(33));
    assert_eq!(cache.size(), 3);

    assert_eq!(cache.remove(17), Some(b));
    assert!(!cache.contains(17));
    assert!(cache.contains(1) && cache.contains(33));
    assert_eq!(cache.size(), 2);

    // the freed slot was reused for the overflowed entry
    assert_eq!(cache.cacheline_locality(), Some(100.0));
    assert_eq!(cache.metrics().snapshot().relocations, 1);
}

#[test]
fn test_duplicate_put_is_idempotent() {
    let cache = DeltaCache::builder().capacity(64).build().expect("valid cache");

    assert_eq!(cache.put(7, handle(1)), Ok(None));
    let size = cache.size();

    for attempt in 2..10 {
        assert_eq!(cache.put(7, handle(attempt)), Ok(Some(handle(1))));
    }

    assert_eq!(cache.size(), size);
    assert_eq!(cache.get(7), Some(handle(1)));
}

#[test]
fn test_round_trip_many_keys() {
    for placement in [true, false] {
        let cache = DeltaCache::builder()
            .capacity(1024)
            .threads(8)
            .cacheline_placement(placement)
            .build()
            .expect("valid cache");

        // three keys per home bucket in the lower half of the table
        let keys: Vec<u32> = (0..512u32)
            .flat_map(|home| [home, home + 1024, home + 2048])
            .collect();

        for &key in &keys {
            assert_eq!(cache.put(key, handle(key as u64 + 1)), Ok(None));
        }
        assert_eq!(cache.size(), keys.len());

        for &key in &keys {
            assert_eq!(cache.get(key), Some(handle(key as u64 + 1)), "key {key}");
        }

        // remove every other key, the rest stays reachable
        for &key in keys.iter().step_by(2) {
            assert_eq!(cache.remove(key), Some(handle(key as u64 + 1)));
        }
        for (i, &key) in keys.iter().enumerate() {
            assert_eq!(cache.contains(key), i % 2 == 1, "key {key}");
        }
        assert_eq!(cache.size(), keys.len() / 2);
    }
}

#[test]
fn test_absence_is_stable() {
    let cache = DeltaCache::new(64, 1, 64, true).expect("valid cache");
    for key in 0..32u32 {
        cache.put(key, handle(key as u64 + 1)).expect("put");
    }

    for _ in 0..3 {
        assert!(!cache.contains(100));
        assert_eq!(cache.get(100), None);
        assert_eq!(cache.remove(100), None);
    }
    assert_eq!(cache.size(), 32);
}

#[test]
fn test_remove_then_reinsert() {
    let cache = DeltaCache::new(16, 1, 64, true).expect("valid cache");
    cache.put(3, handle(1)).expect("put");
    assert_eq!(cache.remove(3), Some(handle(1)));
    assert_eq!(cache.put(3, handle(2)), Ok(None));
    assert_eq!(cache.get(3), Some(handle(2)));
}

// =============================================================================
// Capacity and errors
// =============================================================================

#[test]
fn test_table_full_then_recover() {
    let cache = DeltaCache::builder()
        .capacity(8)
        .overflow_span(0)
        .build()
        .expect("valid cache");

    // 9 buckets in total
    for key in 0..9u32 {
        assert_eq!(cache.put(key, handle(key as u64 + 1)), Ok(None));
    }
    assert_eq!(cache.put(100, handle(1)), Err(CacheError::TableFull));
    assert_eq!(cache.metrics().snapshot().table_full, 1);

    // the failed insert changed nothing
    for key in 0..9u32 {
        assert_eq!(cache.get(key), Some(handle(key as u64 + 1)));
    }

    cache.remove(4).expect("present");
    assert_eq!(cache.put(100, handle(1)), Ok(None));
    assert_eq!(cache.get(100), Some(handle(1)));
}

#[test]
fn test_reserved_key() {
    let cache = DeltaCache::new(16, 1, 64, true).expect("valid cache");
    assert_eq!(cache.put(EMPTY_KEY, handle(1)), Err(CacheError::ReservedKey));
    assert!(!cache.contains(EMPTY_KEY));
    assert_eq!(cache.remove(EMPTY_KEY), None);

    // keys sharing its home bucket still work
    let neighbour = EMPTY_KEY - 16;
    assert_eq!(cache.put(neighbour, handle(2)), Ok(None));
    assert_eq!(cache.get(neighbour), Some(handle(2)));
}

#[test]
fn test_invalid_configuration() {
    assert_eq!(
        DeltaCache::new(0, 1, 64, true).err(),
        Some(CacheError::InvalidCapacity)
    );
    assert_eq!(
        DeltaCache::new(16, 1, 60, true).err(),
        Some(CacheError::InvalidLineSize)
    );
    assert_eq!(
        DeltaCache::builder().overflow_span(100_000).build().err(),
        Some(CacheError::InvalidOverflowSpan)
    );
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_from_toml_config() {
    let config: CacheConfig = toml::from_str(
        r#"
        capacity = 3000
        threads = 5
        line_size = 128
        overflow_span = 64
        "#,
    )
    .expect("valid toml");

    let cache = DeltaCache::from_config(&config).expect("valid cache");
    assert_eq!(cache.capacity(), 4096);
    assert_eq!(cache.num_segments(), 8);
    assert_eq!(cache.line_span(), 4);
    assert_eq!(cache.overflow_span(), 64);
    assert!(cache.is_cacheline_placement());
}

#[test]
fn test_pointer_handles() {
    let records: Vec<Box<u64>> = (0..4).map(Box::new).collect();
    let cache = DeltaCache::new(16, 1, 64, true).expect("valid cache");

    for (key, record) in records.iter().enumerate() {
        let ptr = NonNull::from(record.as_ref());
        cache.put(key as u32, Handle::from_ptr(ptr)).expect("put");
    }

    for (key, record) in records.iter().enumerate() {
        let found = cache.get(key as u32).expect("present");
        let ptr: *mut u64 = found.as_ptr();
        // SAFETY: the boxes outlive the cache lookups
        assert_eq!(unsafe { *ptr }, **record);
    }
}
