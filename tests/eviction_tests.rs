//! Integration tests for the eviction policy.

use paged_entity_cache::cache::evictor::LruEvictor;
use paged_entity_cache::cache::pager::BlockCache;
use paged_entity_cache::config::StoreConfig;

fn block(num: u64, size: usize) -> Vec<u64> {
    (0..size as u64).map(|i| (num - 1) * size as u64 + i).collect()
}

#[test]
fn test_overflow_keeps_exactly_max_blocks() {
    let max_blocks = 5;
    for k in 1..=4u64 {
        let mut cache = BlockCache::new(10, max_blocks);
        for num in 1..=(max_blocks as u64 + k) {
            cache.put(num, block(num, 10));
        }

        assert_eq!(cache.resident_count(), max_blocks);
        // The k oldest blocks are gone, the rest are resident.
        for num in 1..=k {
            assert!(!cache.contains(num), "block {num} should be evicted (k = {k})");
        }
        for num in (k + 1)..=(max_blocks as u64 + k) {
            assert!(cache.contains(num), "block {num} should be resident (k = {k})");
        }
        assert_eq!(cache.stats().evictions, k);
    }
}

#[test]
fn test_reads_protect_blocks_from_eviction() {
    let mut cache = BlockCache::new(10, 3);
    cache.put(1, block(1, 10));
    cache.put(2, block(2, 10));
    cache.put(3, block(3, 10));

    // Reading block 1 makes block 2 the least recently used.
    assert!(cache.get(1).is_some());
    cache.put(4, block(4, 10));

    assert!(cache.contains(1));
    assert!(!cache.contains(2));
    assert!(cache.contains(3));
    assert!(cache.contains(4));
}

#[test]
fn test_capacity_derived_from_config() {
    let config = StoreConfig::default()
        .with_block_size(100)
        .with_max_cacheable_total(500);
    let mut cache: BlockCache<u64> = BlockCache::from_config(&config);
    assert_eq!(cache.max_blocks(), 5);

    for num in 1..=8 {
        cache.put(num, block(num, 100));
    }
    assert_eq!(cache.resident_count(), 5);
    let resident: Vec<u64> = cache.all_resident().map(|b| b.num).collect();
    assert_eq!(resident, vec![4, 5, 6, 7, 8]);
}

#[test]
fn test_lru_order_tracks_touches() {
    let mut lru = LruEvictor::new(10);
    for num in 1..=4 {
        lru.admit(num);
    }
    lru.touch(2);
    lru.touch(1);
    assert_eq!(lru.lru_order(), vec![3, 4, 2, 1]);

    let victims: Vec<u64> = lru.select_victims(2, &[]).into_iter().map(|c| c.block).collect();
    assert_eq!(victims, vec![3, 4]);
}

#[test]
fn test_eviction_empty_returns_nothing() {
    let lru = LruEvictor::new(3);
    assert!(lru.select_victims(5, &[]).is_empty());
}
