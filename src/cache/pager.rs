//! Block store: resident blocks plus LRU bookkeeping.
//!
//! The block cache is the single owner of cached items for one entity store.
//! It:
//! - Maps block numbers to blocks, iterable in ascending order
//! - Updates LRU recency on every read hit and every write
//! - Evicts least-recently-used blocks beyond `max_blocks`
//! - Keeps hit/miss/eviction counters for monitoring

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::cache::block::{block_for_offset, blocks_for_total, Block, BlockNum};
use crate::cache::evictor::LruEvictor;
use crate::config::StoreConfig;

/// Block cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of resident blocks.
    pub resident_blocks: usize,
    /// Number of resident items across all blocks.
    pub resident_items: usize,
    /// Resident block limit.
    pub max_blocks: usize,
    /// Items per block.
    pub block_size: usize,
    /// Block reads served from memory.
    pub hits: u64,
    /// Block reads that found nothing.
    pub misses: u64,
    /// Blocks dropped by the LRU policy.
    pub evictions: u64,
    /// Full clears (fingerprint change, explicit reset).
    pub clears: u64,
}

impl CacheStats {
    /// Hits as a fraction of all reads (0.0 - 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            return 0.0;
        }
        self.hits as f64 / reads as f64
    }
}

/// Bounded, LRU-evicting store of blocks.
#[derive(Debug)]
pub struct BlockCache<T> {
    blocks: BTreeMap<BlockNum, Block<T>>,
    evictor: LruEvictor,
    block_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    clears: u64,
}

impl<T: Clone> BlockCache<T> {
    pub fn new(block_size: usize, max_blocks: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            evictor: LruEvictor::new(max_blocks),
            block_size: block_size.max(1),
            hits: 0,
            misses: 0,
            evictions: 0,
            clears: 0,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.block_size, config.max_blocks())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn max_blocks(&self) -> usize {
        self.evictor.max_blocks()
    }

    /// Read a block, counting a hit or miss and refreshing its recency.
    pub fn get(&mut self, num: BlockNum) -> Option<&Block<T>> {
        if self.blocks.contains_key(&num) {
            self.hits += 1;
            self.evictor.touch(num);
            self.blocks.get(&num)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Read a block without touching recency or counters.
    pub fn peek(&self, num: BlockNum) -> Option<&Block<T>> {
        self.blocks.get(&num)
    }

    pub fn contains(&self, num: BlockNum) -> bool {
        self.blocks.contains_key(&num)
    }

    /// Insert or replace a block. Items beyond the block size are dropped.
    ///
    /// Returns the block numbers evicted to make room.
    pub fn put(&mut self, num: BlockNum, mut items: Vec<T>) -> Vec<BlockNum> {
        items.truncate(self.block_size);
        self.blocks.insert(num, Block::new(num, items));
        self.admit(num)
    }

    pub fn remove(&mut self, num: BlockNum) -> Option<Block<T>> {
        self.evictor.forget(num);
        self.blocks.remove(&num)
    }

    /// Remove `num` and every block after it.
    pub fn remove_from(&mut self, num: BlockNum) -> Vec<BlockNum> {
        let removed: Vec<BlockNum> = self.blocks.range(num..).map(|(&n, _)| n).collect();
        for n in &removed {
            self.remove(*n);
        }
        removed
    }

    /// Drop every block. Returns how many were resident.
    pub fn clear(&mut self) -> usize {
        let count = self.blocks.len();
        self.blocks.clear();
        self.evictor.clear();
        self.clears += 1;
        count
    }

    /// Resident blocks in ascending block-number order.
    pub fn all_resident(&self) -> impl Iterator<Item = &Block<T>> {
        self.blocks.values()
    }

    pub fn resident_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether every block needed to hold `total` items is resident.
    pub fn is_complete(&self, total: u64) -> bool {
        (1..=blocks_for_total(total, self.block_size)).all(|n| self.blocks.contains_key(&n))
    }

    /// Append items after the current end of the collection (`total_before`
    /// items), filling the last under-capacity block before opening new ones.
    ///
    /// Returns the block numbers evicted to make room.
    pub fn append(&mut self, items: Vec<T>, total_before: u64) -> Vec<BlockNum> {
        let mut touched = Vec::new();
        let mut offset = total_before;
        for item in items {
            let num = block_for_offset(offset, self.block_size);
            self.blocks
                .entry(num)
                .or_insert_with(|| Block::new(num, Vec::new()))
                .items
                .push(item);
            if touched.last() != Some(&num) {
                touched.push(num);
            }
            offset += 1;
        }

        let mut evicted = Vec::new();
        for num in touched {
            evicted.extend(self.admit(num));
        }
        evicted
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            resident_blocks: self.blocks.len(),
            resident_items: self.blocks.values().map(Block::len).sum(),
            max_blocks: self.max_blocks(),
            block_size: self.block_size,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            clears: self.clears,
        }
    }

    fn admit(&mut self, num: BlockNum) -> Vec<BlockNum> {
        let victims = self.evictor.admit(num);
        for victim in &victims {
            self.blocks.remove(victim);
            self.evictions += 1;
            debug!(block = victim, admitted = num, "Evicted block");
        }
        victims
    }
}
