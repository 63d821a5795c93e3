//! Eviction policy: bounds the number of resident blocks.
//!
//! Least-recently-used wins. Recency is a logical clock bumped on every
//! touch, so ordering is exact and independent of wall time. Among equally
//! old candidates the lowest block number goes first.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::cache::block::BlockNum;

/// An eviction candidate with its last-use tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionCandidate {
    pub block: BlockNum,
    pub last_used: u64,
}

// Greater = evicted first: older tick, then lower block number.
impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .last_used
            .cmp(&self.last_used)
            .then_with(|| other.block.cmp(&self.block))
    }
}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// LRU bookkeeping for resident blocks.
#[derive(Debug)]
pub struct LruEvictor {
    max_blocks: usize,
    clock: u64,
    recency: HashMap<BlockNum, u64>,
}

impl LruEvictor {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            max_blocks: max_blocks.max(1),
            clock: 0,
            recency: HashMap::new(),
        }
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn len(&self) -> usize {
        self.recency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recency.is_empty()
    }

    pub fn contains(&self, block: BlockNum) -> bool {
        self.recency.contains_key(&block)
    }

    /// Mark a tracked block as most recently used. Returns false if untracked.
    pub fn touch(&mut self, block: BlockNum) -> bool {
        self.clock += 1;
        match self.recency.get_mut(&block) {
            Some(tick) => {
                *tick = self.clock;
                true
            }
            None => false,
        }
    }

    /// Track `block` as most recently used and return the blocks that must
    /// be dropped to stay within `max_blocks`.
    pub fn admit(&mut self, block: BlockNum) -> Vec<BlockNum> {
        self.clock += 1;
        self.recency.insert(block, self.clock);

        let excess = self.recency.len().saturating_sub(self.max_blocks);
        if excess == 0 {
            return Vec::new();
        }

        let victims = self.select_victims(excess, &[block]);
        for victim in &victims {
            self.recency.remove(&victim.block);
        }
        victims.into_iter().map(|v| v.block).collect()
    }

    pub fn forget(&mut self, block: BlockNum) {
        self.recency.remove(&block);
    }

    pub fn clear(&mut self) {
        self.recency.clear();
    }

    /// Select up to `count` blocks to evict, least recently used first.
    /// Blocks in `protected` are never selected.
    pub fn select_victims(&self, count: usize, protected: &[BlockNum]) -> Vec<EvictionCandidate> {
        let mut heap: BinaryHeap<EvictionCandidate> = self
            .recency
            .iter()
            .filter(|(block, _)| !protected.contains(block))
            .map(|(&block, &last_used)| EvictionCandidate { block, last_used })
            .collect();

        let mut victims = Vec::with_capacity(count);
        while victims.len() < count {
            match heap.pop() {
                Some(candidate) => victims.push(candidate),
                None => break,
            }
        }
        victims
    }

    /// Resident blocks from least to most recently used.
    pub fn lru_order(&self) -> Vec<BlockNum> {
        let mut entries: Vec<_> = self.recency.iter().map(|(&b, &t)| (t, b)).collect();
        entries.sort_unstable();
        entries.into_iter().map(|(_, b)| b).collect()
    }
}
