//! Block types and offset arithmetic.
//!
//! A block holds a fixed number of consecutive items of the server's total
//! ordering. Blocks are the unit of fetching, caching and eviction.

use std::ops::{Range, RangeInclusive};

/// 1-based block number. Block `n` covers offsets `[(n-1)*size, n*size)`.
pub type BlockNum = u64;

/// A cached slice of the server ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Block<T> {
    /// Block number.
    pub num: BlockNum,

    /// Items in server order. Shorter than the block size only for the
    /// final block of the collection.
    pub items: Vec<T>,
}

impl<T> Block<T> {
    pub fn new(num: BlockNum, items: Vec<T>) -> Self {
        Self { num, items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Offset range covered by the items actually present.
    pub fn offset_range(&self, block_size: usize) -> Range<u64> {
        let start = block_start(self.num, block_size);
        start..start + self.items.len() as u64
    }
}

/// First offset of block `num`.
pub fn block_start(num: BlockNum, block_size: usize) -> u64 {
    num.saturating_sub(1).saturating_mul(block_size as u64)
}

/// Block containing `offset`.
pub fn block_for_offset(offset: u64, block_size: usize) -> BlockNum {
    offset / block_size.max(1) as u64 + 1
}

/// Block holding the first item of `page`.
///
/// `targetBlock = floor((page-1) * pageSize / blockSize) + 1`
pub fn block_for_page(page: usize, page_size: usize, block_size: usize) -> BlockNum {
    block_for_offset(page_offset(page, page_size), block_size)
}

/// First offset of a (1-based) page. Saturates at `u64::MAX`.
pub fn page_offset(page: usize, page_size: usize) -> u64 {
    (page.saturating_sub(1) as u64).saturating_mul(page_size as u64)
}

/// Number of blocks needed to hold `total` items.
pub fn blocks_for_total(total: u64, block_size: usize) -> u64 {
    total.div_ceil(block_size.max(1) as u64)
}

/// Blocks overlapping the offset range `[start, end)`. Empty when the range is.
pub fn blocks_in_range(start: u64, end: u64, block_size: usize) -> RangeInclusive<BlockNum> {
    if end <= start {
        return RangeInclusive::new(1, 0);
    }
    block_for_offset(start, block_size)..=block_for_offset(end - 1, block_size)
}

/// Copy the items at offsets `[start, end)` out of consecutive blocks.
///
/// Blocks are read in ascending order and concatenated. Reading stops at the
/// first missing block or at a short (final) block, so the result is always a
/// contiguous prefix of the requested range.
pub fn read_range<'a, T, F>(lookup: F, block_size: usize, start: u64, end: u64) -> Vec<T>
where
    T: Clone + 'a,
    F: Fn(BlockNum) -> Option<&'a [T]>,
{
    let mut out = Vec::new();
    for num in blocks_in_range(start, end, block_size) {
        let Some(items) = lookup(num) else {
            break;
        };
        let base = block_start(num, block_size);
        let lo = start.saturating_sub(base) as usize;
        let hi = ((end - base) as usize).min(items.len());
        if lo < hi {
            out.extend_from_slice(&items[lo..hi]);
        }
        if items.len() < block_size {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_page_to_block_mapping() {
        assert_eq!(block_for_page(1, 20, 100), 1);
        assert_eq!(block_for_page(5, 20, 100), 1);
        assert_eq!(block_for_page(6, 20, 100), 2);
        assert_eq!(block_for_page(10, 20, 100), 2);
        assert_eq!(block_for_page(3, 50, 100), 2);
    }

    #[test]
    fn test_blocks_for_total() {
        assert_eq!(blocks_for_total(0, 100), 0);
        assert_eq!(blocks_for_total(250, 100), 3);
        assert_eq!(blocks_for_total(300, 100), 3);
    }

    #[test]
    fn test_blocks_in_range_straddles() {
        assert_eq!(blocks_in_range(90, 130, 100), 1..=2);
        assert_eq!(blocks_in_range(100, 200, 100), 2..=2);
        assert!(blocks_in_range(50, 50, 100).is_empty());
    }

    #[test]
    fn test_read_range_across_block_boundary() {
        let mut blocks: HashMap<BlockNum, Vec<u32>> = HashMap::new();
        blocks.insert(1, (0..10).collect());
        blocks.insert(2, (10..20).collect());
        blocks.insert(3, (20..25).collect());

        let out = read_range(|n| blocks.get(&n).map(Vec::as_slice), 10, 7, 13);
        assert_eq!(out, vec![7, 8, 9, 10, 11, 12]);

        // Past the short final block.
        let out = read_range(|n| blocks.get(&n).map(Vec::as_slice), 10, 22, 40);
        assert_eq!(out, vec![22, 23, 24]);
    }

    #[test]
    fn test_read_range_stops_at_gap() {
        let mut blocks: HashMap<BlockNum, Vec<u32>> = HashMap::new();
        blocks.insert(1, (0..10).collect());
        blocks.insert(3, (20..30).collect());

        let out = read_range(|n| blocks.get(&n).map(Vec::as_slice), 10, 5, 25);
        assert_eq!(out, vec![5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_block_offset_range() {
        let block = Block::new(3, vec!['a'; 4]);
        assert_eq!(block.offset_range(10), 20..24);
    }
}
