//! Block cache management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`block`]: Block type and page/offset/block arithmetic
//! - [`pager`]: Block store that owns resident blocks and statistics
//! - [`evictor`]: LRU eviction policy bounding resident blocks
//! - [`fingerprint`]: Staleness detection against organization, table versions and query
//! - [`inflight`]: Coalescing of concurrent fetches for the same block

pub mod block;
pub mod evictor;
pub mod fingerprint;
pub mod inflight;
pub mod pager;

pub use block::{Block, BlockNum};
pub use fingerprint::{Fingerprint, FingerprintCheck, FingerprintTracker, StaleReason};
pub use pager::{BlockCache, CacheStats};
