//! In-flight fetch registry.
//!
//! Concurrent requests for the same block share one backend call. The first
//! requester registers a [`Shared`] future; later requesters clone it. When
//! the fetch resolves, every waiter gets the same response, and exactly one
//! of them (whoever claims it first) writes it into the block cache and
//! removes the registry entry. Waiters that are dropped early do not leave
//! the fetch orphaned: any remaining or future waiter drives and claims it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;

use crate::backend::{BackendError, PageResponse};
use crate::cache::block::BlockNum;

/// Result of one block fetch. Errors are wrapped in an `Arc` so the result
/// is cloneable, which [`Shared`] requires.
pub type FetchResult<T> = Result<Arc<PageResponse<T>>, Arc<BackendError>>;

type SharedFetch<T> = Shared<BoxFuture<'static, FetchResult<T>>>;

/// Identifies a fetch that can be shared.
///
/// Fetches are keyed by block number within one forwarded query and one
/// cache generation; a request issued after an invalidation never joins a
/// fetch started before it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub block: BlockNum,
    pub signature: String,
    pub generation: u64,
}

/// One pending backend call.
pub struct InflightFetch<T> {
    id: u64,
    future: SharedFetch<T>,
    claimed: AtomicBool,
}

impl<T> InflightFetch<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true for exactly one caller, which becomes responsible for
    /// applying the result and cleaning up the registry entry.
    pub fn try_claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }
}

impl<T: Send + Sync + 'static> InflightFetch<T> {
    /// Wait for the shared result.
    pub async fn wait(&self) -> FetchResult<T> {
        self.future.clone().await
    }
}

/// Registry of pending fetches, owned by one store's state.
pub struct InflightRegistry<T> {
    entries: HashMap<FetchKey, Arc<InflightFetch<T>>>,
    next_id: u64,
    coalesced: u64,
}

impl<T> Default for InflightRegistry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 0,
            coalesced: 0,
        }
    }
}

impl<T: Send + Sync + 'static> InflightRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending fetch for `key`, or register a new one built by
    /// `start`. The boolean is true when an existing fetch was joined.
    pub fn join_or_start<F>(&mut self, key: FetchKey, start: F) -> (Arc<InflightFetch<T>>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, FetchResult<T>>,
    {
        if let Some(existing) = self.entries.get(&key) {
            self.coalesced += 1;
            return (Arc::clone(existing), true);
        }

        self.next_id += 1;
        let fetch = Arc::new(InflightFetch {
            id: self.next_id,
            future: start().shared(),
            claimed: AtomicBool::new(false),
        });
        self.entries.insert(key, Arc::clone(&fetch));
        (fetch, false)
    }

    /// Remove the entry for `key` if it still refers to fetch `id`.
    pub fn complete(&mut self, key: &FetchKey, id: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.id == id => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of requests that joined an existing fetch.
    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }
}
