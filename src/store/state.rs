//! Mutable store state and the synchronous steps run under the store lock.
//!
//! Every method here runs inside one short critical section. Network calls
//! happen between these steps, never inside them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{MutationPage, PageResponse};
use crate::cache::block::{
    block_for_offset, block_start, blocks_for_total, blocks_in_range, read_range, BlockNum,
};
use crate::cache::inflight::InflightRegistry;
use crate::cache::{BlockCache, Fingerprint, FingerprintTracker, StaleReason};
use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::query::{QueryContext, QueryEngine};
use crate::store::events::Notifier;
use crate::view::{PaginationView, ViewRequest};

/// How views are served, decided from the unfiltered collection total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// No total observed yet.
    Unknown,
    /// The whole collection fits in the cache; filter and sort run locally.
    FullyCached,
    /// Only windows are cached; filter and sort are forwarded to the backend.
    Partial,
}

/// Blocks fetched during one view load.
///
/// Lets a load render blocks it fetched but could not cache (eviction,
/// consistency violation, lost claim) without fetching them again. Tied to
/// one forwarded signature and one cache generation.
pub(crate) struct Transient<T> {
    signature: String,
    generation: u64,
    blocks: HashMap<BlockNum, Arc<PageResponse<T>>>,
    total: Option<u64>,
}

impl<T> Default for Transient<T> {
    fn default() -> Self {
        Self {
            signature: String::new(),
            generation: 0,
            blocks: HashMap::new(),
            total: None,
        }
    }
}

impl<T> Transient<T> {
    pub(crate) fn align(&mut self, signature: &str, generation: u64) {
        if self.signature != signature || self.generation != generation {
            self.blocks.clear();
            self.total = None;
            self.signature = signature.to_string();
            self.generation = generation;
        }
    }

    pub(crate) fn insert(&mut self, block: BlockNum, response: Arc<PageResponse<T>>) {
        self.total = Some(response.total);
        self.blocks.insert(block, response);
    }

    fn contains(&self, block: BlockNum) -> bool {
        self.blocks.contains_key(&block)
    }

    fn items(&self, block: BlockNum, block_size: usize) -> Option<&[T]> {
        self.blocks
            .get(&block)
            .map(|r| &r.items[..r.items.len().min(block_size)])
    }
}

/// Blocks a view load still has to fetch.
#[derive(Debug, Clone)]
pub(crate) struct FetchPlan {
    pub blocks: Vec<BlockNum>,
    pub query: QueryContext,
    pub signature: String,
    pub generation: u64,
}

pub(crate) enum Step<T> {
    Ready(PaginationView<T>),
    Fetch(FetchPlan),
}

pub(crate) struct StoreState<T> {
    pub cache: BlockCache<T>,
    pub tracker: FingerprintTracker,
    pub inflight: InflightRegistry<T>,

    /// The most recently requested view.
    pub request: ViewRequest,

    /// The most recently built view for `request`.
    pub view: PaginationView<T>,

    /// Unfiltered total, from empty-query responses and mutations.
    pub collection_total: Option<u64>,

    /// Total for one forwarded query signature.
    pub query_total: Option<(String, u64)>,

    /// Signature the resident blocks were fetched with.
    pub cache_signature: Option<String>,

    /// Bumped by every invalidation. Responses to requests issued under an
    /// older generation are never cached.
    pub generation: u64,

    empty_signature: String,
}

fn lookup<'a, T>(
    cache: &'a BlockCache<T>,
    transient: &'a Transient<T>,
) -> impl Fn(BlockNum) -> Option<&'a [T]> + 'a
where
    T: Clone,
{
    let block_size = cache.block_size();
    move |num| {
        cache
            .peek(num)
            .map(|b| b.items.as_slice())
            .or_else(|| transient.items(num, block_size))
    }
}

impl<T: Entity> StoreState<T> {
    pub(crate) fn new(config: &StoreConfig) -> Self {
        let request = ViewRequest::default();
        Self {
            cache: BlockCache::from_config(config),
            tracker: FingerprintTracker::new(),
            inflight: InflightRegistry::new(),
            view: PaginationView::empty(request.page, request.page_size),
            request,
            collection_total: None,
            query_total: None,
            cache_signature: None,
            generation: 0,
            empty_signature: QueryContext::default().signature(),
        }
    }

    pub(crate) fn mode(&self) -> CacheMode {
        match self.collection_total {
            None => CacheMode::Unknown,
            Some(total) => {
                if blocks_for_total(total, self.cache.block_size()) <= self.cache.max_blocks() as u64 {
                    CacheMode::FullyCached
                } else {
                    CacheMode::Partial
                }
            }
        }
    }

    /// The query sent to the backend: nothing until the collection is known
    /// to be too large to cache, the full query after that.
    pub(crate) fn forwarded(&self, request: &ViewRequest) -> QueryContext {
        match self.mode() {
            CacheMode::Partial => request.query.clone(),
            CacheMode::Unknown | CacheMode::FullyCached => QueryContext::default(),
        }
    }

    fn known_query_total(&self, signature: &str) -> Option<u64> {
        match &self.query_total {
            Some((sig, total)) if sig == signature => Some(*total),
            _ => None,
        }
    }

    /// Decide whether `request` can be rendered now or which blocks must be
    /// fetched first.
    pub(crate) fn plan(
        &mut self,
        request: &ViewRequest,
        engine: &QueryEngine,
        transient: &mut Transient<T>,
        notifier: &Notifier,
    ) -> Step<T> {
        let query = self.forwarded(request);
        let signature = query.signature();

        if self.cache_signature.as_deref().is_some_and(|s| s != signature) {
            let cleared = self.cache.clear();
            self.cache_signature = None;
            self.tracker.reset();
            self.generation += 1;
            debug!(store = notifier.store(), cleared, "Query changed, cleared cache");
            notifier.invalidated(StaleReason::QueryChanged, cleared);
            notifier.resident(0, 0);
        }
        transient.align(&signature, self.generation);

        let (mut hits, mut misses) = (0, 0);
        let mut missing = Vec::new();
        for num in self.needed_blocks(request, engine, &signature) {
            if self.cache.get(num).is_some() {
                hits += 1;
            } else {
                misses += 1;
                if !transient.contains(num) {
                    missing.push(num);
                }
            }
        }
        notifier.lookups(hits, misses);

        if missing.is_empty() {
            Step::Ready(self.build(request, engine, &signature, transient))
        } else {
            Step::Fetch(FetchPlan {
                blocks: missing,
                query,
                signature,
                generation: self.generation,
            })
        }
    }

    fn needed_blocks(
        &self,
        request: &ViewRequest,
        engine: &QueryEngine,
        signature: &str,
    ) -> Vec<BlockNum> {
        let block_size = self.cache.block_size();
        let target = block_for_offset(request.offset(), block_size);

        match self.mode() {
            CacheMode::Unknown => vec![target],
            CacheMode::FullyCached => {
                let total = self.collection_total.unwrap_or(0);
                let last = if engine.has_local_work(&request.query) {
                    blocks_for_total(total, block_size)
                } else if request.offset() >= total {
                    0
                } else {
                    blocks_for_total(request.end().min(total), block_size)
                };
                (1..=last).collect()
            }
            CacheMode::Partial => match self.known_query_total(signature) {
                None => vec![target],
                Some(total) => {
                    blocks_in_range(request.offset(), request.end().min(total), block_size).collect()
                }
            },
        }
    }

    /// Render `request` from resident blocks plus this load's transient ones.
    pub(crate) fn build(
        &self,
        request: &ViewRequest,
        engine: &QueryEngine,
        signature: &str,
        transient: &Transient<T>,
    ) -> PaginationView<T> {
        let block_size = self.cache.block_size();
        let read = lookup(&self.cache, transient);

        let total = match self.mode() {
            CacheMode::FullyCached => {
                let total = self.collection_total.unwrap_or(0);
                if engine.has_local_work(&request.query) {
                    let all = read_range(read, block_size, 0, total);
                    let matching = engine.apply(all, &request.query);
                    return PaginationView::from_items(&matching, request.page, request.page_size);
                }
                total
            }
            CacheMode::Partial => self
                .known_query_total(signature)
                .or(transient.total)
                .unwrap_or(0),
            CacheMode::Unknown => transient.total.unwrap_or(0),
        };

        let end = request.end().min(total);
        let items = if request.offset() < end {
            read_range(read, block_size, request.offset(), end)
        } else {
            Vec::new()
        };
        PaginationView::from_window(items, total, request.page, request.page_size)
    }

    /// Take in a fetched block.
    ///
    /// Every waiter records the totals; only the `winner` (the one waiter
    /// that claimed the shared fetch) runs the fingerprint protocol and
    /// writes the block into the cache. Returns false when the response
    /// belongs to an earlier generation and must not be rendered.
    pub(crate) fn absorb(
        &mut self,
        block: BlockNum,
        response: &PageResponse<T>,
        signature: &str,
        generation: u64,
        winner: bool,
        notifier: &Notifier,
    ) -> bool {
        if generation != self.generation {
            debug!(
                store = notifier.store(),
                block,
                generation,
                current = self.generation,
                "Discarded response from an earlier generation"
            );
            return false;
        }

        let fingerprint = Fingerprint::new(
            response.organization_id,
            &response.table_versions,
            signature,
        );
        if winner {
            self.apply_fetch(block, response, fingerprint, notifier);
        }

        self.query_total = Some((signature.to_string(), response.total));
        if signature == self.empty_signature {
            self.collection_total = Some(response.total);
        }
        true
    }

    fn apply_fetch(
        &mut self,
        block: BlockNum,
        response: &PageResponse<T>,
        fingerprint: Fingerprint,
        notifier: &Notifier,
    ) {
        let check = self.tracker.check(&fingerprint);
        if let (true, Some(reason)) = (check.stale, check.reason) {
            let cleared = self.cache.clear();
            self.cache_signature = None;
            self.generation += 1;
            warn!(
                store = notifier.store(),
                reason = reason.label(),
                changed = ?reason.changed_tables(),
                cleared,
                "Cached data is stale, cleared cache"
            );
            notifier.invalidated(reason, cleared);
        }
        let signature = fingerprint.query_signature.clone();
        self.tracker.adopt(fingerprint);

        let block_size = self.cache.block_size();
        let expected = block_start(block, block_size);
        if response.offset != expected {
            warn!(
                store = notifier.store(),
                block,
                expected,
                actual = response.offset,
                "Response offset does not match request, not caching"
            );
            notifier.violation("offset_mismatch");
            return;
        }

        let len = response.items.len() as u64;
        if len < block_size as u64 && response.offset.saturating_add(len) < response.total {
            warn!(
                store = notifier.store(),
                block,
                len,
                total = response.total,
                "Short block before end of collection, not caching"
            );
            notifier.violation("short_block");
            return;
        }
        if response.items.is_empty() {
            return;
        }

        let evicted = self.cache.put(block, response.items.clone());
        self.cache_signature = Some(signature);
        notifier.resident(self.cache.resident_count(), evicted.len());
    }

    /// Merge created items. Appends to a complete cache; otherwise drops the
    /// active block and everything after it.
    pub(crate) fn apply_created(&mut self, created: Vec<T>, notifier: &Notifier) {
        let count = created.len() as u64;
        let appendable = self.mode() == CacheMode::FullyCached
            && self.cache_signature.as_deref().map_or(true, |s| s == self.empty_signature);

        match self.collection_total {
            Some(total) if appendable && self.cache.is_complete(total) => {
                let evicted = self.cache.append(created, total);
                self.cache_signature = Some(self.empty_signature.clone());
                self.collection_total = Some(total + count);
                self.query_total = Some((self.empty_signature.clone(), total + count));
                debug!(store = notifier.store(), count, total = total + count, "Appended created items");
                notifier.resident(self.cache.resident_count(), evicted.len());
            }
            _ => {
                let target = self.first_affected_block(&self.request);
                let removed = self.cache.remove_from(target);
                self.collection_total = self.collection_total.map(|t| t + count);
                self.query_total = match self.query_total.take() {
                    Some((sig, total)) if sig == self.empty_signature => Some((sig, total + count)),
                    _ => None,
                };
                debug!(store = notifier.store(), from = target, removed = removed.len(), "Invalidated blocks after create");
                notifier.resident(self.cache.resident_count(), 0);
            }
        }

        self.tracker.reset();
        self.generation += 1;
    }

    /// Merge the authoritative page returned by update or delete.
    ///
    /// Returns the view to show when the page can be rendered directly
    /// (no active query); otherwise the caller reloads.
    pub(crate) fn apply_page(
        &mut self,
        request: &ViewRequest,
        page: &MutationPage<T>,
        notifier: &Notifier,
    ) -> Option<PaginationView<T>> {
        let block_size = self.cache.block_size();
        let from = self.first_affected_block(request);

        self.generation += 1;
        self.tracker.reset();
        let removed = self.cache.remove_from(from);
        self.collection_total = Some(page.total);
        debug!(store = notifier.store(), from, removed = removed.len(), total = page.total, "Invalidated blocks after mutation");

        if !request.query.is_empty() {
            self.query_total = None;
            notifier.resident(self.cache.resident_count(), 0);
            return None;
        }

        self.query_total = Some((self.empty_signature.clone(), page.total));
        let target = block_for_offset(request.offset(), block_size);
        let offset = request.offset();
        let len = page.items.len() as u64;
        let aligned = offset % block_size as u64 == 0
            && len > 0
            && (len == block_size as u64 || offset.saturating_add(len) == page.total);
        let same_query = self
            .cache_signature
            .as_deref()
            .map_or(true, |s| s == self.empty_signature);

        let mut evicted = 0;
        if aligned && same_query {
            evicted = self.cache.put(target, page.items.clone()).len();
            self.cache_signature = Some(self.empty_signature.clone());
        }
        notifier.resident(self.cache.resident_count(), evicted);

        Some(PaginationView::from_window(
            page.items.clone(),
            page.total,
            request.page,
            request.page_size,
        ))
    }

    /// First block a mutation issued from `request` may have changed.
    ///
    /// A fully cached view with a filter or sort is positioned in the local
    /// result list, not in the server ordering, so its page offset says
    /// nothing about which blocks hold the mutated rows.
    fn first_affected_block(&self, request: &ViewRequest) -> BlockNum {
        if self.mode() == CacheMode::FullyCached && !request.query.is_empty() {
            return 1;
        }
        block_for_offset(request.offset(), self.cache.block_size())
    }

    /// Drop every cached block and the fingerprint.
    pub(crate) fn invalidate(&mut self) -> usize {
        let cleared = self.cache.clear();
        self.cache_signature = None;
        self.tracker.reset();
        self.query_total = None;
        self.generation += 1;
        cleared
    }
}
