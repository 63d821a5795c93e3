//! Entity store: the pagination engine for one server-owned collection.
//!
//! - [`events`]: change notifications
//! - [`mutation`]: create/update/delete coordination
//!
//! An [`EntityStore`] owns its block cache, fingerprint tracker and
//! in-flight registry behind one async mutex. The mutex is only held for
//! short synchronous steps; backend calls run with it released, so reads
//! and mutations interleave at the collaborator boundary.

pub mod events;
pub mod mutation;
mod state;

use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::backend::{Capabilities, EntityBackend, PageRequest, PageResponse};
use crate::cache::block::{block_start, BlockNum};
use crate::cache::inflight::FetchKey;
use crate::cache::{CacheStats, Fingerprint};
use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::error::StoreError;
use crate::metrics::CacheMetrics;
use crate::query::{QueryContext, QueryEngine};
use crate::view::{PaginationView, ViewRequest};

pub use events::StoreEvent;
pub use mutation::MutationOutcome;
pub use state::CacheMode;

use events::Notifier;
use state::{FetchPlan, Step, StoreState, Transient};

/// Point-in-time summary of a store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub store: String,
    pub mode: CacheMode,
    pub collection_total: Option<u64>,
    pub generation: u64,
    pub inflight_fetches: usize,
    pub coalesced_fetches: u64,
    pub fingerprint: Option<Fingerprint>,
    pub cache: CacheStats,
}

pub struct EntityStore<T: Entity> {
    backend: Arc<dyn EntityBackend<T>>,
    config: StoreConfig,
    engine: QueryEngine,
    notifier: Notifier,
    state: Mutex<StoreState<T>>,
}

impl<T: Entity> EntityStore<T> {
    /// Create a store named `name` (used in logs and metric labels).
    pub fn new(
        name: impl Into<String>,
        backend: Arc<dyn EntityBackend<T>>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let name = name.into();
        info!(
            store = %name,
            block_size = config.block_size,
            max_blocks = config.max_blocks(),
            "Entity store created"
        );
        Ok(Self {
            backend,
            engine: QueryEngine::new(&config),
            notifier: Notifier::new(name, 64),
            state: Mutex::new(StoreState::new(&config)),
            config,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.notifier.set_metrics(metrics);
        self
    }

    /// Resize the notification channel. Existing subscribers are dropped.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.notifier.resize(capacity);
        self
    }

    pub fn name(&self) -> &str {
        self.notifier.store()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.notifier.subscribe()
    }

    /// Make `page` of `query` the active view and load it.
    ///
    /// Page and page size below 1 clamp to 1. Calling this twice with the
    /// same arguments serves the second call from memory.
    pub async fn set_view(
        &self,
        page: usize,
        page_size: usize,
        query: QueryContext,
    ) -> Result<PaginationView<T>, StoreError> {
        let request = ViewRequest::new(page, page_size, query);
        self.lock().await.request = request.clone();
        self.load(request).await
    }

    /// Reload the active view.
    pub async fn refresh(&self) -> Result<PaginationView<T>, StoreError> {
        let request = self.lock().await.request.clone();
        self.load(request).await
    }

    /// The last view built for the active request.
    pub async fn current_view(&self) -> PaginationView<T> {
        self.lock().await.view.clone()
    }

    pub async fn current_request(&self) -> ViewRequest {
        self.lock().await.request.clone()
    }

    pub async fn mode(&self) -> CacheMode {
        self.lock().await.mode()
    }

    /// Drop all cached blocks and the fingerprint. Returns how many blocks
    /// were resident.
    pub async fn invalidate(&self) -> usize {
        let mut state = self.lock().await;
        let cleared = state.invalidate();
        info!(store = self.name(), cleared, "Cache invalidated");
        self.notifier.cleared(cleared);
        self.notifier.resident(0, 0);
        cleared
    }

    pub async fn stats(&self) -> StoreStats {
        let state = self.lock().await;
        StoreStats {
            store: self.name().to_string(),
            mode: state.mode(),
            collection_total: state.collection_total,
            generation: state.generation,
            inflight_fetches: state.inflight.len(),
            coalesced_fetches: state.inflight.coalesced(),
            fingerprint: state.tracker.current().cloned(),
            cache: state.cache.stats(),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, StoreState<T>> {
        self.state.lock().await
    }

    /// Plan, fetch and render until the view is ready or the round budget
    /// runs out. Fetches within a round run one after another.
    async fn load(&self, request: ViewRequest) -> Result<PaginationView<T>, StoreError> {
        let mut transient = Transient::default();
        let rounds = self.config.max_fetch_rounds;

        for round in 0..=rounds {
            let plan = {
                let mut state = self.lock().await;
                match state.plan(&request, &self.engine, &mut transient, &self.notifier) {
                    Step::Ready(view) => return Ok(self.publish(&mut state, &request, view)),
                    Step::Fetch(plan) => plan,
                }
            };
            if round == rounds {
                break;
            }

            debug!(
                store = self.name(),
                round,
                blocks = ?plan.blocks,
                generation = plan.generation,
                "Fetching blocks"
            );
            for &block in &plan.blocks {
                match self.fetch_block(block, &plan).await? {
                    Some(response) => transient.insert(block, response),
                    // Invalidated mid-round; plan again.
                    None => break,
                }
            }
        }

        warn!(
            store = self.name(),
            rounds,
            page = request.page,
            "Fetch rounds exhausted, rendering available blocks"
        );
        let mut state = self.lock().await;
        let signature = state.forwarded(&request).signature();
        transient.align(&signature, state.generation);
        let view = state.build(&request, &self.engine, &signature, &transient);
        Ok(self.publish(&mut state, &request, view))
    }

    /// Fetch one block through the in-flight registry.
    ///
    /// Returns `None` when the response was discarded (older generation or
    /// older snapshot).
    async fn fetch_block(
        &self,
        block: BlockNum,
        plan: &FetchPlan,
    ) -> Result<Option<Arc<PageResponse<T>>>, StoreError> {
        let key = FetchKey {
            block,
            signature: plan.signature.clone(),
            generation: plan.generation,
        };
        let block_size = self.config.block_size;

        let (fetch, joined) = {
            let mut state = self.lock().await;
            let backend = Arc::clone(&self.backend);
            let request = PageRequest::new(block_start(block, block_size), block_size, &plan.query);
            state.inflight.join_or_start(key.clone(), move || {
                async move {
                    backend
                        .fetch_page(request)
                        .await
                        .map(Arc::new)
                        .map_err(Arc::new)
                }
                .boxed()
            })
        };
        if joined {
            debug!(store = self.name(), block, "Joined in-flight fetch");
            self.notifier.coalesced();
        }

        let result = fetch.wait().await;

        let mut state = self.lock().await;
        let winner = fetch.try_claim();
        if winner {
            state.inflight.complete(&key, fetch.id());
            self.notifier.fetched(result.is_ok());
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                if winner {
                    warn!(store = self.name(), block, error = %err, "Block fetch failed");
                }
                return Err(StoreError::Backend(err));
            }
        };

        let kept = state.absorb(
            block,
            &response,
            &plan.signature,
            plan.generation,
            winner,
            &self.notifier,
        );
        Ok(kept.then_some(response))
    }

    /// Record `view` as current if `request` is still the active one.
    fn publish(
        &self,
        state: &mut StoreState<T>,
        request: &ViewRequest,
        view: PaginationView<T>,
    ) -> PaginationView<T> {
        if state.request == *request {
            state.view = view.clone();
            self.notifier.emit(StoreEvent::ViewChanged {
                page: view.page,
                page_size: view.page_size,
                total: view.total,
                total_pages: view.total_pages,
            });
        }
        view
    }
}
