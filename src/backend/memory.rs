//! In-memory backend.
//!
//! Behaves like the paginated server API: filter and sort are applied
//! server-side, pages are cut by offset/limit, every response carries the
//! organization id and the table version vector, and every successful
//! mutation bumps the collection's table version. Optional latency and
//! injected failures make it usable for concurrency and error-path tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{
    BackendError, Capabilities, Created, EntityBackend, MutationKind, MutationResponse,
    OperationMetadata, PageRequest, PageResponse, PaginationContext, TableVersion,
};
use crate::config::StoreConfig;
use crate::entity::{Entity, EntityKey};
use crate::query::QueryEngine;

struct BackendState<T> {
    organization_id: i64,
    items: Vec<T>,
    table_versions: BTreeMap<String, i64>,
    requests: Vec<PageRequest>,
    injected_failures: Vec<BackendError>,
}

/// Server stand-in holding one collection in memory.
pub struct InMemoryBackend<T> {
    table: String,
    engine: QueryEngine,
    capabilities: Capabilities,
    latency: Option<Duration>,
    state: RwLock<BackendState<T>>,
    fetches: AtomicU64,
}

impl<T: Entity> InMemoryBackend<T> {
    /// Create a backend for `table`, using the store config's field lists for
    /// server-side filtering and sorting.
    pub fn new(table: impl Into<String>, organization_id: i64, config: &StoreConfig) -> Self {
        let table = table.into();
        let mut table_versions = BTreeMap::new();
        table_versions.insert(table.clone(), 1);
        Self {
            table,
            engine: QueryEngine::new(config),
            capabilities: Capabilities::full(),
            latency: None,
            state: RwLock::new(BackendState {
                organization_id,
                items: Vec::new(),
                table_versions,
                requests: Vec::new(),
                injected_failures: Vec::new(),
            }),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn with_items(mut self, items: Vec<T>) -> Self {
        self.state.get_mut().items = items;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of `fetch_page` calls served so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Every page request received, in arrival order.
    pub async fn requests(&self) -> Vec<PageRequest> {
        self.state.read().await.requests.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.items.is_empty()
    }

    /// Move the collection to another organization.
    pub async fn set_organization(&self, organization_id: i64) {
        self.state.write().await.organization_id = organization_id;
    }

    /// Bump a table's version (adding the table if unknown), as a write
    /// made by another client would.
    pub async fn bump_table(&self, table: &str) {
        let mut state = self.state.write().await;
        *state.table_versions.entry(table.to_string()).or_insert(0) += 1;
    }

    /// Make the next backend call fail with `err`.
    pub async fn inject_failure(&self, err: BackendError) {
        self.state.write().await.injected_failures.push(err);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_failure(state: &mut BackendState<T>) -> Result<(), BackendError> {
        match state.injected_failures.pop() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn versions(state: &BackendState<T>) -> Vec<TableVersion> {
        state
            .table_versions
            .iter()
            .map(|(name, version)| TableVersion::new(name.clone(), *version))
            .collect()
    }

    fn bump(&self, state: &mut BackendState<T>) {
        *state.table_versions.entry(self.table.clone()).or_insert(0) += 1;
    }

    fn page_of(state: &BackendState<T>, ctx: PaginationContext) -> Vec<T> {
        state
            .items
            .iter()
            .skip(ctx.offset as usize)
            .take(ctx.limit)
            .cloned()
            .collect()
    }

    fn metadata(&self, kind: MutationKind, ids: &[EntityKey]) -> OperationMetadata {
        OperationMetadata {
            success: true,
            entity: self.table.clone(),
            operation: kind.to_string(),
            message: format!("{} {} {kind}d", ids.len(), self.table),
            count: ids.len(),
            ids: ids.iter().map(ToString::to_string).collect(),
        }
    }
}

#[async_trait]
impl<T: Entity> EntityBackend<T> for InMemoryBackend<T> {
    async fn fetch_page(&self, request: PageRequest) -> Result<PageResponse<T>, BackendError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let mut state = self.state.write().await;
        state.requests.push(request.clone());
        Self::take_failure(&mut state)?;

        let matching = self.engine.apply(state.items.clone(), &request.query());
        let total = matching.len() as u64;
        let items: Vec<T> = matching
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit)
            .collect();

        debug!(
            table = %self.table,
            offset = request.offset,
            limit = request.limit,
            returned = items.len(),
            total,
            "Served page"
        );

        Ok(PageResponse {
            items,
            total,
            offset: request.offset,
            organization_id: state.organization_id,
            table_versions: Self::versions(&state),
        })
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn create(&self, items: Vec<T>) -> Result<Created<T>, BackendError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        Self::take_failure(&mut state)?;

        for item in &items {
            let key = item.key();
            if state.items.iter().any(|existing| existing.key() == key) {
                return Err(BackendError::rejected(
                    "DUPLICATE_KEY",
                    format!("{} {key} already exists", self.table),
                ));
            }
        }

        state.items.extend(items.iter().cloned());
        self.bump(&mut state);

        let mut items = items;
        if items.len() == 1 {
            if let Some(item) = items.pop() {
                return Ok(Created::One(item));
            }
        }
        Ok(Created::Many(items))
    }

    async fn update(
        &self,
        items: Vec<T>,
        ctx: PaginationContext,
    ) -> Result<MutationResponse<T>, BackendError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        Self::take_failure(&mut state)?;

        // All-or-nothing: validate every key before touching anything.
        let mut positions = Vec::with_capacity(items.len());
        for item in &items {
            let key = item.key();
            match state.items.iter().position(|existing| existing.key() == key) {
                Some(pos) => positions.push(pos),
                None => {
                    return Err(BackendError::rejected(
                        "NOT_FOUND",
                        format!("{} {key} not found", self.table),
                    ))
                }
            }
        }

        let keys: Vec<EntityKey> = items.iter().map(Entity::key).collect();
        for (pos, item) in positions.into_iter().zip(items) {
            state.items[pos] = item;
        }
        self.bump(&mut state);

        let total = state.items.len() as u64;
        Ok(MutationResponse::page(Self::page_of(&state, ctx), total)
            .with_metadata(self.metadata(MutationKind::Update, &keys)))
    }

    async fn delete(
        &self,
        ids: Vec<EntityKey>,
        ctx: PaginationContext,
    ) -> Result<MutationResponse<T>, BackendError> {
        self.simulate_latency().await;
        let mut state = self.state.write().await;
        Self::take_failure(&mut state)?;

        for key in &ids {
            if !state.items.iter().any(|existing| existing.key() == *key) {
                return Err(BackendError::rejected(
                    "NOT_FOUND",
                    format!("{} {key} not found", self.table),
                ));
            }
        }

        state.items.retain(|item| !ids.contains(&item.key()));
        self.bump(&mut state);

        let total = state.items.len() as u64;
        Ok(MutationResponse::page(Self::page_of(&state, ctx), total)
            .with_metadata(self.metadata(MutationKind::Delete, &ids)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldValue;
    use crate::query::{Filter, QueryContext, SortSpec};

    #[derive(Debug, Clone, PartialEq)]
    struct Item(i64, &'static str);

    impl Entity for Item {
        fn key(&self) -> EntityKey {
            EntityKey::Int(self.0)
        }

        fn field(&self, name: &str) -> FieldValue {
            match name {
                "id" => FieldValue::Int(self.0),
                "name" => self.1.into(),
                _ => FieldValue::Null,
            }
        }
    }

    fn backend() -> InMemoryBackend<Item> {
        let config = StoreConfig::default()
            .with_searchable_fields(&["name"])
            .with_sortable_fields(&["id", "name"]);
        InMemoryBackend::new("items", 1, &config).with_items(vec![
            Item(1, "delta"),
            Item(2, "alpha"),
            Item(3, "charlie"),
            Item(4, "bravo"),
        ])
    }

    #[tokio::test]
    async fn test_fetch_page_slices_and_reports_metadata() {
        let b = backend();
        let resp = b
            .fetch_page(PageRequest::new(1, 2, &QueryContext::default()))
            .await
            .unwrap();
        assert_eq!(resp.items, vec![Item(2, "alpha"), Item(3, "charlie")]);
        assert_eq!(resp.total, 4);
        assert_eq!(resp.offset, 1);
        assert_eq!(resp.organization_id, 1);
        assert_eq!(resp.table_versions, vec![TableVersion::new("items", 1)]);
        assert_eq!(b.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_page_applies_query_server_side() {
        let b = backend();
        let query = QueryContext::default()
            .with_filter(Filter::new().with("q", "a"))
            .with_sort(SortSpec::asc("name"));
        let resp = b.fetch_page(PageRequest::new(0, 10, &query)).await.unwrap();
        let ids: Vec<i64> = resp.items.iter().map(|i| i.0).collect();
        assert_eq!(ids, vec![2, 4, 3, 1]);
    }

    #[tokio::test]
    async fn test_mutations_bump_version() {
        let b = backend();
        b.create(vec![Item(5, "echo")]).await.unwrap();
        let ctx = PaginationContext { offset: 0, limit: 2 };
        let resp = b.delete(vec![EntityKey::Int(1)], ctx).await.unwrap();
        assert_eq!(resp.total, Some(4));
        assert_eq!(resp.items.unwrap()[0], Item(2, "alpha"));

        let page = b
            .fetch_page(PageRequest::new(0, 1, &QueryContext::default()))
            .await
            .unwrap();
        assert_eq!(page.table_versions, vec![TableVersion::new("items", 3)]);
    }

    #[tokio::test]
    async fn test_update_unknown_key_rejected_without_changes() {
        let b = backend();
        let ctx = PaginationContext { offset: 0, limit: 4 };
        let err = b
            .update(vec![Item(1, "renamed"), Item(99, "ghost")], ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let page = b
            .fetch_page(PageRequest::new(0, 1, &QueryContext::default()))
            .await
            .unwrap();
        assert_eq!(page.items[0], Item(1, "delta"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_returned_once() {
        let b = backend();
        b.inject_failure(BackendError::Unavailable("maintenance".into())).await;
        let req = PageRequest::new(0, 1, &QueryContext::default());
        assert!(b.fetch_page(req.clone()).await.is_err());
        assert!(b.fetch_page(req).await.is_ok());
    }
}
