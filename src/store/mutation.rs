//! Mutation coordination.
//!
//! Each mutation moves through `in-flight -> applied | failed`. Backend
//! failures leave the cache and fingerprint exactly as they were; applied
//! mutations merge into the block cache, reset the fingerprint and start a
//! new cache generation so that fetches issued before the mutation are never
//! cached.

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{MutationKind, MutationPage, OperationMetadata, PaginationContext};
use crate::entity::{Entity, EntityKey};
use crate::error::StoreError;
use crate::store::{EntityStore, StoreEvent};
use crate::view::{PaginationView, ViewRequest};

/// Result of an applied mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome<T> {
    pub mutation_id: Uuid,
    pub kind: MutationKind,

    /// Entities affected, as reported by the backend when it says so.
    pub count: usize,

    /// Entities returned by create. Empty for update and delete.
    pub created: Vec<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<OperationMetadata>,

    /// The active view after the mutation.
    pub view: PaginationView<T>,
}

impl<T: Entity> EntityStore<T> {
    /// Create one or more entities.
    ///
    /// A fully cached collection takes the new entities at its end; otherwise
    /// the active block and everything after it are refetched.
    pub async fn create(&self, items: Vec<T>) -> Result<MutationOutcome<T>, StoreError> {
        let kind = MutationKind::Create;
        let mutation_id = self.begin(kind)?;

        let created = match self.backend.create(items).await {
            Ok(created) => created.into_vec(),
            Err(err) => return Err(self.fail(mutation_id, kind, err.into())),
        };
        let count = created.len();

        let request = {
            let mut state = self.lock().await;
            state.apply_created(created.clone(), &self.notifier);
            state.request.clone()
        };
        self.applied(mutation_id, kind, count, None);

        let view = self.load(request).await?;
        Ok(MutationOutcome {
            mutation_id,
            kind,
            count,
            created,
            metadata: None,
            view,
        })
    }

    /// Replace entities (matched by key). The backend answers with the
    /// active page, which replaces the active block.
    pub async fn update(&self, items: Vec<T>) -> Result<MutationOutcome<T>, StoreError> {
        let kind = MutationKind::Update;
        let mutation_id = self.begin(kind)?;
        let requested = items.len();

        let (request, ctx) = self.active_context().await;
        let page = match self.backend.update(items, ctx).await {
            Ok(response) => response.into_page(kind),
            Err(err) => Err(err.into()),
        }
        .map_err(|err| self.fail(mutation_id, kind, err))?;

        self.finish_page(mutation_id, kind, requested, request, page).await
    }

    /// Delete entities by key. The backend answers with the active page.
    pub async fn delete(&self, ids: Vec<EntityKey>) -> Result<MutationOutcome<T>, StoreError> {
        let kind = MutationKind::Delete;
        let mutation_id = self.begin(kind)?;
        let requested = ids.len();

        let (request, ctx) = self.active_context().await;
        let page = match self.backend.delete(ids, ctx).await {
            Ok(response) => response.into_page(kind),
            Err(err) => Err(err.into()),
        }
        .map_err(|err| self.fail(mutation_id, kind, err))?;

        self.finish_page(mutation_id, kind, requested, request, page).await
    }

    async fn active_context(&self) -> (ViewRequest, PaginationContext) {
        let request = self.lock().await.request.clone();
        let ctx = PaginationContext {
            offset: request.offset(),
            limit: request.page_size,
        };
        (request, ctx)
    }

    async fn finish_page(
        &self,
        mutation_id: Uuid,
        kind: MutationKind,
        requested: usize,
        request: ViewRequest,
        page: MutationPage<T>,
    ) -> Result<MutationOutcome<T>, StoreError> {
        let direct = {
            let mut state = self.lock().await;
            state
                .apply_page(&request, &page, &self.notifier)
                .map(|view| self.publish(&mut state, &request, view))
        };

        let count = page.metadata.as_ref().map_or(requested, |m| m.count);
        self.applied(mutation_id, kind, count, page.metadata.clone());

        let view = match direct {
            Some(view) => view,
            None => self.load(request).await?,
        };
        Ok(MutationOutcome {
            mutation_id,
            kind,
            count,
            created: Vec::new(),
            metadata: page.metadata,
            view,
        })
    }

    fn begin(&self, kind: MutationKind) -> Result<Uuid, StoreError> {
        if !self.backend.capabilities().supports(kind) {
            warn!(store = self.name(), %kind, "Mutation not supported by backend");
            return Err(StoreError::Unsupported { operation: kind });
        }
        let mutation_id = Uuid::new_v4();
        info!(store = self.name(), %mutation_id, %kind, "Mutation started");
        self.notifier.emit(StoreEvent::MutationStarted { mutation_id, kind });
        Ok(mutation_id)
    }

    fn applied(
        &self,
        mutation_id: Uuid,
        kind: MutationKind,
        count: usize,
        metadata: Option<OperationMetadata>,
    ) {
        info!(
            store = self.name(),
            %mutation_id,
            %kind,
            count,
            message = metadata.as_ref().map(|m| m.message.as_str()).unwrap_or(""),
            "Mutation applied"
        );
        self.notifier.mutation(kind, true);
        self.notifier.emit(StoreEvent::MutationApplied {
            mutation_id,
            kind,
            count,
            metadata,
        });
    }

    fn fail(&self, mutation_id: Uuid, kind: MutationKind, err: StoreError) -> StoreError {
        warn!(store = self.name(), %mutation_id, %kind, error = %err, "Mutation failed");
        self.notifier.mutation(kind, false);
        self.notifier.emit(StoreEvent::MutationFailed {
            mutation_id,
            kind,
            code: err.code().to_string(),
            message: err.to_string(),
        });
        err
    }
}
