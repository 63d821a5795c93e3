//! Backend collaborator contracts.
//!
//! - [`memory`]: in-memory reference backend (tests, benches, demo service)
//!
//! The store never talks to a transport directly. It consumes one async
//! trait, [`EntityBackend`], whose wire shapes mirror the paginated API the
//! server exposes: a page of items with its offset, total, owning
//! organization and per-table version counters.

pub mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entity::{Entity, EntityKey};
use crate::error::StoreError;
use crate::query::{Filter, QueryContext, SortSpec};

pub use memory::InMemoryBackend;

/// Failure reported by a backend collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The request never produced a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with an application error.
    #[error("backend rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The server is temporarily unable to serve the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        BackendError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            BackendError::Transport(_) => "TRANSPORT_ERROR",
            BackendError::Rejected { code, .. } => code,
            BackendError::Unavailable(_) => "BACKEND_UNAVAILABLE",
        }
    }
}

/// One entry of the server's table version vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableVersion {
    #[serde(alias = "tableName")]
    pub table_name: String,
    #[serde(alias = "table_version")]
    pub version: i64,
}

impl TableVersion {
    pub fn new(table_name: impl Into<String>, version: i64) -> Self {
        Self {
            table_name: table_name.into(),
            version,
        }
    }
}

/// Request for one offset-aligned slice of the collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortSpec>,
}

impl PageRequest {
    pub fn new(offset: u64, limit: usize, query: &QueryContext) -> Self {
        Self {
            offset,
            limit,
            filter: query.filter.clone(),
            sort: query.sort.clone(),
        }
    }

    pub fn query(&self) -> QueryContext {
        QueryContext::new(self.filter.clone(), self.sort.clone())
    }
}

/// A page of items plus the snapshot metadata used for staleness checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    #[serde(alias = "org_id", alias = "organizationId")]
    pub organization_id: i64,
    #[serde(default, alias = "version", alias = "tableVersions")]
    pub table_versions: Vec<TableVersion>,
}

/// The view active when a mutation was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationContext {
    pub offset: u64,
    pub limit: usize,
}

/// A create call may answer with one entity or several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Created<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Created<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Created::Many(items) => items,
            Created::One(item) => vec![item],
        }
    }
}

/// Summary the server attaches to mutation responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationMetadata {
    pub success: bool,
    pub entity: String,
    pub operation: String,
    pub message: String,
    pub count: usize,
    pub ids: Vec<String>,
}

/// Raw update/delete response. Both `items` and `total` are required; they are
/// optional here so a response missing them can be reported instead of
/// silently read as an empty page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse<T> {
    #[serde(default)]
    pub items: Option<Vec<T>>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub operation_metadata: Option<OperationMetadata>,
}

impl<T> MutationResponse<T> {
    pub fn page(items: Vec<T>, total: u64) -> Self {
        Self {
            items: Some(items),
            total: Some(total),
            operation_metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: OperationMetadata) -> Self {
        self.operation_metadata = Some(metadata);
        self
    }

    /// Validate the response shape.
    pub fn into_page(self, operation: MutationKind) -> Result<MutationPage<T>, StoreError> {
        let items = self.items.ok_or(StoreError::MalformedResponse {
            operation,
            field: "items",
        })?;
        let total = self.total.ok_or(StoreError::MalformedResponse {
            operation,
            field: "total",
        })?;
        Ok(MutationPage {
            items,
            total,
            metadata: self.operation_metadata,
        })
    }
}

/// Validated update/delete response.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPage<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub metadata: Option<OperationMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

/// Which mutations a backend offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub create: bool,
    pub update: bool,
    pub delete: bool,
}

impl Capabilities {
    pub fn read_only() -> Self {
        Self {
            create: false,
            update: false,
            delete: false,
        }
    }

    pub fn full() -> Self {
        Self {
            create: true,
            update: true,
            delete: true,
        }
    }

    pub fn supports(&self, kind: MutationKind) -> bool {
        match kind {
            MutationKind::Create => self.create,
            MutationKind::Update => self.update,
            MutationKind::Delete => self.delete,
        }
    }
}

/// Fetch and mutation collaborator for one entity collection.
///
/// Only `fetch_page` is mandatory. Backends that accept mutations override
/// [`capabilities`](EntityBackend::capabilities) and the matching methods;
/// the store checks capabilities before calling them.
#[async_trait]
pub trait EntityBackend<T: Entity>: Send + Sync {
    /// Fetch `limit` items starting at `offset`, with optional server-side
    /// filter and sort.
    async fn fetch_page(&self, request: PageRequest) -> Result<PageResponse<T>, BackendError>;

    fn capabilities(&self) -> Capabilities {
        Capabilities::read_only()
    }

    async fn create(&self, _items: Vec<T>) -> Result<Created<T>, BackendError> {
        Err(unsupported(MutationKind::Create))
    }

    /// Apply updates and return the page described by `ctx`.
    async fn update(
        &self,
        _items: Vec<T>,
        _ctx: PaginationContext,
    ) -> Result<MutationResponse<T>, BackendError> {
        Err(unsupported(MutationKind::Update))
    }

    /// Delete by key and return the page described by `ctx`.
    async fn delete(
        &self,
        _ids: Vec<EntityKey>,
        _ctx: PaginationContext,
    ) -> Result<MutationResponse<T>, BackendError> {
        Err(unsupported(MutationKind::Delete))
    }
}

fn unsupported(kind: MutationKind) -> BackendError {
    BackendError::rejected("NOT_IMPLEMENTED", format!("{kind} is not implemented"))
}
