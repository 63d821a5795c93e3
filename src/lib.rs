//! paged-entity-cache: block-based read-through cache for paginated,
//! server-owned entity collections.
//!
//! Pages are served from fixed-size blocks of the server ordering:
//!   setView → mode decision → block cache (fetch on miss) → fingerprint check → view
//!
//! Collections small enough to cache completely are filtered and sorted
//! locally; larger ones forward the query to the backend. A fingerprint of
//! organization, table versions and query signature guards against showing
//! stale data after server-side changes.

pub mod backend;
pub mod cache;
pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod models;
pub mod query;
pub mod server;
pub mod store;
pub mod view;

pub use backend::{EntityBackend, InMemoryBackend};
pub use entity::{Entity, EntityKey, FieldValue};
pub use error::StoreError;
pub use query::{Filter, QueryContext, SortDirection, SortSpec};
pub use store::{EntityStore, StoreEvent};
pub use view::PaginationView;
