//! Store change notifications.
//!
//! Subscribers receive [`StoreEvent`]s over a `tokio::sync::broadcast`
//! channel. Events are small and non-generic; a subscriber that wants the
//! new items pulls them with [`current_view`](super::EntityStore::current_view).

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::backend::{MutationKind, OperationMetadata};
use crate::cache::StaleReason;
use crate::metrics::CacheMetrics;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// The current view was rebuilt.
    ViewChanged {
        page: usize,
        page_size: usize,
        total: u64,
        total_pages: usize,
    },

    /// The whole block cache was dropped.
    CacheInvalidated {
        reason: StaleReason,
        changed_tables: Vec<String>,
        cleared_blocks: usize,
    },

    /// The cache was dropped on request.
    CacheCleared { cleared_blocks: usize },

    MutationStarted {
        mutation_id: Uuid,
        kind: MutationKind,
    },

    MutationApplied {
        mutation_id: Uuid,
        kind: MutationKind,
        count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<OperationMetadata>,
    },

    MutationFailed {
        mutation_id: Uuid,
        kind: MutationKind,
        code: String,
        message: String,
    },
}

impl StoreEvent {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreEvent::ViewChanged { .. } => "view_changed",
            StoreEvent::CacheInvalidated { .. } => "cache_invalidated",
            StoreEvent::CacheCleared { .. } => "cache_cleared",
            StoreEvent::MutationStarted { .. } => "mutation_started",
            StoreEvent::MutationApplied { .. } => "mutation_applied",
            StoreEvent::MutationFailed { .. } => "mutation_failed",
        }
    }
}

/// Fans store activity out to subscribers and metrics.
pub(crate) struct Notifier {
    store: String,
    events: broadcast::Sender<StoreEvent>,
    metrics: Option<Arc<CacheMetrics>>,
}

impl Notifier {
    pub(crate) fn new(store: String, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            store,
            events,
            metrics: None,
        }
    }

    pub(crate) fn store(&self) -> &str {
        &self.store
    }

    /// Replace the channel with one of a different capacity.
    pub(crate) fn resize(&mut self, capacity: usize) {
        let (events, _) = broadcast::channel(capacity.max(1));
        self.events = events;
    }

    pub(crate) fn set_metrics(&mut self, metrics: Arc<CacheMetrics>) {
        self.metrics = Some(metrics);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // Sending only fails when nobody is subscribed.
        let _ = self.events.send(event);
    }

    pub(crate) fn invalidated(&self, reason: StaleReason, cleared_blocks: usize) {
        if let Some(m) = &self.metrics {
            m.record_invalidation(&self.store, reason.label());
        }
        self.emit(StoreEvent::CacheInvalidated {
            changed_tables: reason.changed_tables(),
            reason,
            cleared_blocks,
        });
    }

    pub(crate) fn cleared(&self, cleared_blocks: usize) {
        if let Some(m) = &self.metrics {
            m.record_invalidation(&self.store, "manual");
        }
        self.emit(StoreEvent::CacheCleared { cleared_blocks });
    }

    pub(crate) fn lookups(&self, hits: u64, misses: u64) {
        if let Some(m) = &self.metrics {
            m.record_hits(&self.store, hits);
            m.record_misses(&self.store, misses);
        }
    }

    pub(crate) fn fetched(&self, ok: bool) {
        if let Some(m) = &self.metrics {
            m.record_fetch(&self.store, ok);
        }
    }

    pub(crate) fn coalesced(&self) {
        if let Some(m) = &self.metrics {
            m.record_coalesced(&self.store);
        }
    }

    pub(crate) fn violation(&self, kind: &str) {
        if let Some(m) = &self.metrics {
            m.record_violation(&self.store, kind);
        }
    }

    pub(crate) fn resident(&self, blocks: usize, evicted: usize) {
        if let Some(m) = &self.metrics {
            if evicted > 0 {
                m.record_evictions(&self.store, evicted);
            }
            m.set_resident(&self.store, blocks);
        }
    }

    pub(crate) fn mutation(&self, kind: MutationKind, ok: bool) {
        if let Some(m) = &self.metrics {
            m.record_mutation(&self.store, kind, ok);
        }
    }
}
