//! Fingerprint tracking: decides whether fetched data is consistent with the
//! data already cached.
//!
//! A fingerprint identifies the snapshot the cache reflects: the owning
//! organization, the server's per-table version counters and the signature
//! of the query the blocks were fetched with. Any difference means cached
//! blocks may no longer line up with what the server would return.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::backend::TableVersion;

/// Reported in place of table names when the organization itself changed.
pub const ORGANIZATION_MARKER: &str = "*organization*";

/// Snapshot identity of the cached data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub organization_id: i64,
    pub table_versions: BTreeMap<String, i64>,
    pub query_signature: String,
}

impl Fingerprint {
    pub fn new(
        organization_id: i64,
        table_versions: &[TableVersion],
        query_signature: impl Into<String>,
    ) -> Self {
        Self {
            organization_id,
            table_versions: table_versions
                .iter()
                .map(|tv| (tv.table_name.clone(), tv.version))
                .collect(),
            query_signature: query_signature.into(),
        }
    }
}

/// Why cached data was judged stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StaleReason {
    /// The data now belongs to another organization.
    OrganizationChanged { previous: i64, current: i64 },
    /// Tables present in both snapshots moved to a different version.
    TableVersionChanged { tables: Vec<String> },
    /// The version vector gained or lost tables.
    TableSetChanged {
        added: Vec<String>,
        removed: Vec<String>,
    },
    /// Same data, different filter/sort.
    QueryChanged,
}

impl StaleReason {
    /// Changed table names, or [`ORGANIZATION_MARKER`] for an organization switch.
    pub fn changed_tables(&self) -> Vec<String> {
        match self {
            StaleReason::OrganizationChanged { .. } => vec![ORGANIZATION_MARKER.to_string()],
            StaleReason::TableVersionChanged { tables } => tables.clone(),
            StaleReason::TableSetChanged { added, removed } => {
                added.iter().chain(removed.iter()).cloned().collect()
            }
            StaleReason::QueryChanged => Vec::new(),
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StaleReason::OrganizationChanged { .. } => "organization",
            StaleReason::TableVersionChanged { .. } => "table_version",
            StaleReason::TableSetChanged { .. } => "table_set",
            StaleReason::QueryChanged => "query",
        }
    }
}

/// Outcome of [`FingerprintTracker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintCheck {
    pub stale: bool,
    pub reason: Option<StaleReason>,
}

impl FingerprintCheck {
    fn fresh() -> Self {
        Self {
            stale: false,
            reason: None,
        }
    }

    fn stale(reason: StaleReason) -> Self {
        Self {
            stale: true,
            reason: Some(reason),
        }
    }
}

/// Holds the fingerprint of the data currently cached, if any.
#[derive(Debug, Default)]
pub struct FingerprintTracker {
    current: Option<Fingerprint>,
}

impl FingerprintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Fingerprint> {
        self.current.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }

    /// Compare a newly observed fingerprint with the current one.
    ///
    /// Checks run in priority order: organization, shared table versions,
    /// table set, query signature. An unset tracker is never stale.
    pub fn check(&self, candidate: &Fingerprint) -> FingerprintCheck {
        let Some(current) = &self.current else {
            return FingerprintCheck::fresh();
        };

        if current.organization_id != candidate.organization_id {
            return FingerprintCheck::stale(StaleReason::OrganizationChanged {
                previous: current.organization_id,
                current: candidate.organization_id,
            });
        }

        let changed: Vec<String> = current
            .table_versions
            .iter()
            .filter(|(table, version)| {
                candidate
                    .table_versions
                    .get(*table)
                    .is_some_and(|v| v != *version)
            })
            .map(|(table, _)| table.clone())
            .collect();
        if !changed.is_empty() {
            return FingerprintCheck::stale(StaleReason::TableVersionChanged { tables: changed });
        }

        let added: Vec<String> = candidate
            .table_versions
            .keys()
            .filter(|t| !current.table_versions.contains_key(*t))
            .cloned()
            .collect();
        let removed: Vec<String> = current
            .table_versions
            .keys()
            .filter(|t| !candidate.table_versions.contains_key(*t))
            .cloned()
            .collect();
        if !added.is_empty() || !removed.is_empty() {
            return FingerprintCheck::stale(StaleReason::TableSetChanged { added, removed });
        }

        if current.query_signature != candidate.query_signature {
            return FingerprintCheck::stale(StaleReason::QueryChanged);
        }

        FingerprintCheck::fresh()
    }

    /// Replace the fingerprint wholesale.
    pub fn adopt(&mut self, fingerprint: Fingerprint) {
        self.current = Some(fingerprint);
    }

    /// Forget the fingerprint; the next fetch re-initializes it.
    pub fn reset(&mut self) {
        self.current = None;
    }
}
