//! Query context: the filter and sort parameters of a view.
//!
//! - [`engine`]: local filter/sort over cached items (fully-cached mode)
//!
//! A query context is folded into a stable signature that becomes part of the
//! cache fingerprint, so cached blocks are never reused across different
//! server-side orderings.

pub mod engine;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use engine::QueryEngine;

/// Free-text search key.
pub const SEARCH_KEY: &str = "q";

/// Restricts which searchable fields the free-text term is matched against.
pub const SEARCH_FIELDS_KEY: &str = "fields";

/// Filter value meaning "no constraint on this field".
pub const ANY_VALUE: &str = "all";

/// Keys that are never treated as field filters.
pub const RESERVED_KEYS: [&str; 2] = [SEARCH_KEY, SEARCH_FIELDS_KEY];

/// Field filters plus the reserved search keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    values: BTreeMap<String, String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The free-text term, if one is set.
    pub fn search_term(&self) -> Option<&str> {
        self.get(SEARCH_KEY)
    }

    /// The fields named by the `fields` key, or `None` for "search all".
    pub fn search_fields(&self) -> Option<Vec<&str>> {
        let raw = self.get(SEARCH_FIELDS_KEY)?;
        if raw.eq_ignore_ascii_case(ANY_VALUE) {
            return None;
        }
        let fields: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        (!fields.is_empty()).then_some(fields)
    }

    /// Field filters, excluding reserved keys.
    pub fn field_filters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Drop entries that impose no constraint.
    pub fn normalized(&self) -> Filter {
        let values = self
            .values
            .iter()
            .filter(|(_, v)| {
                let v = v.trim();
                !v.is_empty() && !v.eq_ignore_ascii_case(ANY_VALUE)
            })
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect::<BTreeMap<_, _>>();

        // `fields` on its own narrows nothing.
        if values.len() == 1 && values.contains_key(SEARCH_FIELDS_KEY) {
            return Filter::default();
        }
        Filter { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, String)> for Filter {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Filter {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortDirection::Asc),
            "desc" | "descending" => Ok(SortDirection::Desc),
            other => Err(format!("unknown sort direction: {other}")),
        }
    }
}

/// Single-field sort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Filter and sort parameters of the active view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryContext {
    pub filter: Option<Filter>,
    pub sort: Option<SortSpec>,
}

impl QueryContext {
    pub fn new(filter: Option<Filter>, sort: Option<SortSpec>) -> Self {
        Self { filter, sort }.normalized()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self.normalized()
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Canonical form: empty filters become `None`.
    pub fn normalized(self) -> Self {
        let filter = self
            .filter
            .map(|f| f.normalized())
            .filter(|f| !f.is_empty());
        Self {
            filter,
            sort: self.sort,
        }
    }

    /// No filter and no sort.
    pub fn is_empty(&self) -> bool {
        self.filter.as_ref().map_or(true, Filter::is_empty) && self.sort.is_none()
    }

    /// Stable hash of the normalized parameters, hex encoded.
    pub fn signature(&self) -> String {
        let canonical = self.clone().normalized();
        // BTreeMap keys serialize in order, so equal contexts hash equally.
        let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&encoded))
    }
}
