//! Entity identity and field access.
//!
//! The cache is generic over the records it holds. A record only has to
//! expose a stable identity and named field values; everything else
//! (filtering, sorting, merging) is expressed in terms of those two hooks.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a record, as assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(id) => write!(f, "{id}"),
            EntityKey::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(id: i64) -> Self {
        EntityKey::Int(id)
    }
}

impl From<&str> for EntityKey {
    fn from(id: &str) -> Self {
        EntityKey::Text(id.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(id: String) -> Self {
        EntityKey::Text(id)
    }
}

/// A single field value as seen by the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Lowercased textual renderings of the value, one per element for lists.
    pub fn search_terms(&self) -> Vec<String> {
        match self {
            FieldValue::Null => Vec::new(),
            FieldValue::Bool(b) => vec![b.to_string()],
            FieldValue::Int(n) => vec![n.to_string()],
            FieldValue::Float(x) => vec![x.to_string()],
            FieldValue::Text(s) => vec![s.to_lowercase()],
            FieldValue::List(items) => items.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            FieldValue::Bool(_) => 0,
            FieldValue::Int(_) | FieldValue::Float(_) => 1,
            FieldValue::Text(_) => 2,
            FieldValue::List(_) => 3,
            FieldValue::Null => 4,
        }
    }

    /// Total ordering used for sorting. Nulls compare greater than any value,
    /// so they land last in ascending order. Text compares case-insensitively.
    pub fn sort_cmp(&self, other: &FieldValue) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
            (Int(a), Float(b)) => (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal),
            (Float(a), Int(b)) => a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal),
            (Text(a), Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
            (List(a), List(b)) => a.len().cmp(&b.len()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// A record that can live in an entity store.
///
/// Records are immutable snapshots: the cache clones them into blocks and
/// never hands out references that alias server state.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Server-assigned identity.
    fn key(&self) -> EntityKey;

    /// Named field lookup. Unknown fields return [`FieldValue::Null`].
    fn field(&self, name: &str) -> FieldValue;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_after_values() {
        let null = FieldValue::Null;
        let text = FieldValue::from("alpha");
        assert_eq!(text.sort_cmp(&null), Ordering::Less);
        assert_eq!(null.sort_cmp(&text), Ordering::Greater);
        assert_eq!(null.sort_cmp(&FieldValue::Null), Ordering::Equal);
    }

    #[test]
    fn test_text_compares_case_insensitively() {
        let a = FieldValue::from("apple");
        let b = FieldValue::from("Banana");
        assert_eq!(a.sort_cmp(&b), Ordering::Less);
        assert_eq!(FieldValue::from("ABC").sort_cmp(&FieldValue::from("abc")), Ordering::Equal);
    }

    #[test]
    fn test_key_display() {
        assert_eq!(EntityKey::from(42).to_string(), "42");
        assert_eq!(EntityKey::from("usr-1").to_string(), "usr-1");
    }
}
