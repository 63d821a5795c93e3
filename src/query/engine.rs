//! Local filter and sort over cached items.
//!
//! Only used once a collection is fully cached; in partial mode the same
//! parameters are forwarded to the backend untouched.

use std::collections::HashSet;

use crate::config::StoreConfig;
use crate::entity::Entity;
use crate::query::{Filter, QueryContext, SortDirection, SortSpec};

/// Field-aware filter/sort engine for one entity collection.
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    searchable_fields: Vec<String>,
    sortable_fields: HashSet<String>,
    array_fields: HashSet<String>,
}

impl QueryEngine {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            searchable_fields: config.searchable_fields.clone(),
            sortable_fields: config.sortable_fields.iter().cloned().collect(),
            array_fields: config.array_fields.iter().cloned().collect(),
        }
    }

    pub fn is_sortable(&self, field: &str) -> bool {
        self.sortable_fields.contains(field)
    }

    pub fn is_array_field(&self, field: &str) -> bool {
        self.array_fields.contains(field)
    }

    /// Whether applying `ctx` locally changes anything.
    pub fn has_local_work(&self, ctx: &QueryContext) -> bool {
        let filtering = ctx.filter.as_ref().is_some_and(|f| !f.is_empty());
        let sorting = ctx.sort.as_ref().is_some_and(|s| self.is_sortable(&s.field));
        filtering || sorting
    }

    /// Filter then sort.
    pub fn apply<T: Entity>(&self, items: Vec<T>, ctx: &QueryContext) -> Vec<T> {
        let items = match &ctx.filter {
            Some(filter) => self.apply_filter(items, filter),
            None => items,
        };
        match &ctx.sort {
            Some(sort) => self.apply_sort(items, sort),
            None => items,
        }
    }

    pub fn apply_filter<T: Entity>(&self, items: Vec<T>, filter: &Filter) -> Vec<T> {
        let filter = filter.normalized();
        if filter.is_empty() {
            return items;
        }
        items
            .into_iter()
            .filter(|item| self.matches(item, &filter))
            .collect()
    }

    /// Stable sort on an allow-listed field. Nulls go last ascending and
    /// first descending.
    pub fn apply_sort<T: Entity>(&self, mut items: Vec<T>, sort: &SortSpec) -> Vec<T> {
        if !self.is_sortable(&sort.field) {
            return items;
        }
        items.sort_by(|a, b| {
            let ord = a.field(&sort.field).sort_cmp(&b.field(&sort.field));
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
        items
    }

    /// Whether a single item satisfies every constraint in `filter`.
    pub fn matches<T: Entity>(&self, item: &T, filter: &Filter) -> bool {
        if let Some(term) = filter.search_term() {
            if !self.matches_search(item, term, filter.search_fields()) {
                return false;
            }
        }

        filter.field_filters().all(|(field, expected)| {
            if expected.eq_ignore_ascii_case(crate::query::ANY_VALUE) {
                return true;
            }
            let expected = expected.to_lowercase();
            let terms = item.field(field).search_terms();
            if self.is_array_field(field) {
                terms.iter().any(|t| *t == expected)
            } else {
                terms.len() == 1 && terms[0] == expected
            }
        })
    }

    fn matches_search<T: Entity>(&self, item: &T, term: &str, only: Option<Vec<&str>>) -> bool {
        // No searchable fields configured: free-text search is not offered.
        if self.searchable_fields.is_empty() {
            return true;
        }
        let term = term.to_lowercase();
        self.searchable_fields
            .iter()
            .filter(|f| only.as_ref().map_or(true, |only| only.contains(&f.as_str())))
            .any(|f| item.field(f).search_terms().iter().any(|t| t.contains(&term)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityKey, FieldValue};

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: i64,
        name: Option<&'static str>,
        roles: Vec<&'static str>,
        status: &'static str,
    }

    impl Entity for Row {
        fn key(&self) -> EntityKey {
            EntityKey::Int(self.id)
        }

        fn field(&self, name: &str) -> FieldValue {
            match name {
                "id" => FieldValue::Int(self.id),
                "name" => self.name.into(),
                "roles" => FieldValue::List(self.roles.iter().map(|r| r.to_string()).collect()),
                "status" => self.status.into(),
                _ => FieldValue::Null,
            }
        }
    }

    fn engine() -> QueryEngine {
        QueryEngine::new(
            &StoreConfig::default()
                .with_searchable_fields(&["name", "status"])
                .with_sortable_fields(&["name", "id"])
                .with_array_fields(&["roles"]),
        )
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { id: 1, name: Some("Carol"), roles: vec!["user", "admin"], status: "AC" },
            Row { id: 2, name: None, roles: vec!["user"], status: "IN" },
            Row { id: 3, name: Some("alice"), roles: vec!["viewer"], status: "AC" },
            Row { id: 4, name: Some("Bob"), roles: vec![], status: "ac" },
        ]
    }

    fn ids(rows: &[Row]) -> Vec<i64> {
        rows.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_array_field_containment() {
        let filter = Filter::new().with("roles", "admin");
        let out = engine().apply_filter(rows(), &filter);
        assert_eq!(ids(&out), vec![1]);

        let filter = Filter::new().with("roles", "USER");
        assert_eq!(ids(&engine().apply_filter(rows(), &filter)), vec![1, 2]);
    }

    #[test]
    fn test_field_equality_is_case_insensitive() {
        let filter = Filter::new().with("status", "AC");
        assert_eq!(ids(&engine().apply_filter(rows(), &filter)), vec![1, 3, 4]);
    }

    #[test]
    fn test_sentinel_means_no_constraint() {
        let filter = Filter::new().with("status", "all");
        assert_eq!(engine().apply_filter(rows(), &filter).len(), 4);
    }

    #[test]
    fn test_free_text_search_and_field_list() {
        let filter = Filter::new().with("q", "AL");
        assert_eq!(ids(&engine().apply_filter(rows(), &filter)), vec![3]);

        // Restricting to `status` hides name matches.
        let filter = Filter::new().with("q", "ali").with("fields", "status");
        assert!(engine().apply_filter(rows(), &filter).is_empty());
    }

    #[test]
    fn test_sort_nulls_last_ascending_first_descending() {
        let asc = engine().apply_sort(rows(), &SortSpec::asc("name"));
        assert_eq!(ids(&asc), vec![3, 4, 1, 2]);

        let desc = engine().apply_sort(rows(), &SortSpec::desc("name"));
        assert_eq!(ids(&desc), vec![2, 1, 4, 3]);
    }

    #[test]
    fn test_sort_ignores_unlisted_field_and_is_stable() {
        let out = engine().apply_sort(rows(), &SortSpec::asc("status"));
        assert_eq!(ids(&out), vec![1, 2, 3, 4]);

        let mut same = rows();
        for r in &mut same {
            r.name = Some("same");
        }
        let out = engine().apply_sort(same, &SortSpec::desc("name"));
        assert_eq!(ids(&out), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_local_work_detection() {
        let e = engine();
        assert!(!e.has_local_work(&QueryContext::default()));
        assert!(!e.has_local_work(&QueryContext::default().with_sort(SortSpec::asc("status"))));
        assert!(e.has_local_work(&QueryContext::default().with_sort(SortSpec::asc("id"))));
        assert!(e.has_local_work(
            &QueryContext::default().with_filter(Filter::new().with("roles", "admin"))
        ));
    }
}
