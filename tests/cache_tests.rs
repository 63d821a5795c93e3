//! Integration tests for the block cache, fingerprint tracker and query engine.

use paged_entity_cache::backend::TableVersion;
use paged_entity_cache::cache::block::{block_for_page, read_range};
use paged_entity_cache::cache::fingerprint::ORGANIZATION_MARKER;
use paged_entity_cache::cache::{BlockCache, Fingerprint, FingerprintTracker, StaleReason};
use paged_entity_cache::config::StoreConfig;
use paged_entity_cache::entity::{Entity, EntityKey, FieldValue};
use paged_entity_cache::query::{Filter, QueryContext, QueryEngine, SortSpec};

#[derive(Debug, Clone, PartialEq)]
struct Member {
    id: i64,
    name: &'static str,
    roles: Vec<&'static str>,
    team: Option<&'static str>,
}

impl Entity for Member {
    fn key(&self) -> EntityKey {
        EntityKey::Int(self.id)
    }

    fn field(&self, name: &str) -> FieldValue {
        match name {
            "id" => FieldValue::Int(self.id),
            "name" => self.name.into(),
            "roles" => FieldValue::List(self.roles.iter().map(|r| r.to_string()).collect()),
            "team" => self.team.into(),
            _ => FieldValue::Null,
        }
    }
}

fn member(id: i64, name: &'static str, roles: &[&'static str], team: Option<&'static str>) -> Member {
    Member {
        id,
        name,
        roles: roles.to_vec(),
        team,
    }
}

fn engine() -> QueryEngine {
    QueryEngine::new(
        &StoreConfig::default()
            .with_searchable_fields(&["name", "team"])
            .with_sortable_fields(&["id", "name", "team"])
            .with_array_fields(&["roles"]),
    )
}

#[test]
fn test_block_lifecycle() {
    let mut cache = BlockCache::new(100, 5);
    let items: Vec<u32> = (0..250).collect();

    for (i, chunk) in items.chunks(100).enumerate() {
        cache.put(i as u64 + 1, chunk.to_vec());
    }
    assert!(cache.is_complete(250));

    // Page 3 of size 50 lives entirely in block 2.
    assert_eq!(block_for_page(3, 50, 100), 2);
    let page = read_range(|n| cache.peek(n).map(|b| b.items.as_slice()), 100, 100, 150);
    assert_eq!(page.first(), Some(&100));
    assert_eq!(page.len(), 50);

    // A page spanning two blocks is stitched together.
    let page = read_range(|n| cache.peek(n).map(|b| b.items.as_slice()), 100, 180, 220);
    assert_eq!(page, (180..220).collect::<Vec<u32>>());

    let dropped = cache.remove_from(2);
    assert_eq!(dropped, vec![2, 3]);
    assert!(!cache.is_complete(250));
    assert_eq!(cache.clear(), 1);
    assert!(cache.is_empty());
}

#[test]
fn test_fingerprint_priority_order() {
    let mut tracker = FingerprintTracker::new();
    let base = Fingerprint::new(1, &[TableVersion::new("users", 1)], "q1");
    assert!(!tracker.check(&base).stale);
    tracker.adopt(base);

    // Organization beats every other difference.
    let moved = Fingerprint::new(2, &[TableVersion::new("roles", 1)], "q2");
    let check = tracker.check(&moved);
    assert!(check.stale);
    assert_eq!(
        check.reason.as_ref().map(StaleReason::changed_tables),
        Some(vec![ORGANIZATION_MARKER.to_string()])
    );

    // Same org: version change beats query change.
    let bumped = Fingerprint::new(1, &[TableVersion::new("users", 2)], "q2");
    assert!(matches!(
        tracker.check(&bumped).reason,
        Some(StaleReason::TableVersionChanged { .. })
    ));

    let requery = Fingerprint::new(1, &[TableVersion::new("users", 1)], "q2");
    assert_eq!(tracker.check(&requery).reason, Some(StaleReason::QueryChanged));
}

#[test]
fn test_array_filter_containment() {
    let items = vec![
        member(1, "Ann", &["user", "admin"], None),
        member(2, "Bob", &["user"], None),
    ];
    let filter = Filter::new().with("roles", "admin");
    let matched = engine().apply_filter(items, &filter);
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].id, 1);
}

#[test]
fn test_search_and_field_filters_combine() {
    let items = vec![
        member(1, "Ann Lee", &["user"], Some("Core")),
        member(2, "Anna Park", &["user"], Some("Web")),
        member(3, "Bob Ng", &["user"], Some("Core")),
    ];
    let ctx = QueryContext::default().with_filter(
        Filter::new()
            .with("q", "ANN")
            .with("fields", "name")
            .with("team", "core"),
    );
    let out = engine().apply(items, &ctx);
    assert_eq!(out.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1]);
}

#[test]
fn test_sort_nulls_and_stability() {
    let items = vec![
        member(1, "b", &[], None),
        member(2, "a", &[], Some("x")),
        member(3, "c", &[], Some("x")),
        member(4, "d", &[], Some("a")),
    ];

    let asc = engine().apply_sort(items.clone(), &SortSpec::asc("team"));
    assert_eq!(asc.iter().map(|m| m.id).collect::<Vec<_>>(), vec![4, 2, 3, 1]);

    let desc = engine().apply_sort(items.clone(), &SortSpec::desc("team"));
    assert_eq!(desc.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

    // Not on the allow-list: order untouched.
    let ignored = engine().apply_sort(items, &SortSpec::asc("roles"));
    assert_eq!(ignored.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
}
