use std::sync::Arc;

use enrichment_service::{
    clients::cache::{TtlCache, enriched_user_key},
    utils::Clock,
};
use serde_json::{Value as JsonValue, json};

use crate::support::ManualClock;

fn cache_at(epoch_seconds: i64) -> (Arc<ManualClock>, TtlCache<JsonValue>) {
    let clock = ManualClock::starting_at(epoch_seconds);
    let cache = TtlCache::new(clock.clone() as Arc<dyn Clock>);
    (clock, cache)
}

/// Test: entries are served until the TTL boundary and miss after it
#[test]
fn test_entry_expires_at_ttl_boundary() {
    let (clock, cache) = cache_at(1_000);

    cache.set("k", json!("v"), 30);

    clock.advance_secs(29);
    assert_eq!(cache.get("k"), Some(json!("v")), "29s in: still live");

    clock.advance_secs(2);
    assert_eq!(cache.get("k"), None, "31s in: expired");
}

/// Test: explicit delete invalidates before the TTL elapses
#[test]
fn test_delete_invalidates_before_expiry() {
    let (_clock, cache) = cache_at(1_000);

    cache.set("k", json!("v"), 300);
    assert!(cache.delete("k"));

    assert_eq!(cache.get("k"), None);
    assert!(!cache.delete("k"), "Second delete finds nothing");
}

/// Test: an expired entry is removed lazily by the failed read
#[test]
fn test_expired_entry_lazily_removed_on_get() {
    let (clock, cache) = cache_at(1_000);

    cache.set("k", json!(1), 10);
    assert_eq!(cache.len(), 1);

    clock.advance_secs(11);
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.len(), 0, "Expired entry dropped by the read");
}

/// Test: the sweep removes expired entries that were never re-read
#[test]
fn test_sweep_removes_only_expired_entries() {
    let (clock, cache) = cache_at(1_000);

    cache.set("short-a", json!(1), 10);
    cache.set("short-b", json!(2), 15);
    cache.set("long", json!(3), 120);

    clock.advance_secs(20);
    let removed = cache.sweep();

    assert_eq!(removed, 2);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("long"), Some(json!(3)));
}

/// Test: re-setting a key refreshes its expiry
#[test]
fn test_set_refreshes_expiry() {
    let (clock, cache) = cache_at(1_000);

    cache.set("k", json!("old"), 30);
    clock.advance_secs(25);

    cache.set("k", json!("new"), 30);
    clock.advance_secs(20);

    assert_eq!(
        cache.get("k"),
        Some(json!("new")),
        "Expiry measured from the second set"
    );
}

#[test]
fn test_enriched_user_key_shape() {
    let uuid = uuid::Uuid::new_v4();
    assert_eq!(enriched_user_key(&uuid), format!("enriched_{}", uuid));
}
