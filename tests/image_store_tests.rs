//! Integration tests for the session image store.

use wharfgate::image_store::ImageStore;

#[test]
fn test_put_and_get() {
    let store = ImageStore::new();
    store.put("verdaccio/verdaccio", "abc123");

    let image = store.get("verdaccio/verdaccio:abc123").unwrap();
    assert_eq!(image.name, "verdaccio/verdaccio");
    assert_eq!(image.tag, "abc123");

    assert!(store.get("verdaccio/verdaccio:other").is_none());
}

#[test]
fn test_put_ignores_empty_fields() {
    let store = ImageStore::new();
    store.put("", "tag");
    store.put("image", "");

    assert!(store.get(":tag").is_none());
    assert!(store.get("image:").is_none());
}

#[test]
fn test_get_extends_active_time() {
    let store = ImageStore::new();
    store.put("image", "tag");

    let first = store.get("image:tag").unwrap();
    let second = store.get("image:tag").unwrap();

    // Each lookup pushes the active time further out.
    assert_eq!(second.active_time, first.active_time + 5);
}

#[test]
fn test_put_refreshes_existing_entry() {
    let store = ImageStore::with_outdated_threshold(-1);
    store.put("image", "tag");

    // A lookup bumped time keeps it warm; re-putting resets to now.
    store.get("image:tag").unwrap();
    store.put("image", "tag");

    let image = store.get("image:tag").unwrap();
    // Reset to now, then +5 from this get.
    assert!(image.active_time <= chrono::Utc::now().timestamp() + 5);
}

#[test]
fn test_garbage_evicts_expired_entries() {
    // Threshold -1: anything is stale the moment it is inserted.
    let store = ImageStore::with_outdated_threshold(-1);
    store.put("stale", "tag");

    let evicted = store.garbage().unwrap();
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].name, "stale");

    assert!(store.get("stale:tag").is_none());
    assert!(store.garbage().unwrap().is_empty());
}

#[test]
fn test_garbage_keeps_fresh_entries() {
    let store = ImageStore::new();
    store.put("fresh", "tag");

    assert!(store.garbage().unwrap().is_empty());
    assert!(store.get("fresh:tag").is_some());
}

#[test]
fn test_get_safety_margin_defers_eviction() {
    let store = ImageStore::with_outdated_threshold(-1);
    store.put("image", "tag");

    // The +5s lookup margin keeps the entry ahead of the sweeper.
    store.get("image:tag").unwrap();
    assert!(store.garbage().unwrap().is_empty());
    assert!(store.get("image:tag").is_some());
}
