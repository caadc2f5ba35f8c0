//! Integration Tests for the Event Store
//!
//! Exercises the public store contract: capture, queries, pagination,
//! search, deletion, bulk clear, notifications and persistence.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use eventviewer::registry::{self, Predefined};
use eventviewer::{
    Event, EventId, EventStore, ParameterSet, ParameterValue, StorageBuilder, StoreNotification,
};
use tempfile::tempdir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Create an in-memory store with a short checkpoint interval.
fn create_test_store() -> EventStore {
    StorageBuilder::in_memory()
        .channel_capacity(100)
        .checkpoint_interval(Duration::from_millis(100))
        .build()
        .expect("Failed to build storage")
}

fn id(s: &str) -> EventId {
    EventId::new(s).expect("valid identifier")
}

fn event(s: &str) -> Event {
    Event::new(id(s), s)
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn record_ids(records: &[eventviewer::EventRecord]) -> Vec<i64> {
    records.iter().map(|r| r.record_id).collect()
}

// =============================================================================
// Existence
// =============================================================================

#[test]
fn test_exists_after_capture() {
    let store = create_test_store();
    for name in ["sign_up", "Login", "view_screen", "ünïcode", "a"] {
        store.capture(event(name), None);
    }
    store.sync().unwrap();

    for name in ["sign_up", "Login", "view_screen", "ünïcode", "a"] {
        assert!(store.exists(&id(name), None), "{name} should exist");
    }
    assert!(!store.exists(&id("login"), None));
    assert!(!store.exists(&id("sign"), None));
}

#[test]
fn test_event_without_parameters_never_matches_filter() {
    let store = create_test_store();
    store.capture(event("logout"), None);
    store.sync().unwrap();

    let filters = [
        ParameterSet::new().with("scene", "x"),
        ParameterSet::new().with("flag", false),
        ParameterSet::new().with("n", 0),
        ParameterSet::new().with("list", Vec::<ParameterValue>::new()),
    ];
    for filter in &filters {
        assert!(!store.exists(&id("logout"), Some(filter)));
        assert!(store.last_timestamp(&id("logout"), Some(filter)).is_none());
    }
    // An empty filter is no filter
    assert!(store.exists(&id("logout"), Some(&ParameterSet::new())));
}

#[test]
fn test_sign_up_scenario() {
    let store = create_test_store();
    store.capture(registry::sign_up(), None);
    store.sync().unwrap();

    let sign_up = Predefined::SignUp.id();
    assert!(store.exists(&sign_up, None));
    let filter = ParameterSet::new().with("scene", "x");
    assert!(!store.exists(&sign_up, Some(&filter)));
}

#[test]
fn test_last_timestamp_picks_latest_match() {
    let store = create_test_store();
    store.capture(registry::present_scene("login"), Some(at(10)));
    store.capture(registry::present_scene("login"), Some(at(30)));
    store.capture(registry::present_scene("home"), Some(at(50)));
    store.capture(registry::present_scene("login"), Some(at(20)));
    store.sync().unwrap();

    let scene = Predefined::PresentScene.id();
    let login = ParameterSet::new().with("scene", "login");
    assert_eq!(store.last_timestamp(&scene, Some(&login)), Some(at(30)));
    assert_eq!(store.last_timestamp(&scene, None), Some(at(50)));
    assert_eq!(store.last_timestamp(&id("login"), None), None);
}

// =============================================================================
// Listing
// =============================================================================

#[test]
fn test_pages_are_disjoint_and_contiguous() {
    let store = create_test_store();
    for i in 0..25 {
        store.capture(event(&format!("event_{i}")), Some(at(i % 7)));
    }
    store.sync().unwrap();

    let n = 10;
    let first = store.list(n, 0, None);
    let second = store.list(n, n, None);
    let all = store.list(0, 0, None);

    assert_eq!(first.len(), n);
    assert_eq!(second.len(), n);
    assert_eq!(all.len(), 25);

    let mut concatenated = record_ids(&first);
    concatenated.extend(record_ids(&second));
    assert_eq!(concatenated, record_ids(&all[..2 * n]));
}

#[test]
fn test_pagination_until_empty_page() {
    let store = create_test_store();
    for i in 0..7 {
        store.capture(event("view_screen"), Some(at(i)));
    }
    store.sync().unwrap();

    let mut offset = 0;
    let mut seen = Vec::new();
    loop {
        let page = store.list(3, offset, None);
        if page.is_empty() {
            break;
        }
        offset += page.len();
        seen.extend(record_ids(&page));
    }
    assert_eq!(seen, record_ids(&store.list(0, 0, None)));
    assert_eq!(seen.len(), 7);
}

#[test]
fn test_list_is_sorted_most_recent_first() {
    let store = create_test_store();
    for secs in [5, 1, 9, 3, 9, 0, 7, 3] {
        store.capture(event("tick"), Some(at(secs)));
    }
    store.sync().unwrap();

    let records = store.list(0, 0, None);
    assert_eq!(records.len(), 8);
    for pair in records.windows(2) {
        assert!(pair[0].created_at >= pair[1].created_at);
        if pair[0].created_at == pair[1].created_at {
            // Later insertion first on equal timestamps
            assert!(pair[0].record_id > pair[1].record_id);
        }
    }
}

#[test]
fn test_search_substring() {
    let store = create_test_store();
    store.capture(event("a"), Some(at(1)));
    store.capture(event("bb"), Some(at(2)));
    store.capture(event("abc"), Some(at(3)));
    store.sync().unwrap();

    let found = store.list(0, 0, Some("b"));
    let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["abc", "bb"]);

    // Blank search means no filter
    assert_eq!(store.list(0, 0, Some("  ")).len(), 3);
    assert!(store.list(0, 0, Some("z")).is_empty());
}

#[test]
fn test_search_keeps_surrounding_whitespace() {
    let store = create_test_store();
    store.capture(event("abc"), Some(at(1)));
    store.capture(event("a b"), Some(at(2)));
    store.sync().unwrap();

    let found = store.list(0, 0, Some("a "));
    let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["a b"]);
}

#[test]
fn test_search_ignores_case_and_diacritics() {
    let store = create_test_store();
    store.capture(event("Café_Visit"), Some(at(1)));
    store.capture(event("checkout"), Some(at(2)));
    store.sync().unwrap();

    for needle in ["cafe", "CAFÉ", "visit", "é_v"] {
        let found = store.list(0, 0, Some(needle));
        assert_eq!(found.len(), 1, "needle {needle}");
        assert_eq!(found[0].id.as_str(), "Café_Visit");
    }

    let paged = store.list(1, 1, Some("c"));
    assert_eq!(paged.len(), 1);
    assert_eq!(paged[0].id.as_str(), "Café_Visit");
}

#[test]
fn test_parameter_round_trip() {
    let store = create_test_store();
    let params = ParameterSet::from_json_str(r#"{"scene": "login"}"#).unwrap();
    store.capture(event("present_scene").with_parameters(params), None);
    store.sync().unwrap();

    let records = store.list(0, 0, None);
    assert_eq!(records.len(), 1);
    let scene = records[0].parameter("scene").unwrap();
    assert_eq!(scene.as_str(), Some("login"));
    assert_eq!(records[0].name, "present_scene");
}

#[test]
fn test_all_value_variants_round_trip() {
    let store = create_test_store();
    let params = ParameterSet::from_json_str(
        r#"{"s": "text", "b": true, "i": -42, "arr": [1, "two", false, [3]]}"#,
    )
    .unwrap();
    store.capture(event("mixed").with_parameters(params.clone()), None);
    store.sync().unwrap();

    let record = store.list(1, 0, None).remove(0);
    assert_eq!(record.parameter_set(), params);
    assert!(store.exists(&id("mixed"), Some(&params)));
}

// =============================================================================
// Mutation
// =============================================================================

#[test]
fn test_delete_decrements_count() {
    let store = create_test_store();
    for i in 0..4 {
        store.capture(event("login").with_parameter("attempt", i), None);
    }
    store.sync().unwrap();
    assert_eq!(store.count(), 4);

    let victim = store.list(0, 0, None).remove(1);
    assert!(store.delete(&victim));
    assert_eq!(store.count(), 3);
    assert!(
        store
            .list(0, 0, None)
            .iter()
            .all(|r| r.record_id != victim.record_id)
    );

    // Already gone
    assert!(!store.delete(&victim));
    assert_eq!(store.count(), 3);
}

#[test]
fn test_clear_empties_store() {
    let store = create_test_store();
    for i in 0..10 {
        store.capture(event(&format!("e{i}")).with_parameter("i", i), None);
    }
    store.clear().wait().unwrap();

    assert_eq!(store.count(), 0);
    assert!(store.list(0, 0, None).is_empty());

    // Usable after clear
    store.capture(event("after"), None);
    store.sync().unwrap();
    assert_eq!(store.count(), 1);
}

#[test]
fn test_clear_completion_is_polled_by_caller() {
    let store = create_test_store();
    store.capture(event("before"), None);

    let pending = store.clear();
    let result = pending
        .wait_timeout(Duration::from_secs(5))
        .expect("clear should finish");
    assert!(result.is_ok());
    assert_eq!(store.count(), 0);

    // Dropping the handle is allowed; the clear still runs
    store.capture(event("again"), None);
    drop(store.clear());
    store.sync().unwrap();
    assert_eq!(store.count(), 0);
}

// =============================================================================
// Notifications
// =============================================================================

#[test]
fn test_only_capture_notifies() {
    let store = create_test_store();
    let sub = store.subscribe();

    store.capture(event("login"), None);
    let note = sub
        .recv_timeout(Duration::from_secs(5))
        .expect("capture notification");
    let StoreNotification::Captured {
        record_id,
        event_id,
    } = note;
    assert_eq!(event_id.as_str(), "login");

    let record = store.get(record_id).expect("notified record exists");
    assert!(store.delete(&record));
    store.clear().wait().unwrap();
    store.sync().unwrap();
    assert!(sub.try_recv().is_none());
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let store = create_test_store();
    let kept = store.subscribe();
    let dropped = store.subscribe();
    dropped.unsubscribe();

    store.capture(event("logout"), None);
    store.sync().unwrap();
    assert_eq!(kept.drain().len(), 1);
}

#[test]
fn test_concurrent_captures_are_all_persisted() {
    let store = Arc::new(create_test_store());
    let sub = store.subscribe();

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..25 {
                    store.capture(event(&format!("worker_{w}")).with_parameter("i", i), None);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    store.sync().unwrap();

    assert_eq!(store.count(), 100);
    assert_eq!(sub.drain().len(), 100);
    for w in 0..4 {
        let filter = ParameterSet::new().with("i", 24);
        assert!(store.exists(&id(&format!("worker_{w}")), Some(&filter)));
    }
}

#[test]
fn test_list_during_concurrent_captures_keeps_parameters() {
    let store = Arc::new(create_test_store());
    for i in 0..20 {
        store.capture(event("seed").with_parameter("k", i), None);
    }
    store.sync().unwrap();

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..500 {
                store.capture(event("live").with_parameter("k", i), None);
            }
        })
    };

    let mut pages = 0;
    while !writer.is_finished() || pages < 50 {
        for record in store.list(10, 0, None) {
            assert!(
                record.parameter("k").is_some(),
                "record {} ({}) listed without its parameters",
                record.record_id,
                record.id
            );
        }
        pages += 1;
    }
    writer.join().unwrap();
    store.sync().unwrap();

    assert_eq!(store.count(), 520);
    assert!(store.list(0, 0, None).iter().all(|r| !r.parameters.is_empty()));
}

#[test]
fn test_single_thread_captures_commit_in_order() {
    let store = create_test_store();
    let sub = store.subscribe();
    let same = at(0);
    for i in 0..10 {
        store.capture(event(&format!("step_{i}")), Some(same));
    }
    store.sync().unwrap();

    let notified: Vec<String> = sub
        .drain()
        .into_iter()
        .map(|StoreNotification::Captured { event_id, .. }| event_id.to_string())
        .collect();
    let expected: Vec<String> = (0..10).map(|i| format!("step_{i}")).collect();
    assert_eq!(notified, expected);

    // Equal timestamps list latest insertion first
    let listed: Vec<String> = store
        .list(0, 0, None)
        .into_iter()
        .map(|r| r.id.to_string())
        .collect();
    let reversed: Vec<String> = expected.into_iter().rev().collect();
    assert_eq!(listed, reversed);
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("events.db");

    {
        let store = EventStore::open(&db_path).unwrap();
        store.capture(registry::present_scene("login"), Some(at(1)));
        store.capture(registry::logout(), Some(at(2)));
        store.shutdown().unwrap();
    }

    let store = EventStore::open(&db_path).unwrap();
    assert_eq!(store.count(), 2);
    let records = store.list(0, 0, None);
    assert_eq!(records[0].id.as_str(), "logout");
    assert_eq!(records[0].name, "Logout");
    assert_eq!(records[1].created_at, at(1));
    let login = ParameterSet::new().with("scene", "login");
    assert!(store.exists(&Predefined::PresentScene.id(), Some(&login)));

    // Record ids keep increasing across sessions
    store.capture(registry::login(), None);
    store.sync().unwrap();
    let newest = store.list(1, 0, None).remove(0);
    assert!(newest.record_id > records[0].record_id);
}
