//! Integration tests for Tincan Storage

use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};
use tincan_storage::runtime::SyncRuntime;
use tincan_storage::storage::{MemoryStorage, StorageArea, StorageEvent};
use tincan_storage::{create_synced_state, SerializeError, Serializer, StateOptions, SyncedState};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (Arc<MemoryStorage>, Arc<SyncRuntime>) {
    init_logging();
    let storage = Arc::new(MemoryStorage::new());
    let runtime = SyncRuntime::with_storage(storage.clone());
    (storage, runtime)
}

fn todos(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn stored(storage: &MemoryStorage, key: &str) -> Option<String> {
    storage.get_item(key).unwrap()
}

#[test]
fn todos_scenario() {
    let (storage, runtime) = setup();

    let (value, set_value, extras) = create_synced_state(
        "todos",
        StateOptions::new()
            .default_value(todos(&["first", "second"]))
            .runtime(runtime),
    );

    assert_eq!(value.get(), Some(todos(&["first", "second"])));
    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["first","second"]"#));

    set_value.set(todos(&["third", "forth"]));
    assert_eq!(value.get(), Some(todos(&["third", "forth"])));
    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["third","forth"]"#));

    extras.remove();
    assert_eq!(value.get(), Some(todos(&["first", "second"])));
    assert_eq!(stored(&storage, "todos"), None);
}

#[test]
fn default_is_seeded_once() {
    let (storage, runtime) = setup();

    let _first = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["a"])).runtime(runtime.clone()),
    );
    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["a"]"#));

    let second = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["b"])).runtime(runtime),
    );
    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["a"]"#));
    assert_eq!(second.get(), Some(todos(&["a"])));
}

#[test]
fn default_never_overwrites_existing_value() {
    let (storage, runtime) = setup();
    storage.set_item("todos", r#"["x"]"#).unwrap();

    let state = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime),
    );

    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["x"]"#));
    assert_eq!(state.get(), Some(todos(&["x"])));
}

#[test]
fn written_values_read_back() {
    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        font_size: u32,
        tags: Vec<String>,
    }

    let (_storage, runtime) = setup();
    let state = SyncedState::<Settings>::new("settings", StateOptions::new().runtime(runtime));

    let settings = Settings {
        theme: "dark".to_string(),
        font_size: 14,
        tags: todos(&["undefined", ""]),
    };
    state.set(settings.clone());
    assert_eq!(state.get(), Some(settings));

    let (_storage, runtime) = setup();
    let words = SyncedState::<String>::new("word", StateOptions::new().runtime(runtime));
    words.set("undefined".to_string());
    assert_eq!(words.get().as_deref(), Some("undefined"));
}

#[test]
fn writes_propagate_to_other_call_sites() {
    let (_storage, runtime) = setup();
    let a = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(runtime.clone()));
    let b = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(runtime));

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    let _guard = b.watch(move |value| *seen_clone.lock().unwrap() = value);

    a.set(todos(&["shared"]));

    assert_eq!(*seen.lock().unwrap(), Some(todos(&["shared"])));
    assert_eq!(b.get(), Some(todos(&["shared"])));
}

#[test]
fn failed_writes_fall_back_to_memory() {
    let (storage, runtime) = setup();
    let state = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["a"])).runtime(runtime.clone()),
    );
    let other = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(runtime));
    assert!(state.is_persistent());

    storage.set_writable(false);
    state.set(todos(&["memory"]));

    assert_eq!(state.get(), Some(todos(&["memory"])));
    assert_eq!(other.get(), Some(todos(&["memory"])));
    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["a"]"#));
    assert!(!state.is_persistent());

    storage.set_writable(true);
    state.set(todos(&["disk"]));

    assert!(state.is_persistent());
    assert_eq!(state.get(), Some(todos(&["disk"])));
    assert_eq!(stored(&storage, "todos").as_deref(), Some(r#"["disk"]"#));
}

#[test]
fn memory_value_equal_to_default_counts_as_persistent() {
    let (storage, runtime) = setup();
    let state = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["a"])).runtime(runtime),
    );

    storage.set_writable(false);
    state.set(todos(&["a"]));
    assert!(state.is_persistent());
}

#[test]
fn quota_exceeded_falls_back_to_memory() {
    init_logging();
    let storage = Arc::new(MemoryStorage::with_quota(16));
    let runtime = SyncRuntime::with_storage(storage.clone());
    let state = SyncedState::<String>::new("note", StateOptions::new().runtime(runtime));

    state.set("x".repeat(64));
    assert_eq!(state.get(), Some("x".repeat(64)));
    assert!(!state.is_persistent());
    assert_eq!(stored(&storage, "note"), None);
}

#[test]
fn remove_resets_every_call_site() {
    let (storage, runtime) = setup();
    let a = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["a"])).runtime(runtime.clone()),
    );
    let b = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["a"])).runtime(runtime),
    );

    a.set(todos(&["changed"]));
    storage.set_writable(false);
    b.set(todos(&["memory"]));
    storage.set_writable(true);
    assert!(!a.is_persistent());

    b.remove();

    assert_eq!(a.get(), Some(todos(&["a"])));
    assert_eq!(b.get(), Some(todos(&["a"])));
    assert_eq!(stored(&storage, "todos"), None);
    assert!(a.is_persistent());
}

#[test]
fn malformed_stored_data_yields_default() {
    let (storage, runtime) = setup();
    storage.set_item("todos", "[\"unterminated").unwrap();

    let state = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime),
    );

    assert_eq!(state.get(), Some(todos(&["d"])));
    // Unreadable data is left alone, not replaced by the default.
    assert_eq!(stored(&storage, "todos").as_deref(), Some("[\"unterminated"));
}

#[test]
fn absent_default_writes_nothing() {
    let (storage, runtime) = setup();
    let state = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(runtime));

    assert_eq!(state.get(), None);
    assert!(storage.is_empty());
    assert!(state.is_persistent());
}

#[test]
fn unreadable_storage_behaves_like_missing_key() {
    let (storage, runtime) = setup();
    storage.set_item("todos", r#"["x"]"#).unwrap();
    storage.set_readable(false);

    let state = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime),
    );
    assert_eq!(state.get(), Some(todos(&["d"])));

    state.set(todos(&["y"]));
    assert_eq!(state.get(), Some(todos(&["y"])));
    assert!(!state.is_persistent());
}

#[test]
fn other_contexts_pick_up_changes_through_storage_events() {
    init_logging();
    // Two browsing contexts sharing one storage area.
    let storage = Arc::new(MemoryStorage::new());
    let tab_a = SyncRuntime::with_storage(storage.clone());
    let tab_b = SyncRuntime::with_storage(storage.clone());

    let a = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(tab_a));
    let b = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(tab_b.clone()));

    let notified = Arc::new(AtomicUsize::new(0));
    let notified_clone = notified.clone();
    let _guard = b.watch(move |_| {
        notified_clone.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    a.set(todos(&["from a"]));
    assert_eq!(notified.load(Ordering::SeqCst), 1);

    // The platform delivers the change to the other context.
    tab_b.dispatch_storage_event(&StorageEvent::new("todos", storage.area_id()));
    assert_eq!(notified.load(Ordering::SeqCst), 2);
    assert_eq!(b.get(), Some(todos(&["from a"])));

    // Events from a different area are ignored.
    let unrelated = MemoryStorage::new();
    assert_eq!(
        tab_b.dispatch_storage_event(&StorageEvent::new("todos", unrelated.area_id())),
        0
    );
}

#[test]
fn batched_writes_notify_once() {
    let (_storage, runtime) = setup();
    let a = SyncedState::new("count", StateOptions::new().default_value(0).runtime(runtime.clone()));
    let b = SyncedState::<i32>::new("count", StateOptions::new().runtime(runtime.clone()));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _guard = b.watch(move |value| seen_clone.lock().unwrap().push(value));

    runtime.batch(|| {
        a.set(1);
        a.update(|n| *n = n.map(|n| n + 1));
        a.update(|n| *n = n.map(|n| n + 1));
    });

    assert_eq!(*seen.lock().unwrap(), vec![Some(0), Some(3)]);
}

#[test]
fn scoped_runtime_supplies_the_defaults() {
    init_logging();
    SyncRuntime::scope(|| {
        let storage = Arc::new(MemoryStorage::new());
        SyncRuntime::current().set_storage(Some(storage.clone()));

        let (value, _, _) = create_synced_state("flag", StateOptions::new().default_value(true));
        assert_eq!(value.get(), Some(true));
        assert_eq!(stored(&storage, "flag").as_deref(), Some("true"));
    });
}

#[test]
fn custom_serializer() {
    struct Csv;

    impl Serializer<Vec<u32>> for Csv {
        fn stringify(&self, value: &Option<Vec<u32>>) -> Result<String, SerializeError> {
            Ok(match value {
                Some(items) => items.iter().map(u32::to_string).collect::<Vec<_>>().join(","),
                None => "-".to_string(),
            })
        }

        fn parse(&self, raw: &str) -> Result<Option<Vec<u32>>, SerializeError> {
            if raw == "-" {
                return Ok(None);
            }
            raw.split(',')
                .map(|part| part.parse().map_err(|_| SerializeError::Invalid(raw.to_string())))
                .collect::<Result<Vec<_>, _>>()
                .map(Some)
        }
    }

    let (storage, runtime) = setup();
    let state = SyncedState::new(
        "ids",
        StateOptions::with_serializer(Csv).default_value(vec![1, 2]).runtime(runtime),
    );
    assert_eq!(stored(&storage, "ids").as_deref(), Some("1,2"));

    state.set(vec![3, 4, 5]);
    assert_eq!(stored(&storage, "ids").as_deref(), Some("3,4,5"));

    storage.set_item("ids", "3,x").unwrap();
    assert_eq!(state.get(), Some(vec![1, 2]));
}

#[test]
fn removing_a_pre_existing_value_leaves_the_key_empty() {
    let (storage, runtime) = setup();
    storage.set_item("todos", r#"["x"]"#).unwrap();

    let state = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime.clone()),
    );
    let other = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime),
    );
    assert_eq!(state.get(), Some(todos(&["x"])));

    state.remove();

    assert_eq!(stored(&storage, "todos"), None);
    assert_eq!(state.get(), Some(todos(&["d"])));
    assert_eq!(other.get(), Some(todos(&["d"])));
    assert_eq!(stored(&storage, "todos"), None);
}

#[test]
fn removal_seen_through_a_storage_event_does_not_reseed() {
    init_logging();
    let storage = Arc::new(MemoryStorage::new());
    let tab_a = SyncRuntime::with_storage(storage.clone());
    let tab_b = SyncRuntime::with_storage(storage.clone());

    let a = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(tab_a));
    a.set(todos(&["from a"]));
    let b = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(tab_b.clone()),
    );
    assert_eq!(b.get(), Some(todos(&["from a"])));

    a.remove();
    tab_b.dispatch_storage_event(&StorageEvent::new("todos", storage.area_id()));

    assert_eq!(b.get(), Some(todos(&["d"])));
    assert_eq!(stored(&storage, "todos"), None);
}

#[test]
fn areas_are_seeded_and_fall_back_independently() {
    let (storage_a, runtime) = setup();
    let storage_b = Arc::new(MemoryStorage::new());

    let on_a = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime.clone()),
    );
    let on_b = SyncedState::new(
        "todos",
        StateOptions::new()
            .default_value(todos(&["d"]))
            .storage(storage_b.clone())
            .runtime(runtime),
    );
    assert_eq!(stored(&storage_a, "todos").as_deref(), Some(r#"["d"]"#));
    assert_eq!(stored(&storage_b, "todos").as_deref(), Some(r#"["d"]"#));

    let notified = Arc::new(AtomicUsize::new(0));
    let notified_clone = notified.clone();
    let _guard = on_b.watch(move |_| {
        notified_clone.fetch_add(1, Ordering::SeqCst);
    });

    storage_a.set_writable(false);
    on_a.set(todos(&["memory"]));

    assert_eq!(on_a.get(), Some(todos(&["memory"])));
    assert!(!on_a.is_persistent());
    assert_eq!(on_b.get(), Some(todos(&["d"])));
    assert!(on_b.is_persistent());
    assert_eq!(notified.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_seed_is_not_retried() {
    let (storage, runtime) = setup();
    storage.set_writable(false);

    let first = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime.clone()),
    );
    assert_eq!(first.get(), Some(todos(&["d"])));
    assert!(first.is_persistent());

    storage.set_writable(true);
    let second = SyncedState::new(
        "todos",
        StateOptions::new().default_value(todos(&["d"])).runtime(runtime.clone()),
    );
    assert_eq!(second.get(), Some(todos(&["d"])));
    assert!(storage.is_empty());
    assert!(!runtime.fallback(storage.area_id()).contains("todos"));
}

#[test]
fn unsynced_call_site_refreshes_through_a_synced_sibling() {
    let (storage, runtime) = setup();
    let _synced = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(runtime.clone()));
    let unsynced = SyncedState::<Vec<String>>::new(
        "todos",
        StateOptions::new().storage_sync(false).runtime(runtime.clone()),
    );
    assert_eq!(unsynced.get(), None);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _guard = unsynced.watch(move |value| seen_clone.lock().unwrap().push(value));

    // Another context writes behind this one's back.
    storage.set_item("todos", r#"["elsewhere"]"#).unwrap();
    assert_eq!(runtime.dispatch_storage_event(&StorageEvent::new("todos", storage.area_id())), 1);

    assert_eq!(*seen.lock().unwrap(), vec![None, Some(todos(&["elsewhere"]))]);
}
