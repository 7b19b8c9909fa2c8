//! Demonstration of two browsing contexts sharing one storage area

use std::sync::Arc;
use tincan_storage::runtime::SyncRuntime;
use tincan_storage::storage::{MemoryStorage, StorageArea, StorageEvent};
use tincan_storage::{StateOptions, SyncedState};

fn main() {
    env_logger::init();

    let storage = Arc::new(MemoryStorage::new());
    let left = SyncRuntime::with_storage(storage.clone());
    let right = SyncRuntime::with_storage(storage.clone());

    let theme_left = SyncedState::new(
        "theme",
        StateOptions::new()
            .default_value("light".to_string())
            .runtime(left),
    );
    let theme_right = SyncedState::<String>::new("theme", StateOptions::new().runtime(right.clone()));

    let _guard = theme_right.watch(|theme| println!("right sees theme {theme:?}"));

    theme_left.set("dark".to_string());
    println!("left wrote dark, right has not been told yet");

    // The platform forwards the change to every other context.
    let refreshed = right.dispatch_storage_event(&StorageEvent::new("theme", storage.area_id()));
    println!("storage event refreshed {refreshed} key(s)");

    storage.clear();
    right.dispatch_storage_event(&StorageEvent::cleared(storage.area_id()));
    println!("after clear right reads {:?}", theme_right.get());
}
