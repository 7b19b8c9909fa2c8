//! Demonstration of a synced todo list surviving storage failures

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tincan_storage::runtime::SyncRuntime;
use tincan_storage::storage::{MemoryStorage, StorageArea};
use tincan_storage::{create_synced_state, StateOptions};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct TodoItem {
    title: String,
    completed: bool,
}

impl TodoItem {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            completed: false,
        }
    }
}

fn print_todos(label: &str, todos: &Option<Vec<TodoItem>>) {
    println!("{label}:");
    for todo in todos.iter().flatten() {
        let mark = if todo.completed { "x" } else { " " };
        println!("  [{mark}] {}", todo.title);
    }
}

fn main() {
    env_logger::init();

    let storage = Arc::new(MemoryStorage::new());
    SyncRuntime::global().set_storage(Some(storage.clone()));

    let (todos, set_todos, extras) = create_synced_state(
        "todos",
        StateOptions::new().default_with(|| vec![TodoItem::new("first"), TodoItem::new("second")]),
    );

    let _guard = todos.watch(|todos| print_todos("Todos changed", &todos));
    println!("Stored: {:?}", storage.get_item("todos"));

    set_todos.update(|todos| {
        if let Some(first) = todos.as_mut().and_then(|todos| todos.first_mut()) {
            first.completed = true;
        }
    });

    println!("\nStorage becomes read-only");
    storage.set_writable(false);
    set_todos.update(|todos| todos.get_or_insert_with(Vec::new).push(TodoItem::new("third")));
    println!("Persistent: {}", extras.is_persistent());
    println!("Stored: {:?}", storage.get_item("todos"));

    println!("\nStorage recovers");
    storage.set_writable(true);
    set_todos.update(|todos| todos.get_or_insert_with(Vec::new).push(TodoItem::new("forth")));
    println!("Persistent: {}", extras.is_persistent());

    println!("\nReset");
    extras.remove();
    println!("Stored: {:?}", storage.get_item("todos"));
}
