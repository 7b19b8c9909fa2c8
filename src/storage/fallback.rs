use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

type Entry = Arc<dyn Any + Send + Sync>;

/// Process-wide in-memory substitute for keys the backing store refused.
///
/// An entry exists for a key only while the last write to it failed. While it
/// exists it is authoritative over whatever the backing store holds.
#[derive(Default)]
pub struct MemoryFallback {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` currently lives only in memory.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// The in-memory value for `key`.
    ///
    /// Returns `None` when there is no entry, or when the entry was stored
    /// with a different value type.
    pub fn get<V>(&self, key: &str) -> Option<V>
    where
        V: Clone + 'static,
    {
        let entry = self.lock().get(key).cloned()?;
        match entry.downcast_ref::<V>() {
            Some(value) => Some(value.clone()),
            None => {
                log::warn!("in-memory value for `{key}` has an unexpected type, ignoring it");
                None
            }
        }
    }

    pub fn insert<V>(&self, key: &str, value: V)
    where
        V: Send + Sync + 'static,
    {
        self.lock().insert(key.to_string(), Arc::new(value));
    }

    pub fn remove(&self, key: &str) {
        self.lock().remove(key);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
