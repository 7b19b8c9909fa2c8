use super::area::{AreaId, StorageArea};
use crate::error::{StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Default quota, in UTF-16 code units, matching common browser limits.
pub const DEFAULT_QUOTA: usize = 5 * 1024 * 1024;

/// An in-process [`StorageArea`].
///
/// Behaves like a browser storage object: string keys and values, a quota
/// counted in UTF-16 code units over all keys and values, and the ability
/// to become unreadable or read-only the way restricted browsing modes do.
///
/// # Examples
///
/// ```
/// use tincan_storage::storage::{MemoryStorage, StorageArea};
///
/// let storage = MemoryStorage::new();
/// storage.set_item("theme", "\"dark\"").unwrap();
/// assert_eq!(storage.get_item("theme").unwrap().as_deref(), Some("\"dark\""));
///
/// storage.set_writable(false);
/// assert!(storage.set_item("theme", "\"light\"").is_err());
/// ```
pub struct MemoryStorage {
    id: AreaId,
    items: Mutex<HashMap<String, String>>,
    quota: usize,
    readable: AtomicBool,
    writable: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }

    /// Create an area that rejects writes once keys and values together
    /// exceed `quota` UTF-16 code units.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            id: AreaId::unique(),
            items: Mutex::new(HashMap::new()),
            quota,
            readable: AtomicBool::new(true),
            writable: AtomicBool::new(true),
        }
    }

    /// Make every access fail with [`StorageError::Unavailable`], or restore it.
    pub fn set_readable(&self, readable: bool) {
        self.readable.store(readable, Ordering::SeqCst);
    }

    /// Make writes fail with [`StorageError::Rejected`], or restore them.
    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Units currently used by keys and values.
    pub fn usage(&self) -> usize {
        self.lock()
            .iter()
            .map(|(key, value)| units(key) + units(value))
            .sum()
    }

    fn check_readable(&self) -> StorageResult<()> {
        if self.readable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageArea for MemoryStorage {
    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.check_readable()?;
        Ok(self.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.check_readable()?;
        if !self.writable.load(Ordering::SeqCst) {
            return Err(StorageError::Rejected(format!(
                "writes to `{key}` are not permitted"
            )));
        }

        let mut items = self.lock();
        let others: usize = items
            .iter()
            .filter(|(existing, _)| existing.as_str() != key)
            .map(|(key, value)| units(key) + units(value))
            .sum();
        let needed = others + units(key) + units(value);
        if needed > self.quota {
            return Err(StorageError::QuotaExceeded {
                key: key.to_string(),
                needed,
                quota: self.quota,
            });
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.check_readable()?;
        self.lock().remove(key);
        Ok(())
    }

    fn area_id(&self) -> Option<AreaId> {
        Some(self.id)
    }
}

fn units(text: &str) -> usize {
    text.encode_utf16().count()
}
