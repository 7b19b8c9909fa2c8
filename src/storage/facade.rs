use super::area::{AreaId, StorageArea};
use super::fallback::MemoryFallback;
use crate::error::StorageError;
use std::sync::Arc;

/// Uniform get/set/remove over a [`StorageArea`] that never fails loudly.
///
/// All knowledge of how storage can break lives here. Reads from an
/// inaccessible store look like a missing key. Failed writes leave the
/// store untouched and are reported back so the caller can keep the value
/// in the [`MemoryFallback`], which this facade also owns.
#[derive(Clone)]
pub struct StorageFacade {
    area: Arc<dyn StorageArea>,
    fallback: Arc<MemoryFallback>,
}

impl StorageFacade {
    pub fn new(area: Arc<dyn StorageArea>, fallback: Arc<MemoryFallback>) -> Self {
        Self { area, fallback }
    }

    pub fn area_id(&self) -> Option<AreaId> {
        self.area.area_id()
    }

    /// The raw stored string for `key`.
    ///
    /// `None` when there is no entry or when the store cannot be read.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.area.get_item(key) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("reading `{key}` from storage failed: {err}");
                None
            }
        }
    }

    /// Write `raw` through to the store.
    ///
    /// On success any in-memory fallback for `key` is dropped. On failure
    /// the store is left as it was and the error is handed back; nothing is
    /// added to the fallback here.
    ///
    /// The outcome is a `Result` rather than a plain success flag so the
    /// cause can be logged; callers that only need the flag use `.is_ok()`.
    pub fn set(&self, key: &str, raw: &str) -> Result<(), StorageError> {
        match self.area.set_item(key, raw) {
            Ok(()) => {
                self.fallback.remove(key);
                Ok(())
            }
            Err(err) => {
                log::warn!("writing `{key}` to storage failed: {err}");
                Err(err)
            }
        }
    }

    /// Best-effort delete. Does not touch the fallback.
    pub fn remove(&self, key: &str) {
        if let Err(err) = self.area.remove_item(key) {
            log::debug!("removing `{key}` from storage failed: {err}");
        }
    }

    /// Whether `key` currently lives only in memory.
    pub fn has_fallback(&self, key: &str) -> bool {
        self.fallback.contains(key)
    }

    /// The in-memory value for `key`, if it has one of type `V`.
    pub fn recall<V>(&self, key: &str) -> Option<V>
    where
        V: Clone + 'static,
    {
        self.fallback.get(key)
    }

    /// Keep `value` in memory for `key` after a failed write.
    pub fn remember<V>(&self, key: &str, value: V)
    where
        V: Send + Sync + 'static,
    {
        self.fallback.insert(key, value);
    }

    pub fn forget(&self, key: &str) {
        self.fallback.remove(key);
    }
}
