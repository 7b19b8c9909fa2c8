use crate::error::StorageResult;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of a storage area.
///
/// Used to tell whether a cross-context [`StorageEvent`] concerns the area a
/// call site reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaId(u64);

impl AreaId {
    /// Allocate an identity no other area in this process has.
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        AreaId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The backing key/value store.
///
/// Mirrors the Web Storage surface. Any method may fail for platform
/// reasons; callers go through [`StorageFacade`](super::StorageFacade),
/// which never lets those failures escape.
pub trait StorageArea: Send + Sync {
    /// The stored string for `key`, or `None` if there is no entry.
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous entry.
    fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete the entry for `key`. Deleting a missing key is not an error.
    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// Identity of this area, if the platform can tell areas apart.
    fn area_id(&self) -> Option<AreaId> {
        None
    }
}

/// Notification that another execution context changed a storage area.
///
/// The platform delivers these to every context sharing the area except the
/// one that wrote. Hosts forward them to
/// [`SyncRuntime::dispatch_storage_event`](crate::runtime::SyncRuntime::dispatch_storage_event).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Changed key. `None` means the whole area was cleared.
    pub key: Option<String>,
    /// Area that changed, if known.
    pub area: Option<AreaId>,
}

impl StorageEvent {
    pub fn new(key: impl Into<String>, area: Option<AreaId>) -> Self {
        Self {
            key: Some(key.into()),
            area,
        }
    }

    /// The event a platform sends after an area is cleared.
    pub fn cleared(area: Option<AreaId>) -> Self {
        Self { key: None, area }
    }

    /// Whether this event concerns an area with identity `area`.
    ///
    /// When either side carries no identity the check is relaxed and any
    /// area matches.
    pub fn concerns_area(&self, area: Option<AreaId>) -> bool {
        match (self.area, area) {
            (Some(event_area), Some(area)) => event_area == area,
            _ => true,
        }
    }

    /// Whether this event concerns `key` of area `area`.
    pub fn concerns(&self, key: &str, area: Option<AreaId>) -> bool {
        let key_matches = match &self.key {
            Some(changed) => changed == key,
            None => true,
        };
        key_matches && self.concerns_area(area)
    }
}
