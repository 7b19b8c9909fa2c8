use super::options::{StateOptions, StorageChoice};
use crate::runtime::{Subscription, SyncRuntime};
use crate::serializer::Serializer;
use crate::storage::StorageFacade;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Watcher<T> = Arc<dyn Fn(Option<T>) + Send + Sync>;
type Watchers<T> = Mutex<Vec<(usize, Watcher<T>)>>;

/// Last raw item seen for the key and the value parsed from it.
struct Snapshot<T> {
    raw: Option<String>,
    value: Option<T>,
    // The value came from the in-memory fallback, not from `raw`.
    from_fallback: bool,
}

struct Backend<T> {
    facade: StorageFacade,
    serializer: Arc<dyn Serializer<T>>,
    runtime: Arc<SyncRuntime>,
}

struct Inner<T> {
    key: String,
    default: Option<T>,
    // `None` when there is no backing store: the state is a constant.
    backend: Option<Backend<T>>,
    // `None` until the first read.
    snapshot: Mutex<Option<Snapshot<T>>>,
    watchers: Arc<Watchers<T>>,
    next_watcher: AtomicUsize,
    // A write already refreshed the snapshot; watchers hear of it on publish.
    unnotified: AtomicBool,
    _subscription: Option<Subscription>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T> Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Bring the snapshot in line with the store. Returns whether the value
    /// changed.
    fn refresh(&self, backend: &Backend<T>) -> bool {
        let raw = backend.facade.get(&self.key);
        let mut snapshot = lock(&self.snapshot);

        if let Some(value) = backend.facade.recall::<Option<T>>(&self.key) {
            let changed = snapshot.as_ref().map_or(true, |s| s.value != value);
            *snapshot = Some(Snapshot {
                raw,
                value,
                from_fallback: true,
            });
            return changed;
        }

        let stale = snapshot
            .as_ref()
            .map_or(true, |s| s.from_fallback || s.raw != raw);
        if !stale {
            return false;
        }
        let value = match raw.as_deref() {
            Some(text) => self.parse(backend, text),
            None => self.default.clone(),
        };
        let changed = snapshot.as_ref().map_or(true, |s| s.value != value);
        *snapshot = Some(Snapshot {
            raw,
            value,
            from_fallback: false,
        });
        changed
    }

    /// Write the default when nothing is stored for the key yet.
    ///
    /// Only done when a call site is activated, and at most once per key and
    /// area for a runtime: a later removal leaves the key empty.
    fn activate(&self, backend: &Backend<T>) {
        self.refresh(backend);
        let mut snapshot = lock(&self.snapshot);
        let empty = snapshot.as_ref().map_or(true, |s| s.raw.is_none());
        if empty
            && self.default.is_some()
            && !backend.facade.has_fallback(&self.key)
            && backend.runtime.claim_seed(backend.facade.area_id(), &self.key)
        {
            self.seed(backend, snapshot.as_mut());
        }
    }

    fn parse(&self, backend: &Backend<T>, text: &str) -> Option<T> {
        match backend.serializer.parse(text) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("stored value for `{}` is unreadable, using the default: {err}", self.key);
                self.default.clone()
            }
        }
    }

    fn seed(&self, backend: &Backend<T>, snapshot: Option<&mut Snapshot<T>>) {
        let text = match backend.serializer.stringify(&self.default) {
            Ok(text) => text,
            Err(err) => {
                log::warn!("default for `{}` cannot be stored: {err}", self.key);
                return;
            }
        };
        if backend.facade.set(&self.key, &text).is_ok() {
            log::trace!("seeded `{}` with its default", self.key);
            if let Some(snapshot) = snapshot {
                snapshot.raw = Some(text);
            }
        }
    }

    fn read(&self) -> Option<T> {
        match &self.backend {
            Some(backend) => {
                self.refresh(backend);
                lock(&self.snapshot)
                    .as_ref()
                    .map_or_else(|| self.default.clone(), |s| s.value.clone())
            }
            None => self.default.clone(),
        }
    }

    fn cached(&self) -> Option<T> {
        lock(&self.snapshot)
            .as_ref()
            .map_or_else(|| self.default.clone(), |s| s.value.clone())
    }

    fn write(&self, value: Option<T>) {
        let Some(backend) = &self.backend else {
            log::trace!("no storage, ignoring write to `{}`", self.key);
            return;
        };

        let persisted = match backend.serializer.stringify(&value) {
            Ok(text) => backend.facade.set(&self.key, &text).is_ok(),
            Err(err) => {
                log::warn!("value for `{}` cannot be stored: {err}", self.key);
                false
            }
        };
        if !persisted {
            log::warn!("keeping `{}` in memory only", self.key);
            backend.facade.remember(&self.key, value);
        }

        if self.refresh(backend) {
            self.unnotified.store(true, Ordering::SeqCst);
        }
        backend.runtime.publish_area(backend.facade.area_id(), &self.key);
    }

    fn remove(&self) {
        let Some(backend) = &self.backend else {
            log::trace!("no storage, ignoring removal of `{}`", self.key);
            return;
        };
        backend.facade.remove(&self.key);
        backend.facade.forget(&self.key);
        backend.runtime.publish_area(backend.facade.area_id(), &self.key);
    }

    fn is_persistent(&self) -> bool {
        let Some(backend) = &self.backend else {
            return true;
        };
        self.read() == self.default || !backend.facade.has_fallback(&self.key)
    }

    /// Called by the hub whenever the key is published.
    fn invalidate(&self) {
        let Some(backend) = &self.backend else {
            return;
        };
        let changed = self.refresh(backend);
        if self.unnotified.swap(false, Ordering::SeqCst) || changed {
            self.notify(self.cached());
        }
    }

    fn notify(&self, value: Option<T>) {
        let watchers: Vec<Watcher<T>> = lock(&self.watchers)
            .iter()
            .map(|(_, watcher)| Arc::clone(watcher))
            .collect();
        for watcher in watchers {
            watcher(value.clone());
        }
    }
}

/// One call site's view of a storage key.
///
/// Reads go through the backing store and are cached. Writes go to the
/// store (or to the runtime's in-memory fallback when the store refuses
/// them) and are then published to every other call site of the same key.
/// Cloning a `SyncedState` gives another handle to the same call site; the
/// call site stays registered until its last handle is dropped.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tincan_storage::runtime::SyncRuntime;
/// use tincan_storage::storage::{MemoryStorage, StorageArea};
/// use tincan_storage::{StateOptions, SyncedState};
///
/// let storage = Arc::new(MemoryStorage::new());
/// let runtime = SyncRuntime::with_storage(storage.clone());
///
/// let todos = SyncedState::new(
///     "todos",
///     StateOptions::new()
///         .default_value(vec!["first".to_string()])
///         .runtime(runtime.clone()),
/// );
/// assert_eq!(storage.get_item("todos").unwrap().as_deref(), Some(r#"["first"]"#));
///
/// let other = SyncedState::<Vec<String>>::new("todos", StateOptions::new().runtime(runtime));
/// todos.set(vec!["second".to_string()]);
/// assert_eq!(other.get(), Some(vec!["second".to_string()]));
/// ```
pub struct SyncedState<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SyncedState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> SyncedState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Activate a call site for `key`.
    ///
    /// The value is read right away. If nothing is stored yet and a default
    /// is configured, the default is written to the store, once per key,
    /// area and runtime, and never over an existing entry. Later reads never
    /// seed, so a removed key stays empty.
    pub fn new(key: impl Into<String>, options: StateOptions<T>) -> Self {
        let key = key.into();
        let StateOptions {
            default,
            storage_sync,
            serializer,
            storage,
            runtime,
        } = options;

        let runtime = runtime.unwrap_or_else(SyncRuntime::current);
        let default = default.resolve();
        let store = match storage {
            StorageChoice::Runtime => runtime.storage(),
            StorageChoice::Area(area) => Some(area),
            StorageChoice::Disabled => None,
        };

        let Some(store) = store else {
            log::debug!("no storage available, `{key}` is fixed to its default");
            return Self {
                inner: Arc::new(Inner {
                    key,
                    default,
                    backend: None,
                    snapshot: Mutex::new(None),
                    watchers: Arc::new(Mutex::new(Vec::new())),
                    next_watcher: AtomicUsize::new(0),
                    unnotified: AtomicBool::new(false),
                    _subscription: None,
                }),
            };
        };

        let area_id = store.area_id();
        let facade = StorageFacade::new(store, runtime.fallback(area_id));

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<T>>| {
            let weak = weak.clone();
            let on_publish = move || {
                if let Some(inner) = weak.upgrade() {
                    inner.invalidate();
                }
            };
            let subscription = runtime.subscribe_area(&key, area_id, storage_sync, on_publish);

            Inner {
                key,
                default,
                backend: Some(Backend {
                    facade,
                    serializer,
                    runtime: Arc::clone(&runtime),
                }),
                snapshot: Mutex::new(None),
                watchers: Arc::new(Mutex::new(Vec::new())),
                next_watcher: AtomicUsize::new(0),
                unnotified: AtomicBool::new(false),
                _subscription: Some(subscription),
            }
        });

        if let Some(backend) = &inner.backend {
            inner.activate(backend);
        }
        Self { inner }
    }

    /// The key this state is bound to.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// The current value, or `None` when there is neither a stored value
    /// nor a default.
    pub fn get(&self) -> Option<T> {
        self.inner.read()
    }

    /// Read the current value with a function without cloning.
    ///
    /// `f` must not access this same call site.
    pub fn with<R>(&self, f: impl FnOnce(&Option<T>) -> R) -> R {
        let inner = &self.inner;
        match &inner.backend {
            Some(backend) => {
                inner.refresh(backend);
                let snapshot = lock(&inner.snapshot);
                match snapshot.as_ref() {
                    Some(snapshot) => f(&snapshot.value),
                    None => f(&inner.default),
                }
            }
            None => f(&inner.default),
        }
    }

    /// Store a new value and publish it to every call site of the key.
    ///
    /// Accepts either a `T` or an `Option<T>`; `None` stores "no value".
    pub fn set(&self, value: impl Into<Option<T>>) {
        self.inner.write(value.into());
    }

    /// Update the value using a function applied to the last cached value.
    pub fn update(&self, f: impl FnOnce(&mut Option<T>)) {
        let mut value = self.inner.cached();
        f(&mut value);
        self.inner.write(value);
    }

    /// Delete the stored value and forget any in-memory value.
    ///
    /// Every call site of the key goes back to its default.
    pub fn remove(&self) {
        self.inner.remove();
    }

    /// Whether the current value is safe in the backing store.
    ///
    /// `false` only while the value differs from the default and lives in
    /// memory because the store refused it.
    pub fn is_persistent(&self) -> bool {
        self.inner.is_persistent()
    }

    /// Watch this state for changes.
    ///
    /// `callback` runs immediately with the current value, then each time a
    /// publish on the key changes the value seen by this call site.
    pub fn watch<F>(&self, callback: F) -> WatchGuard
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        let id = self.inner.next_watcher.fetch_add(1, Ordering::SeqCst);
        let callback: Watcher<T> = Arc::new(callback);
        lock(&self.inner.watchers).push((id, Arc::clone(&callback)));

        callback(self.get());

        let watchers: Arc<dyn WatcherList> = self.inner.watchers.clone();
        WatchGuard {
            id,
            watchers: Arc::downgrade(&watchers),
        }
    }

    /// Split into read, write and extra handles.
    pub fn split(self) -> (ReadState<T>, WriteState<T>, StateExtras<T>) {
        (
            ReadState(self.clone()),
            WriteState(self.clone()),
            StateExtras(self),
        )
    }
}

trait WatcherList: Send + Sync {
    fn remove(&self, id: usize);
}

impl<T: 'static> WatcherList for Watchers<T> {
    fn remove(&self, id: usize) {
        lock(self).retain(|(watcher, _)| *watcher != id);
    }
}

/// RAII guard for state watchers.
pub struct WatchGuard {
    id: usize,
    watchers: Weak<dyn WatcherList>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(watchers) = self.watchers.upgrade() {
            watchers.remove(self.id);
        }
    }
}

/// Read half of a synced state.
#[derive(Clone)]
pub struct ReadState<T>(SyncedState<T>);

impl<T> ReadState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn get(&self) -> Option<T> {
        self.0.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Option<T>) -> R) -> R {
        self.0.with(f)
    }

    pub fn watch<F>(&self, callback: F) -> WatchGuard
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        self.0.watch(callback)
    }

    pub fn key(&self) -> &str {
        self.0.key()
    }
}

/// Write half of a synced state.
#[derive(Clone)]
pub struct WriteState<T>(SyncedState<T>);

impl<T> WriteState<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn set(&self, value: impl Into<Option<T>>) {
        self.0.set(value);
    }

    pub fn update(&self, f: impl FnOnce(&mut Option<T>)) {
        self.0.update(f);
    }
}

/// Persistence status and removal for a synced state.
#[derive(Clone)]
pub struct StateExtras<T>(SyncedState<T>);

impl<T> StateExtras<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn is_persistent(&self) -> bool {
        self.0.is_persistent()
    }

    pub fn remove(&self) {
        self.0.remove();
    }
}

/// Create a synced state bound to `key`.
///
/// # Example
///
/// ```ignore
/// let (todos, set_todos, extras) = create_synced_state(
///     "todos",
///     StateOptions::new().default_value(vec!["first".to_string()]),
/// );
/// set_todos.set(vec!["second".to_string()]);
/// assert!(extras.is_persistent());
/// ```
pub fn create_synced_state<T>(
    key: impl Into<String>,
    options: StateOptions<T>,
) -> (ReadState<T>, WriteState<T>, StateExtras<T>)
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    SyncedState::new(key, options).split()
}
