use crate::runtime::SyncRuntime;
use crate::serializer::{JsonSerializer, Serializer};
use crate::storage::StorageArea;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub(crate) enum DefaultValue<T> {
    Absent,
    Value(T),
    Lazy(Box<dyn FnOnce() -> T + Send>),
}

impl<T> DefaultValue<T> {
    pub(crate) fn resolve(self) -> Option<T> {
        match self {
            DefaultValue::Absent => None,
            DefaultValue::Value(value) => Some(value),
            DefaultValue::Lazy(init) => Some(init()),
        }
    }
}

pub(crate) enum StorageChoice {
    Runtime,
    Area(Arc<dyn StorageArea>),
    Disabled,
}

/// Configuration for one synced state call site.
///
/// # Examples
///
/// ```
/// use tincan_storage::StateOptions;
///
/// let options = StateOptions::new()
///     .default_value(vec!["first".to_string()])
///     .storage_sync(false);
/// # let _ = options;
/// ```
pub struct StateOptions<T> {
    pub(crate) default: DefaultValue<T>,
    pub(crate) storage_sync: bool,
    pub(crate) serializer: Arc<dyn Serializer<T>>,
    pub(crate) storage: StorageChoice,
    pub(crate) runtime: Option<Arc<SyncRuntime>>,
}

impl<T> StateOptions<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    /// Options with no default, cross-context sync on and JSON storage.
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer)
    }
}

impl<T> Default for StateOptions<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StateOptions<T> {
    /// Options storing values through a custom serializer.
    pub fn with_serializer(serializer: impl Serializer<T> + 'static) -> Self {
        Self {
            default: DefaultValue::Absent,
            storage_sync: true,
            serializer: Arc::new(serializer),
            storage: StorageChoice::Runtime,
            runtime: None,
        }
    }

    /// Value used while nothing usable is stored.
    pub fn default_value(mut self, value: T) -> Self {
        self.default = DefaultValue::Value(value);
        self
    }

    /// Like [`default_value`](Self::default_value), computed once when the
    /// state is created.
    pub fn default_with<F>(mut self, init: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.default = DefaultValue::Lazy(Box::new(init));
        self
    }

    /// Whether changes made by other execution contexts refresh this state.
    pub fn storage_sync(mut self, enabled: bool) -> Self {
        self.storage_sync = enabled;
        self
    }

    /// Replace the serializer.
    pub fn serializer(mut self, serializer: impl Serializer<T> + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    /// Use `storage` instead of the runtime's backing store.
    pub fn storage(mut self, storage: Arc<dyn StorageArea>) -> Self {
        self.storage = StorageChoice::Area(storage);
        self
    }

    /// Behave as if no backing store existed: the state is its default.
    pub fn no_storage(mut self) -> Self {
        self.storage = StorageChoice::Disabled;
        self
    }

    /// Attach to `runtime` instead of [`SyncRuntime::current`].
    pub fn runtime(mut self, runtime: Arc<SyncRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }
}
