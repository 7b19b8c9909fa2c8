use crate::storage::{AreaId, MemoryFallback, StorageArea, StorageEvent};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

type Callback = Arc<dyn Fn() + Send + Sync>;

type Topic = (Option<AreaId>, String);

struct Subscriber {
    id: usize,
    callback: Callback,
    // Area the subscriber reads from; `None` hears every area.
    area: Option<AreaId>,
    // Whether cross-context events for the key should reach this subscriber.
    storage_sync: bool,
}

/// Whether two area identities may refer to the same area.
fn same_area(a: Option<AreaId>, b: Option<AreaId>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Hub state shared with outstanding [`Subscription`]s.
struct HubContext {
    // Map from key to the subscribers registered under it
    subscribers: HashMap<String, Vec<Subscriber>>,
    // Area keys whose default value has already been written once
    seeded: HashSet<Topic>,
    batch_depth: usize,
    // Area keys published while a batch was open, in first-publish order
    pending: Vec<Topic>,
}

impl HubContext {
    fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            seeded: HashSet::new(),
            batch_depth: 0,
            pending: Vec::new(),
        }
    }

    fn clear(&mut self) {
        self.subscribers.clear();
        self.seeded.clear();
        self.pending.clear();
    }
}

fn lock(context: &Mutex<HubContext>) -> MutexGuard<'_, HubContext> {
    context.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-wide hub that keeps synced state consistent.
///
/// The hub holds the per-key invalidation callbacks of every active call
/// site, one in-memory fallback per storage area for failed writes, and the
/// default backing store. Like a reactive runtime it supports both a global instance
/// (default) and scoped instances for isolation.
///
/// # Examples
///
/// Using the global runtime, which starts without a backing store:
///
/// ```
/// use tincan_storage::runtime::SyncRuntime;
///
/// let runtime = SyncRuntime::global();
/// assert_eq!(runtime.subscriber_count("todos"), 0);
/// ```
///
/// Using a scoped runtime for isolation:
///
/// ```
/// use std::sync::Arc;
/// use tincan_storage::runtime::SyncRuntime;
/// use tincan_storage::storage::MemoryStorage;
///
/// SyncRuntime::scope(|| {
///     SyncRuntime::current().set_storage(Some(Arc::new(MemoryStorage::new())));
///     assert!(SyncRuntime::current().storage().is_some());
/// });
/// // Runtime and all its state is dropped here
/// ```
pub struct SyncRuntime {
    next_id: AtomicUsize,
    context: Arc<Mutex<HubContext>>,
    fallbacks: Mutex<HashMap<Option<AreaId>, Arc<MemoryFallback>>>,
    storage: RwLock<Option<Arc<dyn StorageArea>>>,
}

// Thread-local stack for scoped runtimes
thread_local! {
    static RUNTIME_STACK: RefCell<Vec<Arc<SyncRuntime>>> = const { RefCell::new(Vec::new()) };
}

impl SyncRuntime {
    /// Create a new isolated runtime with no backing store.
    ///
    /// Its subscribers, fallback entries and seeded keys are independent of
    /// every other runtime. Useful for testing.
    pub fn new() -> Arc<Self> {
        Arc::new(SyncRuntime {
            next_id: AtomicUsize::new(0),
            context: Arc::new(Mutex::new(HubContext::new())),
            fallbacks: Mutex::new(HashMap::new()),
            storage: RwLock::new(None),
        })
    }

    /// Create a new isolated runtime backed by `storage`.
    pub fn with_storage(storage: Arc<dyn StorageArea>) -> Arc<Self> {
        let runtime = Self::new();
        runtime.set_storage(Some(storage));
        runtime
    }

    /// Run a function with a fresh isolated runtime.
    ///
    /// The runtime and all its state is dropped when the function returns.
    pub fn scope<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let runtime = Self::new();
        Self::with_runtime(runtime, f)
    }

    /// Get or create the global runtime (fallback).
    ///
    /// This is used as the default runtime when no scoped runtime is active.
    pub fn global() -> Arc<Self> {
        use std::sync::OnceLock;
        static RUNTIME: OnceLock<Arc<SyncRuntime>> = OnceLock::new();
        Arc::clone(RUNTIME.get_or_init(Self::new))
    }

    /// Get the current runtime (scoped or global fallback).
    pub fn current() -> Arc<Self> {
        RUNTIME_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(Self::global)
        })
    }

    /// Run a function with a specific runtime as the current context.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use tincan_storage::runtime::SyncRuntime;
    ///
    /// let runtime = SyncRuntime::new();
    /// SyncRuntime::with_runtime(runtime.clone(), || {
    ///     assert!(Arc::ptr_eq(&SyncRuntime::current(), &runtime));
    /// });
    /// ```
    pub fn with_runtime<F, R>(runtime: Arc<Self>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().push(runtime);
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        RUNTIME_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match result {
            Ok(r) => r,
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Clear all subscribers, fallback entries and seeded keys.
    ///
    /// Useful for resetting between tests. The backing store is left in
    /// place. IDs keep counting up, so dropping a [`Subscription`] taken
    /// before the clear never removes one registered after it.
    pub fn clear(&self) {
        lock(&self.context).clear();
        for fallback in self.fallbacks().values() {
            fallback.clear();
        }
    }

    /// Generate the next unique subscriber ID.
    pub fn next_id(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Install (or remove) the default backing store for new call sites.
    pub fn set_storage(&self, storage: Option<Arc<dyn StorageArea>>) {
        *self.storage.write().unwrap_or_else(PoisonError::into_inner) = storage;
    }

    /// The default backing store, if this environment has one.
    pub fn storage(&self) -> Option<Arc<dyn StorageArea>> {
        self.storage
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The in-memory fallback shared by every call site of this runtime
    /// that reads from `area`.
    pub fn fallback(&self, area: Option<AreaId>) -> Arc<MemoryFallback> {
        Arc::clone(self.fallbacks().entry(area).or_default())
    }

    fn fallbacks(&self) -> MutexGuard<'_, HashMap<Option<AreaId>, Arc<MemoryFallback>>> {
        self.fallbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` to run whenever `key` is published, in any area.
    ///
    /// Any number of callbacks may share a key. The returned
    /// [`Subscription`] deregisters the callback when it is dropped or
    /// explicitly revoked.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_area(key, None, false, callback)
    }

    /// Register `callback` for `key` of storage area `area`.
    ///
    /// With `storage_sync` set, cross-context [`StorageEvent`]s for the key
    /// and area also publish it.
    pub fn subscribe_area<F>(
        &self,
        key: &str,
        area: Option<AreaId>,
        storage_sync: bool,
        callback: F,
    ) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id();
        let callback: Callback = Arc::new(callback);
        lock(&self.context)
            .subscribers
            .entry(key.to_string())
            .or_default()
            .push(Subscriber {
                id,
                callback,
                area,
                storage_sync,
            });

        Subscription {
            key: key.to_string(),
            id,
            context: Arc::downgrade(&self.context),
            active: true,
        }
    }

    /// Number of callbacks registered under `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        lock(&self.context)
            .subscribers
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Run every callback registered under `key`, whatever its area.
    pub fn publish(&self, key: &str) {
        self.publish_area(None, key);
    }

    /// Run every callback registered under `key` of area `area`.
    ///
    /// Callbacks run synchronously over the set registered when the call
    /// began: each of them runs exactly once, even if callbacks subscribe or
    /// unsubscribe while the publish is in progress. No ordering between
    /// callbacks is promised. Inside [`batch`](Self::batch) the publish is
    /// deferred until the batch ends.
    pub fn publish_area(&self, area: Option<AreaId>, key: &str) {
        let callbacks: Vec<Callback> = {
            let mut ctx = lock(&self.context);
            if ctx.batch_depth > 0 {
                if !ctx.pending.iter().any(|(a, k)| *a == area && k == key) {
                    ctx.pending.push((area, key.to_string()));
                }
                return;
            }
            ctx.subscribers
                .get(key)
                .map(|subs| {
                    subs.iter()
                        .filter(|sub| same_area(sub.area, area))
                        .map(|sub| Arc::clone(&sub.callback))
                        .collect()
                })
                .unwrap_or_default()
        };

        log::trace!("publishing `{key}` to {} subscriber(s)", callbacks.len());
        for callback in callbacks {
            callback();
        }
    }

    /// Run `f`, coalescing every publish it makes into one per key.
    ///
    /// Deferred publishes are delivered when the outermost batch returns. If
    /// `f` panics they are discarded.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    /// use tincan_storage::runtime::SyncRuntime;
    ///
    /// let runtime = SyncRuntime::new();
    /// let calls = Arc::new(AtomicUsize::new(0));
    /// let calls_clone = calls.clone();
    /// let _sub = runtime.subscribe("todos", move || {
    ///     calls_clone.fetch_add(1, Ordering::SeqCst);
    /// });
    ///
    /// runtime.batch(|| {
    ///     runtime.publish("todos");
    ///     runtime.publish("todos");
    ///     assert_eq!(calls.load(Ordering::SeqCst), 0);
    /// });
    /// assert_eq!(calls.load(Ordering::SeqCst), 1);
    /// ```
    pub fn batch<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        lock(&self.context).batch_depth += 1;

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

        let pending = {
            let mut ctx = lock(&self.context);
            ctx.batch_depth -= 1;
            if ctx.batch_depth == 0 {
                std::mem::take(&mut ctx.pending)
            } else {
                Vec::new()
            }
        };

        match result {
            Ok(r) => {
                for (area, key) in pending {
                    self.publish_area(area, &key);
                }
                r
            }
            Err(e) => std::panic::resume_unwind(e),
        }
    }

    /// Deliver a storage change made by another execution context.
    ///
    /// Every key with at least one synced subscriber that the event concerns
    /// is published once, to every subscriber of that key in the event's
    /// area. Returns how many keys were published.
    pub fn dispatch_storage_event(&self, event: &StorageEvent) -> usize {
        let keys: Vec<String> = {
            let ctx = lock(&self.context);
            ctx.subscribers
                .iter()
                .filter(|(key, subs)| {
                    subs.iter()
                        .any(|sub| sub.storage_sync && event.concerns(key, sub.area))
                })
                .map(|(key, _)| key.clone())
                .collect()
        };

        log::debug!("storage event {:?} refreshes {} key(s)", event.key, keys.len());
        for key in &keys {
            self.publish_area(event.area, key);
        }
        keys.len()
    }

    /// Record that `key` of `area` is being seeded with its default.
    ///
    /// Returns `false` if this runtime already seeded it.
    pub(crate) fn claim_seed(&self, area: Option<AreaId>, key: &str) -> bool {
        lock(&self.context).seeded.insert((area, key.to_string()))
    }
}

/// Token for a callback registered with [`SyncRuntime::subscribe`].
///
/// Dropping the token deregisters the callback. [`unsubscribe`](Self::unsubscribe)
/// does the same explicitly; it consumes the token, so a registration can
/// never be revoked twice. Tokens outliving their runtime are inert.
pub struct Subscription {
    key: String,
    id: usize,
    context: Weak<Mutex<HubContext>>,
    active: bool,
}

impl Subscription {
    /// The key this subscription listens to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Deregister the callback now.
    pub fn unsubscribe(mut self) {
        self.revoke();
    }

    fn revoke(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(context) = self.context.upgrade() {
            let mut ctx = lock(&context);
            if let Some(subs) = ctx.subscribers.get_mut(&self.key) {
                subs.retain(|sub| sub.id != self.id);
                if subs.is_empty() {
                    ctx.subscribers.remove(&self.key);
                }
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.revoke();
    }
}
