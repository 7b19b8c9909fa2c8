//! # Tincan Storage
//!
//! Reactive state bound to a key/value storage area, kept consistent across
//! every call site that uses the same key.
//!
//! The crate is built from three layers:
//!
//! ## Serialization
//!
//! - [`Serializer`] - Two-way conversion between values and stored strings
//! - [`JsonSerializer`] - The default, backed by `serde_json`
//!
//! ## Storage
//!
//! - [`StorageArea`] - The host's key/value store (browser session storage,
//!   [`MemoryStorage`] in-process)
//! - [`StorageFacade`] - Never-failing access that degrades to memory when
//!   the store refuses a write
//!
//! ## Synced state
//!
//! - [`SyncRuntime`] - Process-wide hub publishing changes per key
//! - [`SyncedState`] - One call site's cached, writable view of a key
//!
//! Storage is treated as an optimization, not a dependency: when it fails,
//! state keeps working in memory and [`SyncedState::is_persistent`] reports
//! the loss of persistence.
//!
//! [`StorageArea`]: storage::StorageArea
//! [`MemoryStorage`]: storage::MemoryStorage
//! [`StorageFacade`]: storage::StorageFacade

pub mod error;
pub mod runtime;
pub mod serializer;
pub mod state;
pub mod storage;

// Re-export main types for convenience
pub use error::{SerializeError, StorageError};
pub use runtime::SyncRuntime;
pub use serializer::{JsonSerializer, Serializer};
pub use state::{create_synced_state, ReadState, StateExtras, StateOptions, SyncedState, WriteState};
