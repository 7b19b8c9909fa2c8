//! Storage-backed reactive state.
//!
//! A [`SyncedState`] is one call site's view of a storage key. Every call
//! site of the same key in the same runtime sees the same value, and writes
//! made in other execution contexts are picked up through storage events.

mod options;
mod state;

pub use options::StateOptions;
pub use state::{create_synced_state, ReadState, StateExtras, SyncedState, WatchGuard, WriteState};
