//! Runtime support for synced state.
//!
//! This module provides the subscription hub that keeps every call site of
//! a key consistent, along with the process-wide state it owns.

mod context;

pub use context::{Subscription, SyncRuntime};
