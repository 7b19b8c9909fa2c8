//! Backing storage and the never-failing facade over it.
//!
//! A [`StorageArea`] is the raw key/value store offered by the host (a
//! browser's session storage, or [`MemoryStorage`] in-process). The
//! [`StorageFacade`] wraps one area together with the runtime's
//! [`MemoryFallback`] so that every storage failure degrades the same way.

mod area;
mod facade;
mod fallback;
mod memory;

pub use area::{AreaId, StorageArea, StorageEvent};
pub use facade::StorageFacade;
pub use fallback::MemoryFallback;
pub use memory::{MemoryStorage, DEFAULT_QUOTA};
