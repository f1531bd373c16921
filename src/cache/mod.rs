//! Disk cache for relayed responses
//!
//! The store owns the on-disk layout; the sweeper evicts expired entries on a timer.

pub mod store;
pub mod sweeper;

pub use store::{CacheKey, CacheStore, CacheWriter, EntryMeta};
pub use sweeper::Sweeper;
