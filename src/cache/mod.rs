//! Durable local cache: per-collection entity storage, query metadata, and
//! the process-wide cache registry.

mod filter;
mod manager;
mod store;

pub use manager::{CacheManager, CollectionSlot};
pub use store::{LocalCache, QueryCacheItem};

pub(crate) use manager::CacheBackend;
