//! Cache registry: one `LocalCache` + `SyncQueue` pair per collection over a
//! single SQLite handle, created lazily and owned for the client's lifetime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use tracing::debug;

use crate::config::QueueConfig;
use crate::error::{codes, StoreError, StoreResult};
use crate::sync::SyncQueue;

use super::store::LocalCache;

/// Shared SQLite handle. All cache and queue statements run through
/// [`CacheBackend::with_conn`], which serializes access and turns
/// post-dispose use into a typed error instead of a crash.
pub(crate) struct CacheBackend {
    conn: Mutex<Option<Connection>>,
}

impl CacheBackend {
    pub(crate) fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let backend = Self {
            conn: Mutex::new(Some(conn)),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    pub(crate) fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let backend = Self {
            conn: Mutex::new(Some(conn)),
        };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS entities (
                    collection TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    data TEXT NOT NULL,
                    modified_at INTEGER NOT NULL,
                    PRIMARY KEY (collection, entity_id)
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS pending_writes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    collection TEXT NOT NULL,
                    action TEXT NOT NULL,
                    entity_id TEXT NOT NULL,
                    payload TEXT,
                    created_at INTEGER NOT NULL
                )",
                [],
            )?;

            conn.execute(
                "CREATE TABLE IF NOT EXISTS query_cache (
                    collection TEXT NOT NULL,
                    query TEXT NOT NULL,
                    last_request_time TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (collection, query)
                )",
                [],
            )?;

            conn.execute(
                "CREATE INDEX IF NOT EXISTS idx_pending_collection
                 ON pending_writes(collection, id)",
                [],
            )?;

            Ok(())
        })
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let guard = self.conn.lock();
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(StoreError::cache_write(
                codes::CACHE_DISPOSED,
                "cache manager has been disposed",
            )),
        }
    }

    pub(crate) fn dispose(&self) {
        let mut guard = self.conn.lock();
        if guard.take().is_some() {
            debug!("cache backend disposed");
        }
    }
}

/// The per-collection unit of mutual exclusion: the cache, the queue, and
/// the async lock guarding compound read-modify-write sequences on them.
pub struct CollectionSlot {
    pub cache: LocalCache,
    pub queue: SyncQueue,
    pub(crate) lock: tokio::sync::Mutex<()>,
}

/// Process-wide cache registry, lifecycle tied to the owning client.
pub struct CacheManager {
    backend: Arc<CacheBackend>,
    slots: RwLock<HashMap<String, Arc<CollectionSlot>>>,
    queue_config: QueueConfig,
}

impl CacheManager {
    /// Open (or create) the cache database at the given path.
    pub fn open<P: AsRef<Path>>(path: P, queue_config: QueueConfig) -> StoreResult<Self> {
        Ok(Self {
            backend: Arc::new(CacheBackend::open(path)?),
            slots: RwLock::new(HashMap::new()),
            queue_config,
        })
    }

    /// Open the cache database in the user data directory.
    pub fn open_default(app_name: &str, queue_config: QueueConfig) -> StoreResult<Self> {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
            })
            .join(app_name);

        std::fs::create_dir_all(&data_dir).map_err(|e| {
            StoreError::cache_write(
                codes::CACHE_STORAGE,
                format!("failed to create data directory: {}", e),
            )
        })?;

        Self::open(data_dir.join("cache.db"), queue_config)
    }

    /// Open an in-memory cache (tests, ephemeral sessions).
    pub fn open_in_memory(queue_config: QueueConfig) -> StoreResult<Self> {
        Ok(Self {
            backend: Arc::new(CacheBackend::open_in_memory()?),
            slots: RwLock::new(HashMap::new()),
            queue_config,
        })
    }

    /// The cache/queue pair for a collection, created on first access.
    pub fn collection(&self, name: &str) -> Arc<CollectionSlot> {
        if let Some(slot) = self.slots.read().get(name) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write();
        Arc::clone(slots.entry(name.to_string()).or_insert_with(|| {
            debug!(collection = name, "creating cache slot");
            Arc::new(CollectionSlot {
                cache: LocalCache::new(name, Arc::clone(&self.backend)),
                queue: SyncQueue::new(name, Arc::clone(&self.backend), self.queue_config.clone()),
                lock: tokio::sync::Mutex::new(()),
            })
        }))
    }

    /// Release the underlying storage handle. Idempotent; any later cache or
    /// queue operation fails with a `CACHE_DISPOSED` error.
    pub fn dispose(&self) {
        self.slots.write().clear();
        self.backend.dispose();
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slots_are_created_lazily_and_cached() {
        let manager = CacheManager::open_in_memory(QueueConfig::default()).unwrap();
        let a = manager.collection("books");
        let b = manager.collection("books");
        assert!(Arc::ptr_eq(&a, &b));

        let c = manager.collection("authors");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_dispose_is_idempotent_and_fails_later_access() {
        let manager = CacheManager::open_in_memory(QueueConfig::default()).unwrap();
        let slot = manager.collection("books");
        slot.cache.save(&json!({"_id": "1"})).unwrap();

        manager.dispose();
        manager.dispose();

        let err = slot.cache.save(&json!({"_id": "2"})).unwrap_err();
        assert_eq!(err.code(), "CACHE_DISPOSED");
    }

    #[test]
    fn test_collections_are_isolated() {
        let manager = CacheManager::open_in_memory(QueueConfig::default()).unwrap();
        let books = manager.collection("books");
        let authors = manager.collection("authors");

        books.cache.save(&json!({"_id": "1", "title": "Dune"})).unwrap();
        assert_eq!(books.cache.count().unwrap(), 1);
        assert_eq!(authors.cache.count().unwrap(), 0);
    }
}
