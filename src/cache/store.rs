//! Per-collection entity storage.
//!
//! Rows live in the shared SQLite handle owned by the [`CacheBackend`];
//! every statement goes through `with_conn`, so a disposed manager turns
//! into a typed error instead of a use-after-close.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::entity;
use crate::error::{codes, StoreError, StoreResult};
use crate::query::TranslatedQuery;

use super::filter::{compile, Modifiers};
use super::manager::CacheBackend;

/// Remote-fetch bookkeeping for one translated query: when the backend last
/// answered it successfully. Written only after a successful response, never
/// speculatively; drives delta fetches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryCacheItem {
    pub collection: String,
    pub query: String,
    pub last_request_time: String,
}

/// Durable entity store for one collection: upsert by id, lookup by id or
/// translated query, and query-metadata bookkeeping.
pub struct LocalCache {
    collection: String,
    backend: Arc<CacheBackend>,
}

impl LocalCache {
    pub(crate) fn new(collection: &str, backend: Arc<CacheBackend>) -> Self {
        Self {
            collection: collection.to_string(),
            backend,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Upsert an entity by its `_id`. Last write wins; at most one row per
    /// `(collection, entity_id)`. An entity without a string `_id` fails with
    /// `CACHE_SAVE_INSERT_ENTITY` and commits nothing.
    pub fn save(&self, entity: &Value) -> StoreResult<Value> {
        let id = entity::entity_id_of(entity).ok_or_else(|| {
            StoreError::cache_write(
                codes::CACHE_SAVE_INSERT_ENTITY,
                "entity has no string _id",
            )
        })?;
        let data = serde_json::to_string(entity).map_err(|e| {
            StoreError::cache_write(codes::CACHE_SAVE_INSERT_ENTITY, e.to_string())
        })?;
        let now = chrono::Utc::now().timestamp_millis();

        self.backend.with_conn(|conn| {
            conn.execute(
                "INSERT INTO entities (collection, entity_id, data, modified_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, entity_id) DO UPDATE SET
                 data = excluded.data,
                 modified_at = excluded.modified_at",
                params![self.collection, id, data, now],
            )
            .map_err(|e| {
                StoreError::cache_write(codes::CACHE_SAVE_INSERT_ENTITY, e.to_string())
            })?;
            Ok(())
        })?;

        Ok(entity.clone())
    }

    /// Bulk upsert. Stops at the first failing entity and reports which one;
    /// entities before it stay committed, entities after it are not touched.
    pub fn save_all(&self, entities: &[Value]) -> StoreResult<Vec<Value>> {
        let mut saved = Vec::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            match self.save(entity) {
                Ok(entity) => saved.push(entity),
                Err(StoreError::CacheWrite { code, reason }) => {
                    return Err(StoreError::cache_write(
                        code,
                        format!("entity {} of {}: {}", i + 1, entities.len(), reason),
                    ));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(saved)
    }

    pub fn find_by_id(&self, id: &str) -> StoreResult<Option<Value>> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT data FROM entities WHERE collection = ?1 AND entity_id = ?2",
            )?;
            let data: Option<String> = stmt
                .query_row(params![self.collection, id], |row| row.get(0))
                .optional()?;
            match data {
                Some(data) => Ok(Some(decode_row(&data)?)),
                None => Ok(None),
            }
        })
    }

    /// All entities in the collection. Row order is unspecified.
    pub fn find_all(&self) -> StoreResult<Vec<Value>> {
        self.backend.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT data FROM entities WHERE collection = ?1")?;
            let rows = stmt.query_map(params![self.collection], |row| {
                row.get::<_, String>(0)
            })?;

            let mut entities = Vec::new();
            for row in rows {
                entities.push(decode_row(&row?)?);
            }
            Ok(entities)
        })
    }

    /// Evaluate a translated query against the local store with the same
    /// filter semantics the backend applies, sort/skip/limit/fields included.
    pub fn find_by_query(&self, query: &TranslatedQuery) -> StoreResult<Vec<Value>> {
        let matcher = compile(&query.filter)?;
        let modifiers = Modifiers::parse(&query.modifiers)?;

        let rows = self.find_all()?;
        let matched = rows.into_iter().filter(|row| matcher.matches(row)).collect();
        Ok(modifiers.apply(matched))
    }

    /// Delete by id. A missing id is a no-op, not an error.
    pub fn delete(&self, id: &str) -> StoreResult<bool> {
        self.backend.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM entities WHERE collection = ?1 AND entity_id = ?2",
                    params![self.collection, id],
                )
                .map_err(|e| {
                    StoreError::cache_write(codes::CACHE_DELETE_ENTITY, e.to_string())
                })?;
            Ok(removed > 0)
        })
    }

    /// Remove every entity in the collection, returning the number removed.
    pub fn delete_all(&self) -> StoreResult<u64> {
        self.backend.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM entities WHERE collection = ?1",
                    params![self.collection],
                )
                .map_err(|e| {
                    StoreError::cache_write(codes::CACHE_DELETE_ENTITY, e.to_string())
                })?;
            Ok(removed as u64)
        })
    }

    pub fn count(&self) -> StoreResult<u64> {
        self.backend.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entities WHERE collection = ?1",
                params![self.collection],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Replace a locally assigned id with the server-assigned entity after a
    /// successful create: the old row goes away, the new entity is upserted.
    pub fn replace_id(&self, old_id: &str, entity: &Value) -> StoreResult<Value> {
        debug!(
            collection = %self.collection,
            old_id,
            new_id = entity::entity_id_of(entity).unwrap_or("?"),
            "replacing local entity id"
        );
        self.delete(old_id)?;
        self.save(entity)
    }

    /// The stored [`QueryCacheItem`] for a query string, if any.
    pub fn query_metadata(&self, query: &str) -> StoreResult<Option<QueryCacheItem>> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT last_request_time FROM query_cache
                 WHERE collection = ?1 AND query = ?2",
            )?;
            let last_request_time: Option<String> = stmt
                .query_row(params![self.collection, query], |row| row.get(0))
                .optional()?;
            Ok(last_request_time.map(|last_request_time| QueryCacheItem {
                collection: self.collection.clone(),
                query: query.to_string(),
                last_request_time,
            }))
        })
    }

    /// Record a successful remote fetch for a query string.
    pub fn set_query_metadata(&self, query: &str, last_request_time: &str) -> StoreResult<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.backend.with_conn(|conn| {
            conn.execute(
                "INSERT INTO query_cache (collection, query, last_request_time, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(collection, query) DO UPDATE SET
                 last_request_time = excluded.last_request_time,
                 updated_at = excluded.updated_at",
                params![self.collection, query, last_request_time, now],
            )?;
            Ok(())
        })
    }

    /// Drop all query metadata for the collection (forces full fetches).
    pub fn clear_query_metadata(&self) -> StoreResult<u64> {
        self.backend.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM query_cache WHERE collection = ?1",
                params![self.collection],
            )?;
            Ok(removed as u64)
        })
    }
}

fn decode_row(data: &str) -> StoreResult<Value> {
    serde_json::from_str(data).map_err(|e| {
        StoreError::cache_write(codes::CACHE_STORAGE, format!("corrupt cache row: {}", e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FieldMap, Query, QueryTranslator};
    use serde_json::json;

    fn create_test_cache() -> LocalCache {
        let backend = Arc::new(CacheBackend::open_in_memory().unwrap());
        LocalCache::new("books", backend)
    }

    #[test]
    fn test_save_and_find_by_id() {
        let cache = create_test_cache();
        cache.save(&json!({"_id": "1", "title": "Dune"})).unwrap();

        let found = cache.find_by_id("1").unwrap().unwrap();
        assert_eq!(found["title"], "Dune");
        assert!(cache.find_by_id("2").unwrap().is_none());
    }

    #[test]
    fn test_save_is_idempotent_upsert() {
        let cache = create_test_cache();
        let entity = json!({"_id": "1", "title": "Dune"});
        cache.save(&entity).unwrap();
        cache.save(&entity).unwrap();
        assert_eq!(cache.count().unwrap(), 1);

        cache.save(&json!({"_id": "1", "title": "Dune Messiah"})).unwrap();
        assert_eq!(cache.count().unwrap(), 1);
        let found = cache.find_by_id("1").unwrap().unwrap();
        assert_eq!(found["title"], "Dune Messiah");
    }

    #[test]
    fn test_save_without_id_fails_and_commits_nothing() {
        let cache = create_test_cache();
        let err = cache.save(&json!({"title": "no id"})).unwrap_err();
        assert_eq!(err.code(), "CACHE_SAVE_INSERT_ENTITY");
        assert_eq!(cache.count().unwrap(), 0);
    }

    #[test]
    fn test_save_all_reports_failing_entity() {
        let cache = create_test_cache();
        let err = cache
            .save_all(&[
                json!({"_id": "1"}),
                json!({"no_id": true}),
                json!({"_id": "3"}),
            ])
            .unwrap_err();
        assert_eq!(err.code(), "CACHE_SAVE_INSERT_ENTITY");
        assert!(err.to_string().contains("entity 2 of 3"));
        // The first entity stays committed; the third was never reached.
        assert_eq!(cache.count().unwrap(), 1);
    }

    #[test]
    fn test_delete_missing_id_is_noop() {
        let cache = create_test_cache();
        assert!(!cache.delete("ghost").unwrap());

        cache.save(&json!({"_id": "1"})).unwrap();
        assert!(cache.delete("1").unwrap());
        assert_eq!(cache.count().unwrap(), 0);
    }

    #[test]
    fn test_find_by_query_matches_translated_filter() {
        let cache = create_test_cache();
        cache.save(&json!({"_id": "1", "name": "Alice", "age": 30})).unwrap();
        cache.save(&json!({"_id": "2", "name": "Bob", "age": 25})).unwrap();
        cache.save(&json!({"_id": "3", "name": "Carol", "age": 35})).unwrap();

        let translator = QueryTranslator::new(
            FieldMap::new().field("name", "name").field("age", "age"),
        );
        let translated = translator
            .translate(&Query::new().gt("age", 26).descending("age"))
            .unwrap();

        let rows = cache.find_by_query(&translated).unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Carol", "Alice"]);
    }

    #[test]
    fn test_replace_id_substitutes_server_id() {
        let cache = create_test_cache();
        cache.save(&json!({"_id": "temp_x", "title": "Dune"})).unwrap();

        let server_entity = json!({"_id": "srv-1", "title": "Dune"});
        cache.replace_id("temp_x", &server_entity).unwrap();

        assert!(cache.find_by_id("temp_x").unwrap().is_none());
        assert_eq!(
            cache.find_by_id("srv-1").unwrap().unwrap()["title"],
            "Dune"
        );
        assert_eq!(cache.count().unwrap(), 1);
    }

    #[test]
    fn test_query_metadata_roundtrip() {
        let cache = create_test_cache();
        let query = r#"{"age":{"$gt":21}}"#;
        assert!(cache.query_metadata(query).unwrap().is_none());

        cache
            .set_query_metadata(query, "2024-01-01T00:00:00.000Z")
            .unwrap();
        let item = cache.query_metadata(query).unwrap().unwrap();
        assert_eq!(item.last_request_time, "2024-01-01T00:00:00.000Z");
        assert_eq!(item.collection, "books");

        cache
            .set_query_metadata(query, "2024-02-01T00:00:00.000Z")
            .unwrap();
        let item = cache.query_metadata(query).unwrap().unwrap();
        assert_eq!(item.last_request_time, "2024-02-01T00:00:00.000Z");

        cache.clear_query_metadata().unwrap();
        assert!(cache.query_metadata(query).unwrap().is_none());
    }
}
