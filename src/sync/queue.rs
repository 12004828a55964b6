//! The per-collection FIFO queue of not-yet-applied local writes.

use std::fmt;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::config::QueueConfig;
use crate::entity;
use crate::error::{codes, StoreError, StoreResult};

/// The kind of write a pending action replays against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Post,
    Put,
    Delete,
}

impl WriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteAction::Post => "POST",
            WriteAction::Put => "PUT",
            WriteAction::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "POST" => Ok(WriteAction::Post),
            "PUT" => Ok(WriteAction::Put),
            "DELETE" => Ok(WriteAction::Delete),
            other => Err(StoreError::cache_write(
                codes::CACHE_STORAGE,
                format!("unknown pending action: {}", other),
            )),
        }
    }
}

impl fmt::Display for WriteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued write, as stored. `id` is the queue position (AUTOINCREMENT
/// rowid); FIFO order within a collection is ascending `id`.
#[derive(Debug, Clone)]
pub struct PendingWriteAction {
    pub id: i64,
    pub collection: String,
    pub action: WriteAction,
    pub entity_id: String,
    pub payload: Option<Value>,
    pub created_at: i64,
}

/// Durable, bounded, ordered log of pending writes for one collection.
///
/// Multiple pending actions against the same entity id are kept as separate
/// entries and replayed in order; the queue never merges or collapses them.
pub struct SyncQueue {
    collection: String,
    backend: Arc<CacheBackend>,
    config: QueueConfig,
}

impl SyncQueue {
    pub(crate) fn new(collection: &str, backend: Arc<CacheBackend>, config: QueueConfig) -> Self {
        Self {
            collection: collection.to_string(),
            backend,
            config,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Append an action to the tail.
    ///
    /// Bounded with a reject-new strategy: when the configured count or byte
    /// limit is reached the push fails with `SYNC_QUEUE_FULL` and nothing is
    /// written. Accepted actions are never dropped to make room.
    pub fn push(
        &self,
        action: WriteAction,
        entity_id: &str,
        payload: Option<&Value>,
    ) -> StoreResult<()> {
        let payload_str = match payload {
            Some(payload) => Some(serde_json::to_string(payload).map_err(|e| {
                StoreError::cache_write(codes::CACHE_STORAGE, e.to_string())
            })?),
            None => None,
        };
        let new_bytes = payload_str.as_ref().map(String::len).unwrap_or(0);
        let now = chrono::Utc::now().timestamp_millis();

        self.backend.with_conn(|conn| {
            let (count, bytes): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(LENGTH(payload)), 0)
                 FROM pending_writes WHERE collection = ?1",
                params![self.collection],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            if count as usize >= self.config.max_count {
                warn!(
                    collection = %self.collection,
                    count,
                    limit = self.config.max_count,
                    "pending-write queue full, rejecting push"
                );
                return Err(StoreError::cache_write(
                    codes::SYNC_QUEUE_FULL,
                    format!(
                        "queue holds {} actions (limit {})",
                        count, self.config.max_count
                    ),
                ));
            }
            if bytes as usize + new_bytes > self.config.max_bytes {
                warn!(
                    collection = %self.collection,
                    bytes,
                    limit = self.config.max_bytes,
                    "pending-write queue byte limit reached, rejecting push"
                );
                return Err(StoreError::cache_write(
                    codes::SYNC_QUEUE_FULL,
                    format!(
                        "queue holds {} payload bytes (limit {})",
                        bytes, self.config.max_bytes
                    ),
                ));
            }

            conn.execute(
                "INSERT INTO pending_writes (collection, action, entity_id, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![self.collection, action.as_str(), entity_id, payload_str, now],
            )?;
            debug!(
                collection = %self.collection,
                action = action.as_str(),
                entity_id,
                "queued pending write"
            );
            Ok(())
        })
    }

    /// Remove and return the oldest action, or `None` on an empty queue.
    ///
    /// Destructive by contract: a pop is final, and a caller whose network
    /// apply fails afterwards is responsible for re-queuing the action.
    pub fn pop(&self) -> StoreResult<Option<PendingWriteAction>> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, action, entity_id, payload, created_at
                 FROM pending_writes WHERE collection = ?1
                 ORDER BY id ASC LIMIT 1",
            )?;
            let row = stmt
                .query_row(params![self.collection], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .optional()?;

            let Some((id, action, entity_id, payload, created_at)) = row else {
                return Ok(None);
            };

            conn.execute("DELETE FROM pending_writes WHERE id = ?1", params![id])?;

            Ok(Some(PendingWriteAction {
                id,
                collection: self.collection.clone(),
                action: WriteAction::parse(&action)?,
                entity_id,
                payload: decode_payload(payload.as_deref())?,
                created_at,
            }))
        })
    }

    /// Number of pending actions for the collection.
    pub fn count(&self) -> StoreResult<u64> {
        self.backend.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pending_writes WHERE collection = ?1",
                params![self.collection],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Discard every pending action without applying it, returning the number
    /// removed. This loses local writes; callers expose it as an explicit
    /// purge, never as part of a sync.
    pub fn purge(&self) -> StoreResult<u64> {
        self.backend.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM pending_writes WHERE collection = ?1",
                params![self.collection],
            )?;
            if removed > 0 {
                debug!(collection = %self.collection, removed, "purged pending writes");
            }
            Ok(removed as u64)
        })
    }

    /// Non-destructive snapshot of the queue in FIFO order, for diagnostics.
    pub fn peek_all(&self) -> StoreResult<Vec<PendingWriteAction>> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, action, entity_id, payload, created_at
                 FROM pending_writes WHERE collection = ?1
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![self.collection], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;

            let mut actions = Vec::new();
            for row in rows {
                let (id, action, entity_id, payload, created_at) = row?;
                actions.push(PendingWriteAction {
                    id,
                    collection: self.collection.clone(),
                    action: WriteAction::parse(&action)?,
                    entity_id,
                    payload: decode_payload(payload.as_deref())?,
                    created_at,
                });
            }
            Ok(actions)
        })
    }

    /// Point still-queued actions for `old_id` at `new_id`, payload `_id`
    /// included. Keeps the queue coherent after a create's temp id is
    /// replaced by the server-assigned one.
    pub fn rewrite_entity_id(&self, old_id: &str, new_id: &str) -> StoreResult<u64> {
        self.backend.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, payload FROM pending_writes
                 WHERE collection = ?1 AND entity_id = ?2",
            )?;
            let rows: Vec<(i64, Option<String>)> = stmt
                .query_map(params![self.collection, old_id], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<Result<_, _>>()?;

            for (id, payload) in &rows {
                let payload = match payload.as_deref() {
                    Some(payload) => {
                        let mut value = decode_payload(Some(payload))?
                            .unwrap_or(Value::Null);
                        entity::set_entity_id(&mut value, new_id);
                        Some(serde_json::to_string(&value).map_err(|e| {
                            StoreError::cache_write(codes::CACHE_STORAGE, e.to_string())
                        })?)
                    }
                    None => None,
                };
                conn.execute(
                    "UPDATE pending_writes SET entity_id = ?1, payload = ?2 WHERE id = ?3",
                    params![new_id, payload, id],
                )?;
            }

            if !rows.is_empty() {
                debug!(
                    collection = %self.collection,
                    old_id,
                    new_id,
                    rewritten = rows.len(),
                    "rewrote queued entity id"
                );
            }
            Ok(rows.len() as u64)
        })
    }
}

fn decode_payload(payload: Option<&str>) -> StoreResult<Option<Value>> {
    match payload {
        Some(payload) => serde_json::from_str(payload).map(Some).map_err(|e| {
            StoreError::cache_write(codes::CACHE_STORAGE, format!("corrupt payload: {}", e))
        }),
        None => Ok(None),
    }
}
