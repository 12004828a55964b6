//! The per-collection data store: the cache-policy state machine.
//!
//! A [`DataStore`] combines the local cache, the pending-write queue, and
//! the network fetcher according to its [`StoreType`]. Reads and writes are
//! routed per policy; offline writes queue for a later [`push`](DataStore::push),
//! and [`pull`](DataStore::pull) refreshes the cache from the backend
//! (delta-aware when configured).

mod types;

pub use types::{PushError, PushResult, StoreType, SyncResult};

use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheManager, CollectionSlot};
use crate::client::NetworkFetcher;
use crate::config::{PushErrorPolicy, StoreConfig};
use crate::entity::{self, Entity};
use crate::error::{codes, StoreError, StoreResult};
use crate::query::{FieldMap, Query, QueryTranslator, TranslatedQuery};
use crate::sync::{PendingWriteAction, WriteAction};

/// Typed facade over one collection, parameterized by cache policy.
pub struct DataStore<T: Entity> {
    collection: String,
    store_type: StoreType,
    config: StoreConfig,
    translator: QueryTranslator,
    slot: Option<Arc<CollectionSlot>>,
    fetcher: Arc<NetworkFetcher>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> DataStore<T> {
    pub(crate) fn new(
        collection: &str,
        store_type: StoreType,
        fields: FieldMap,
        config: StoreConfig,
        cache: &CacheManager,
        fetcher: Arc<NetworkFetcher>,
    ) -> Self {
        // A Network store never touches local state, so it gets no slot and
        // every queue-dependent operation fails its precondition up front.
        let slot = store_type
            .has_local_state()
            .then(|| cache.collection(collection));

        Self {
            collection: collection.to_string(),
            store_type,
            config,
            translator: QueryTranslator::new(fields),
            slot,
            fetcher,
            _entity: PhantomData,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn store_type(&self) -> StoreType {
        self.store_type
    }

    /// Entities matching the query, routed per policy.
    pub async fn find(&self, query: &Query) -> StoreResult<Vec<T>> {
        let translated = self.translator.translate(query)?;
        match self.store_type {
            StoreType::Network => {
                let (entities, _) = self.fetcher.find(&self.collection, &translated).await?;
                from_documents(entities)
            }
            StoreType::Sync => {
                let slot = self.require_local("find")?;
                from_documents(slot.cache.find_by_query(&translated)?)
            }
            StoreType::Cache => {
                let slot = self.require_local("find")?;
                let _guard = slot.lock.lock().await;
                match self.refresh_locked(slot, &translated).await {
                    Ok(_) => {}
                    Err(StoreError::Network(reason)) => {
                        warn!(
                            collection = %self.collection,
                            %reason,
                            "network refresh failed, serving cached results"
                        );
                    }
                    Err(other) => return Err(other),
                }
                from_documents(slot.cache.find_by_query(&translated)?)
            }
            StoreType::Auto => match self.fetcher.find(&self.collection, &translated).await {
                Ok((entities, request_time)) => {
                    let slot = self.require_local("find")?;
                    let _guard = slot.lock.lock().await;
                    slot.cache.save_all(&entities)?;
                    slot.cache
                        .set_query_metadata(&translated.query_string(), &request_time)?;
                    from_documents(entities)
                }
                Err(StoreError::Network(reason)) => {
                    warn!(
                        collection = %self.collection,
                        %reason,
                        "network unavailable, falling back to cache"
                    );
                    let slot = self.require_local("find")?;
                    from_documents(slot.cache.find_by_query(&translated)?)
                }
                Err(other) => Err(other),
            },
        }
    }

    /// All entities of the collection.
    pub async fn find_all(&self) -> StoreResult<Vec<T>> {
        self.find(&Query::new()).await
    }

    /// A single entity by id, or `None` when neither the routed source nor
    /// its fallback has it.
    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        match self.store_type {
            StoreType::Network => match self.fetcher.find_by_id(&self.collection, id).await {
                Ok(entity) => Ok(Some(from_document(entity)?)),
                Err(StoreError::Backend { status: 404, .. }) => Ok(None),
                Err(other) => Err(other),
            },
            StoreType::Sync => {
                let slot = self.require_local("find_by_id")?;
                slot.cache.find_by_id(id)?.map(from_document).transpose()
            }
            StoreType::Cache => {
                let slot = self.require_local("find_by_id")?;
                let _guard = slot.lock.lock().await;
                match self.fetcher.find_by_id(&self.collection, id).await {
                    Ok(entity) => {
                        slot.cache.save(&entity)?;
                        Ok(Some(from_document(entity)?))
                    }
                    // Entities created offline live only in the cache until
                    // pushed; a remote miss is not authoritative here.
                    Err(StoreError::Backend { status: 404, .. }) => {
                        slot.cache.find_by_id(id)?.map(from_document).transpose()
                    }
                    Err(StoreError::Network(reason)) => {
                        warn!(
                            collection = %self.collection,
                            %reason,
                            "network refresh failed, serving cached entity"
                        );
                        slot.cache.find_by_id(id)?.map(from_document).transpose()
                    }
                    Err(other) => Err(other),
                }
            }
            StoreType::Auto => match self.fetcher.find_by_id(&self.collection, id).await {
                Ok(entity) => {
                    let slot = self.require_local("find_by_id")?;
                    let _guard = slot.lock.lock().await;
                    slot.cache.save(&entity)?;
                    Ok(Some(from_document(entity)?))
                }
                Err(StoreError::Backend { status: 404, .. }) => Ok(None),
                Err(StoreError::Network(reason)) => {
                    warn!(
                        collection = %self.collection,
                        %reason,
                        "network unavailable, falling back to cache"
                    );
                    let slot = self.require_local("find_by_id")?;
                    slot.cache.find_by_id(id)?.map(from_document).transpose()
                }
                Err(other) => Err(other),
            },
        }
    }

    /// Save an entity. Offline-capable policies write the cache and enqueue
    /// the action atomically with respect to the collection lock; a failure
    /// leaves neither half committed. The returned entity carries its
    /// finalized id (server-assigned under `Network`, temporary otherwise
    /// for new entities).
    pub async fn save(&self, item: &T) -> StoreResult<T> {
        let mut doc = to_document(item)?;
        // A new entity gets a temporary local id and queues as a create; an
        // entity that already carries an id (temporary ones included) queues
        // as an update. Whether a queued action really applies as a create is
        // decided at push time, by whether its id is still temporary.
        let (id, action) = match entity::entity_id_of(&doc) {
            Some(id) => (id.to_string(), WriteAction::Put),
            None => (entity::temp_id(), WriteAction::Post),
        };
        entity::set_entity_id(&mut doc, &id);

        match self.store_type {
            StoreType::Network => {
                let saved = self.network_save(&doc, &id, action).await?;
                from_document(saved)
            }
            StoreType::Sync | StoreType::Cache => self.offline_save(doc, &id, action).await,
            // An entity still on a temporary id has its create queued; a later
            // write for it must stay behind that create, not overtake it on
            // the wire.
            StoreType::Auto if action == WriteAction::Put && entity::is_temp_id(&id) => {
                self.offline_save(doc, &id, action).await
            }
            StoreType::Auto => match self.network_save(&doc, &id, action).await {
                Ok(saved) => {
                    let slot = self.require_local("save")?;
                    let _guard = slot.lock.lock().await;
                    slot.cache.save(&saved)?;
                    from_document(saved)
                }
                Err(StoreError::Network(reason)) => {
                    warn!(
                        collection = %self.collection,
                        %reason,
                        "network unavailable, queueing write locally"
                    );
                    self.offline_save(doc, &id, action).await
                }
                Err(other) => Err(other),
            },
        }
    }

    /// Delete an entity by id, returning the deletion count (0 or 1).
    pub async fn delete(&self, id: &str) -> StoreResult<u64> {
        match self.store_type {
            StoreType::Network => self.fetcher.delete(&self.collection, id).await,
            StoreType::Sync | StoreType::Cache => self.offline_delete(id).await,
            // The backend has never seen a temporary id; the delete belongs in
            // the queue, after the entity's still-pending create.
            StoreType::Auto if entity::is_temp_id(id) => self.offline_delete(id).await,
            StoreType::Auto => match self.fetcher.delete(&self.collection, id).await {
                Ok(count) => {
                    let slot = self.require_local("delete")?;
                    let _guard = slot.lock.lock().await;
                    slot.cache.delete(id)?;
                    Ok(count)
                }
                Err(StoreError::Network(reason)) => {
                    warn!(
                        collection = %self.collection,
                        %reason,
                        "network unavailable, queueing delete locally"
                    );
                    self.offline_delete(id).await
                }
                Err(other) => Err(other),
            },
        }
    }

    /// Drain the pending-write queue in FIFO order, applying each action to
    /// the backend.
    ///
    /// Per-item network and backend failures are captured in the result and
    /// the failed action is re-queued at the tail (relative order against
    /// still-queued actions shifts; nothing is lost). The configured
    /// [`PushErrorPolicy`] decides whether the drain continues past a
    /// failure. Cancellation is honored between items: applied actions stay
    /// applied, unpopped actions stay queued.
    pub async fn push(&self, cancel: Option<&CancellationToken>) -> StoreResult<PushResult> {
        let slot = self.require_local("push")?;
        let _guard = slot.lock.lock().await;

        let mut result = PushResult::default();
        loop {
            if cancel.map(CancellationToken::is_cancelled).unwrap_or(false) {
                debug!(
                    collection = %self.collection,
                    applied = result.push_count,
                    "push cancelled, remaining actions stay queued"
                );
                break;
            }
            let Some(action) = slot.queue.pop()? else {
                break;
            };
            result.push_count += 1;

            match self.apply_action(slot, &action).await {
                Ok(Some(saved)) => result.pushed_entities.push(saved),
                Ok(None) => {}
                Err(err @ (StoreError::Network(_) | StoreError::Backend { .. })) => {
                    warn!(
                        collection = %self.collection,
                        entity_id = %action.entity_id,
                        action = %action.action,
                        error = %err,
                        "pending write failed, re-queueing"
                    );
                    slot.queue
                        .push(action.action, &action.entity_id, action.payload.as_ref())?;
                    result.errors.push(PushError {
                        entity_id: action.entity_id,
                        action: action.action,
                        code: err.code(),
                        message: err.to_string(),
                    });
                    if self.config.push_error_policy == PushErrorPolicy::Stop {
                        break;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Ok(result)
    }

    /// Refresh the cache from the backend for a query. Requires a clean
    /// queue: local changes must be pushed first so the refresh cannot
    /// overwrite them.
    pub async fn pull(
        &self,
        query: Option<&Query>,
        cancel: Option<&CancellationToken>,
    ) -> StoreResult<u64> {
        let slot = self.require_local("pull")?;
        let _guard = slot.lock.lock().await;

        let pending = slot.queue.count()?;
        if pending > 0 {
            return Err(StoreError::SyncPrecondition(format!(
                "{} pending local change(s) must be pushed before a pull",
                pending
            )));
        }
        if cancel.map(CancellationToken::is_cancelled).unwrap_or(false) {
            return Ok(0);
        }

        let translated = match query {
            Some(query) => self.translator.translate(query)?,
            None => TranslatedQuery::unfiltered(),
        };
        self.refresh_locked(slot, &translated).await
    }

    /// Push, then pull when the push drained the queue clean. A queue left
    /// dirty by the push skips the pull and records why.
    pub async fn sync(
        &self,
        query: Option<&Query>,
        cancel: Option<&CancellationToken>,
    ) -> StoreResult<SyncResult> {
        let slot = self.require_local("sync")?;

        let push = self.push(cancel).await?;
        let mut result = SyncResult {
            push,
            pull_count: 0,
            errors: Vec::new(),
        };

        let remaining = slot.queue.count()?;
        if remaining > 0 {
            let message = format!(
                "pull skipped: {} action(s) still queued after push",
                remaining
            );
            warn!(collection = %self.collection, %message, "sync incomplete");
            result.errors.push(message);
        } else {
            result.pull_count = self.pull(query, cancel).await?;
        }
        Ok(result)
    }

    /// Discard every pending action without applying it. This throws local
    /// writes away; it exists for the caller who explicitly wants that.
    pub async fn purge(&self) -> StoreResult<u64> {
        let slot = self.require_local("purge")?;
        let _guard = slot.lock.lock().await;
        slot.queue.purge()
    }

    /// Number of local writes waiting to be pushed.
    pub fn sync_count(&self) -> StoreResult<u64> {
        let slot = self.require_local("sync_count")?;
        slot.queue.count()
    }

    fn require_local(&self, operation: &str) -> StoreResult<&Arc<CollectionSlot>> {
        self.slot.as_ref().ok_or_else(|| {
            StoreError::SyncPrecondition(format!(
                "{} is not available on a Network-type store",
                operation
            ))
        })
    }

    async fn network_save(&self, doc: &Value, id: &str, action: WriteAction) -> StoreResult<Value> {
        if action == WriteAction::Post || entity::is_temp_id(id) {
            let mut body = doc.clone();
            entity::clear_entity_id(&mut body);
            self.fetcher.create(&self.collection, &body).await
        } else {
            self.fetcher.update(&self.collection, id, doc).await
        }
    }

    async fn offline_save(&self, mut doc: Value, id: &str, action: WriteAction) -> StoreResult<T> {
        let slot = self.require_local("save")?;
        let _guard = slot.lock.lock().await;

        entity::touch_metadata(&mut doc);
        let previous = slot.cache.find_by_id(id)?;
        slot.cache.save(&doc)?;

        if let Err(err) = slot.queue.push(action, id, Some(&doc)) {
            // Undo the cache write so a failed save commits nothing.
            match previous {
                Some(previous) => {
                    slot.cache.save(&previous)?;
                }
                None => {
                    slot.cache.delete(id)?;
                }
            }
            return Err(err);
        }
        from_document(doc)
    }

    async fn offline_delete(&self, id: &str) -> StoreResult<u64> {
        let slot = self.require_local("delete")?;
        let _guard = slot.lock.lock().await;

        let previous = slot.cache.find_by_id(id)?;
        let removed = slot.cache.delete(id)?;
        if removed {
            if let Err(err) = slot.queue.push(WriteAction::Delete, id, None) {
                if let Some(previous) = previous {
                    slot.cache.save(&previous)?;
                }
                return Err(err);
            }
        }
        Ok(removed as u64)
    }

    async fn apply_action(
        &self,
        slot: &CollectionSlot,
        action: &PendingWriteAction,
    ) -> StoreResult<Option<Value>> {
        match action.action {
            WriteAction::Post | WriteAction::Put => {
                let payload = queued_payload(action)?;

                // An id that is still temporary means the backend has never
                // seen this entity: apply as a create, then substitute the
                // server-assigned id in the cache and in any still-queued
                // actions for the old id.
                if entity::is_temp_id(&action.entity_id) {
                    let mut body = payload.clone();
                    entity::clear_entity_id(&mut body);

                    let saved = self.fetcher.create(&self.collection, &body).await?;
                    slot.cache.replace_id(&action.entity_id, &saved)?;
                    if let Some(new_id) = entity::entity_id_of(&saved) {
                        slot.queue.rewrite_entity_id(&action.entity_id, new_id)?;
                    }
                    return Ok(Some(saved));
                }

                let saved = if action.action == WriteAction::Post {
                    self.fetcher.create(&self.collection, payload).await?
                } else {
                    self.fetcher
                        .update(&self.collection, &action.entity_id, payload)
                        .await?
                };
                slot.cache.save(&saved)?;
                Ok(Some(saved))
            }
            WriteAction::Delete => {
                self.fetcher.delete(&self.collection, &action.entity_id).await?;
                // An earlier create in the same drain may have re-materialized
                // the row under the server id; clear it.
                slot.cache.delete(&action.entity_id)?;
                Ok(None)
            }
        }
    }

    async fn refresh_locked(
        &self,
        slot: &CollectionSlot,
        translated: &TranslatedQuery,
    ) -> StoreResult<u64> {
        let key = translated.query_string();

        if self.config.delta_set {
            if let Some(item) = slot.cache.query_metadata(&key)? {
                let (delta, request_time) = self
                    .fetcher
                    .find_delta(&self.collection, translated, &item.last_request_time)
                    .await?;
                slot.cache.save_all(&delta.changed)?;
                for deleted in &delta.deleted {
                    slot.cache.delete(&deleted.id)?;
                }
                slot.cache.set_query_metadata(&key, &request_time)?;
                debug!(
                    collection = %self.collection,
                    changed = delta.changed.len(),
                    deleted = delta.deleted.len(),
                    "merged delta fetch"
                );
                return Ok(delta.changed.len() as u64);
            }
        }

        let (entities, request_time) = self.fetcher.find(&self.collection, translated).await?;
        let count = entities.len() as u64;
        slot.cache.save_all(&entities)?;
        slot.cache.set_query_metadata(&key, &request_time)?;
        Ok(count)
    }
}

fn to_document<T: Entity>(item: &T) -> StoreResult<Value> {
    let doc = serde_json::to_value(item)?;
    if !doc.is_object() {
        return Err(StoreError::cache_write(
            codes::CACHE_SAVE_INSERT_ENTITY,
            "entity must serialize to a JSON object",
        ));
    }
    Ok(doc)
}

fn from_document<T: Entity>(doc: Value) -> StoreResult<T> {
    Ok(serde_json::from_value(doc)?)
}

fn from_documents<T: Entity>(docs: Vec<Value>) -> StoreResult<Vec<T>> {
    docs.into_iter().map(from_document).collect()
}

fn queued_payload(action: &PendingWriteAction) -> StoreResult<&Value> {
    action.payload.as_ref().ok_or_else(|| {
        StoreError::cache_write(
            codes::CACHE_STORAGE,
            format!(
                "queued {} for '{}' lost its payload",
                action.action, action.entity_id
            ),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ActiveCredential, HttpRequest, HttpResponse, HttpTransport};
    use crate::config::QueueConfig;
    use crate::entity::EntityMeta;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Book {
        #[serde(flatten)]
        meta: EntityMeta,
        title: String,
    }

    impl Entity for Book {
        fn entity_id(&self) -> Option<&str> {
            self.meta.entity_id()
        }

        fn set_entity_id(&mut self, id: String) {
            self.meta.set_entity_id(id);
        }
    }

    /// Transport that panics on use: proves an operation made no network call.
    struct UnreachableTransport;

    #[async_trait]
    impl HttpTransport for UnreachableTransport {
        async fn send(&self, request: HttpRequest) -> StoreResult<HttpResponse> {
            panic!("unexpected network call: {} {}", request.method, request.url);
        }
    }

    fn network_store() -> DataStore<Book> {
        let cache = CacheManager::open_in_memory(QueueConfig::default()).unwrap();
        let fetcher = Arc::new(NetworkFetcher::new(
            "http://localhost:7878",
            Arc::new(UnreachableTransport),
            Arc::new(ActiveCredential::new()),
        ));
        DataStore::new(
            "books",
            StoreType::Network,
            FieldMap::new().field("title", "title"),
            StoreConfig::default(),
            &cache,
            fetcher,
        )
    }

    #[test]
    fn test_queue_operations_rejected_on_network_store_without_io() {
        let store = network_store();

        tokio_test::block_on(async {
            let err = store.push(None).await.unwrap_err();
            assert_eq!(err.code(), "SYNC_PRECONDITION");

            let err = store.pull(None, None).await.unwrap_err();
            assert_eq!(err.code(), "SYNC_PRECONDITION");

            let err = store.sync(None, None).await.unwrap_err();
            assert_eq!(err.code(), "SYNC_PRECONDITION");

            let err = store.purge().await.unwrap_err();
            assert_eq!(err.code(), "SYNC_PRECONDITION");
        });

        let err = store.sync_count().unwrap_err();
        assert_eq!(err.code(), "SYNC_PRECONDITION");
    }

    #[test]
    fn test_sync_store_reads_never_touch_network() {
        let cache = CacheManager::open_in_memory(QueueConfig::default()).unwrap();
        let fetcher = Arc::new(NetworkFetcher::new(
            "http://localhost:7878",
            Arc::new(UnreachableTransport),
            Arc::new(ActiveCredential::new()),
        ));
        let store: DataStore<Book> = DataStore::new(
            "books",
            StoreType::Sync,
            FieldMap::new().field("title", "title"),
            StoreConfig::default(),
            &cache,
            fetcher,
        );

        tokio_test::block_on(async {
            let saved = store
                .save(&Book {
                    meta: EntityMeta::default(),
                    title: "Dune".to_string(),
                })
                .await
                .unwrap();
            let id = saved.entity_id().unwrap().to_string();
            assert!(entity::is_temp_id(&id));

            let found = store.find_by_id(&id).await.unwrap().unwrap();
            assert_eq!(found.title, "Dune");

            let all = store.find_all().await.unwrap();
            assert_eq!(all.len(), 1);
            assert_eq!(store.sync_count().unwrap(), 1);
        });
    }
}
