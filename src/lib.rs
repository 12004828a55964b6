//! Offline-first client SDK core for the Nimbus document store.
//!
//! The crate centers on the [`DataStore`]: a per-collection facade that
//! routes reads and writes between a durable local cache and the remote
//! store according to a [`StoreType`] policy. Writes issued while offline
//! land in a durable FIFO [`SyncQueue`](sync::SyncQueue) and are replayed in
//! order by [`DataStore::push`]; [`DataStore::pull`] refreshes the cache
//! (fetching only changes since the last successful request when delta
//! fetches are enabled). Typed queries are translated to the backend's
//! Mongo-style wire dialect through an explicit member-to-wire-name map.
//!
//! # Example
//!
//! ```rust,no_run
//! use nimbus_client::{
//!     Entity, EntityMeta, FieldMap, NimbusClient, Query, StoreType,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Book {
//!     #[serde(flatten)]
//!     meta: EntityMeta,
//!     title: String,
//! }
//!
//! impl Entity for Book {
//!     fn entity_id(&self) -> Option<&str> {
//!         self.meta.entity_id()
//!     }
//!     fn set_entity_id(&mut self, id: String) {
//!         self.meta.set_entity_id(id);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), nimbus_client::StoreError> {
//!     let client = NimbusClient::builder("https://api.example.com", "myapp").build()?;
//!     let books = client.data_store::<Book>(
//!         "books",
//!         StoreType::Sync,
//!         FieldMap::new().field("title", "title"),
//!     );
//!
//!     // Works offline; the write queues until the next push.
//!     books
//!         .save(&Book {
//!             meta: EntityMeta::default(),
//!             title: "Dune".to_string(),
//!         })
//!         .await?;
//!
//!     let hits = books.find(&Query::new().eq("title", "Dune")).await?;
//!     println!("{} match(es), {} pending", hits.len(), books.sync_count()?);
//!
//!     books.sync(None, None).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod store;
pub mod sync;

pub use cache::{CacheManager, CollectionSlot, LocalCache, QueryCacheItem};
pub use client::{
    ActiveCredential, Credential, CredentialStore, DeltaSetResponse, EntityIdRef, HttpRequest,
    HttpResponse, HttpTransport, InMemoryCredentialStore, Method, NetworkFetcher, NimbusClient,
    NimbusClientBuilder, RealtimeMessage, RealtimeRouter, ReqwestTransport,
};
pub use config::{PushErrorPolicy, QueueConfig, StoreConfig};
pub use entity::{Acl, Entity, EntityMeta, Metadata};
pub use error::{StoreError, StoreResult};
pub use query::{
    FieldMap, FilterNode, Literal, Query, QueryTranslator, SortDirection, TranslatedQuery,
};
pub use store::{DataStore, PushError, PushResult, StoreType, SyncResult};
pub use sync::{PendingWriteAction, SyncQueue, WriteAction};
