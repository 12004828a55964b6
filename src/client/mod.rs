//! The client: explicit construction, owned subsystems, no globals.
//!
//! A [`NimbusClient`] is built through [`NimbusClientBuilder`] and owns the
//! cache registry, the active credential slot, the realtime router, and the
//! transport. Data access goes through per-collection [`DataStore`]s handed
//! out by [`NimbusClient::data_store`].

mod credentials;
mod fetcher;
mod realtime;
mod transport;

pub use credentials::{ActiveCredential, Credential, CredentialStore, InMemoryCredentialStore};
pub use fetcher::{DeltaSetResponse, EntityIdRef, NetworkFetcher, REQUEST_TIME_HEADER};
pub use realtime::{RealtimeMessage, RealtimeRouter};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::CacheManager;
use crate::config::{QueueConfig, StoreConfig};
use crate::entity::Entity;
use crate::error::StoreResult;
use crate::query::FieldMap;
use crate::store::{DataStore, StoreType};

/// Builder for [`NimbusClient`].
pub struct NimbusClientBuilder {
    base_url: String,
    app_name: String,
    cache_path: Option<PathBuf>,
    in_memory: bool,
    transport: Option<Arc<dyn HttpTransport>>,
    queue_config: QueueConfig,
}

impl NimbusClientBuilder {
    pub fn new(base_url: &str, app_name: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            app_name: app_name.to_string(),
            cache_path: None,
            in_memory: false,
            transport: None,
            queue_config: QueueConfig::default(),
        }
    }

    /// Put the cache database at an explicit path instead of the platform
    /// data directory.
    pub fn cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    /// Keep the cache in memory (tests, ephemeral sessions).
    pub fn in_memory(mut self) -> Self {
        self.in_memory = true;
        self
    }

    /// Install a transport other than the default reqwest one.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue_config = config;
        self
    }

    pub fn build(self) -> StoreResult<NimbusClient> {
        let cache = if self.in_memory {
            CacheManager::open_in_memory(self.queue_config)?
        } else if let Some(path) = self.cache_path {
            CacheManager::open(path, self.queue_config)?
        } else {
            CacheManager::open_default(&self.app_name, self.queue_config)?
        };

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        let credential = Arc::new(ActiveCredential::new());
        let fetcher = Arc::new(NetworkFetcher::new(
            &self.base_url,
            transport,
            Arc::clone(&credential),
        ));

        Ok(NimbusClient {
            app_name: self.app_name,
            cache: Arc::new(cache),
            credential,
            fetcher,
            realtime: Arc::new(RealtimeRouter::new()),
        })
    }
}

/// Handle to one backend application: data stores, credentials, realtime.
pub struct NimbusClient {
    app_name: String,
    cache: Arc<CacheManager>,
    credential: Arc<ActiveCredential>,
    fetcher: Arc<NetworkFetcher>,
    realtime: Arc<RealtimeRouter>,
}

impl NimbusClient {
    pub fn builder(base_url: &str, app_name: &str) -> NimbusClientBuilder {
        NimbusClientBuilder::new(base_url, app_name)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// A data store for one collection under the given cache policy, with
    /// the default store configuration.
    pub fn data_store<T: Entity>(
        &self,
        collection: &str,
        store_type: StoreType,
        fields: FieldMap,
    ) -> DataStore<T> {
        self.data_store_with_config(collection, store_type, fields, StoreConfig::default())
    }

    pub fn data_store_with_config<T: Entity>(
        &self,
        collection: &str,
        store_type: StoreType,
        fields: FieldMap,
        config: StoreConfig,
    ) -> DataStore<T> {
        DataStore::new(
            collection,
            store_type,
            fields,
            config,
            &self.cache,
            Arc::clone(&self.fetcher),
        )
    }

    /// Sign a user in: the credential becomes the bearer identity for every
    /// subsequent request.
    pub fn set_active_credential(&self, credential: Credential) {
        self.credential.set(credential);
    }

    /// Sign the active user out. Queued offline writes stay queued.
    pub fn clear_active_credential(&self) {
        self.credential.clear();
    }

    pub fn active_credential(&self) -> Option<Credential> {
        self.credential.current()
    }

    pub fn realtime(&self) -> &RealtimeRouter {
        &self.realtime
    }

    /// Tear the client down: realtime channels close and the cache handle is
    /// released. Idempotent; outstanding stores fail with `CACHE_DISPOSED`.
    pub fn dispose(&self) {
        self.realtime.shutdown();
        self.cache.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityMeta;
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

    #[test]
    fn test_builder_creates_in_memory_client() {
        let client = NimbusClient::builder("http://localhost:7878", "demo")
            .in_memory()
            .build()
            .unwrap();
        assert_eq!(client.app_name(), "demo");

        let _store: DataStore<Book> = client.data_store(
            "books",
            StoreType::Sync,
            FieldMap::new().field("title", "title"),
        );
    }

    #[test]
    fn test_credential_lifecycle() {
        let client = NimbusClient::builder("http://localhost:7878", "demo")
            .in_memory()
            .build()
            .unwrap();

        assert!(client.active_credential().is_none());
        client.set_active_credential(Credential::new("u1", "tok"));
        assert_eq!(client.active_credential().unwrap().user_id, "u1");
        client.clear_active_credential();
        assert!(client.active_credential().is_none());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let client = NimbusClient::builder("http://localhost:7878", "demo")
            .in_memory()
            .build()
            .unwrap();
        client.realtime().initialize();
        client.dispose();
        client.dispose();
        assert!(!client.realtime().is_initialized());
    }
}
