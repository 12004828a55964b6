use thiserror::Error;

/// Stable machine-readable codes carried by [`StoreError::CacheWrite`].
pub mod codes {
    /// An entity reached the cache without a usable string `_id`, or the
    /// underlying insert/update failed.
    pub const CACHE_SAVE_INSERT_ENTITY: &str = "CACHE_SAVE_INSERT_ENTITY";
    /// A cache delete statement failed at the storage layer.
    pub const CACHE_DELETE_ENTITY: &str = "CACHE_DELETE_ENTITY";
    /// Generic storage-layer failure (statement preparation, row decode).
    pub const CACHE_STORAGE: &str = "CACHE_STORAGE";
    /// The pending-write queue rejected a push because a configured bound
    /// (count or bytes) was reached.
    pub const SYNC_QUEUE_FULL: &str = "SYNC_QUEUE_FULL";
    /// The cache manager was disposed; no further storage access is possible.
    pub const CACHE_DISPOSED: &str = "CACHE_DISPOSED";
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cache write failed ({code}): {reason}")]
    CacheWrite { code: &'static str, reason: String },

    #[error("cache query failed: {0}")]
    CacheQuery(String),

    #[error("sync precondition violated: {0}")]
    SyncPrecondition(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("query translation failed: {0}")]
    Translation(String),

    #[error("realtime router error: {0}")]
    Realtime(String),
}

impl StoreError {
    pub(crate) fn cache_write(code: &'static str, reason: impl Into<String>) -> Self {
        StoreError::CacheWrite {
            code,
            reason: reason.into(),
        }
    }

    /// Machine-readable error kind. `CacheWrite` reports its site-specific
    /// code; every other variant reports a fixed kind string.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::CacheWrite { code, .. } => code,
            StoreError::CacheQuery(_) => "CACHE_QUERY",
            StoreError::SyncPrecondition(_) => "SYNC_PRECONDITION",
            StoreError::Network(_) => "NETWORK",
            StoreError::Backend { .. } => "BACKEND",
            StoreError::Translation(_) => "TRANSLATION",
            StoreError::Realtime(_) => "REALTIME",
        }
    }

    /// Transport-level failures are the only errors a caller may blindly
    /// retry; everything else needs intervention first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Network(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::cache_write(codes::CACHE_STORAGE, err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::cache_write(codes::CACHE_STORAGE, err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
