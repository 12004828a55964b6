//! Realtime message routing.
//!
//! The router is constructed explicitly and owned by the client — there is
//! no process-global instance. It must be initialized before use and routes
//! incoming messages to per-collection broadcast subscribers.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

const CHANNEL_CAPACITY: usize = 64;

/// A message delivered over the realtime connection for one collection.
#[derive(Debug, Clone)]
pub struct RealtimeMessage {
    pub collection: String,
    pub payload: Value,
}

/// Per-collection fan-out of realtime messages.
///
/// Lifecycle: [`initialize`](RealtimeRouter::initialize) before the first
/// subscribe or route, [`shutdown`](RealtimeRouter::shutdown) on teardown
/// (drops every channel, waking subscribers with a closed stream). Both are
/// idempotent; use while uninitialized is a typed error.
#[derive(Default)]
pub struct RealtimeRouter {
    channels: RwLock<Option<HashMap<String, broadcast::Sender<RealtimeMessage>>>>,
}

impl RealtimeRouter {
    /// A router in the uninitialized state.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initialize(&self) {
        let mut channels = self.channels.write();
        if channels.is_none() {
            *channels = Some(HashMap::new());
            info!("realtime router initialized");
        }
    }

    pub fn shutdown(&self) {
        let mut channels = self.channels.write();
        if channels.take().is_some() {
            info!("realtime router shut down");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.channels.read().is_some()
    }

    /// Subscribe to a collection's realtime messages.
    pub fn subscribe(&self, collection: &str) -> StoreResult<broadcast::Receiver<RealtimeMessage>> {
        let mut channels = self.channels.write();
        let channels = channels
            .as_mut()
            .ok_or_else(|| StoreError::Realtime("router is not initialized".to_string()))?;
        let sender = channels
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    /// Dispatch an incoming message to its collection's subscribers,
    /// returning how many received it. A collection nobody subscribed to
    /// delivers to zero receivers; that is not an error.
    pub fn route(&self, message: RealtimeMessage) -> StoreResult<usize> {
        let channels = self.channels.read();
        let channels = channels
            .as_ref()
            .ok_or_else(|| StoreError::Realtime("router is not initialized".to_string()))?;
        let delivered = match channels.get(&message.collection) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        };
        debug!(delivered, "routed realtime message");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_uninitialized_use_is_an_error() {
        let router = RealtimeRouter::new();
        assert!(!router.is_initialized());

        let err = router.subscribe("books").unwrap_err();
        assert_eq!(err.code(), "REALTIME");

        let err = router
            .route(RealtimeMessage {
                collection: "books".to_string(),
                payload: json!({}),
            })
            .unwrap_err();
        assert_eq!(err.code(), "REALTIME");
    }

    #[test]
    fn test_route_reaches_collection_subscribers_only() {
        let router = RealtimeRouter::new();
        router.initialize();

        let mut books = router.subscribe("books").unwrap();
        let mut authors = router.subscribe("authors").unwrap();

        let delivered = router
            .route(RealtimeMessage {
                collection: "books".to_string(),
                payload: json!({"_id": "1"}),
            })
            .unwrap();
        assert_eq!(delivered, 1);

        let message = books.try_recv().unwrap();
        assert_eq!(message.payload["_id"], "1");
        assert!(authors.try_recv().is_err());
    }

    #[test]
    fn test_route_without_subscribers_delivers_zero() {
        let router = RealtimeRouter::new();
        router.initialize();
        let delivered = router
            .route(RealtimeMessage {
                collection: "books".to_string(),
                payload: json!({}),
            })
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_lifecycle_is_idempotent() {
        let router = RealtimeRouter::new();
        router.initialize();
        router.initialize();
        assert!(router.is_initialized());

        router.shutdown();
        router.shutdown();
        assert!(!router.is_initialized());

        // Re-initialization starts a fresh set of channels.
        router.initialize();
        assert!(router.subscribe("books").is_ok());
    }
}
