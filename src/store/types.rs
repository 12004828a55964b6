//! Store policy and operation result types.

use serde_json::Value;

use crate::sync::WriteAction;

/// The cache policy a [`DataStore`](super::DataStore) runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    /// Remote only. No local cache, no queue; reads and writes fail outright
    /// when the backend is unreachable.
    Network,
    /// The cache is the source of truth. Reads never touch the network;
    /// writes queue locally until an explicit push.
    Sync,
    /// Cache-first reads with a network refresh merged in; writes queue like
    /// `Sync`.
    Cache,
    /// Network when reachable, cache when not: reads and writes try the
    /// backend first and fall back to the offline path on transport failure.
    Auto,
}

impl StoreType {
    /// Whether stores of this type carry a local cache/queue pair.
    pub fn has_local_state(&self) -> bool {
        !matches!(self, StoreType::Network)
    }
}

/// One failed action from a push drain. The action was re-queued at the
/// tail, so nothing is lost; `code`/`message` mirror the underlying error.
#[derive(Debug, Clone)]
pub struct PushError {
    pub entity_id: String,
    pub action: WriteAction,
    pub code: &'static str,
    pub message: String,
}

/// Summary of a push drain. `push_count` always equals the number of actions
/// popped from the queue, applied or not, so callers can audit the drain.
#[derive(Debug, Clone, Default)]
pub struct PushResult {
    pub push_count: u64,
    pub pushed_entities: Vec<Value>,
    pub errors: Vec<PushError>,
}

impl PushResult {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Summary of a full sync: the push leg, the pull leg's entity count, and
/// sync-level errors (a pull skipped because the queue stayed dirty).
#[derive(Debug, Clone, Default)]
pub struct SyncResult {
    pub push: PushResult,
    pub pull_count: u64,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn push_count(&self) -> u64 {
        self.push.push_count
    }

    pub fn pushed_entities(&self) -> &[Value] {
        &self.push.pushed_entities
    }

    pub fn is_clean(&self) -> bool {
        self.push.is_clean() && self.errors.is_empty()
    }
}
