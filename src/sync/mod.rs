//! Durable pending-write log.
//!
//! Every write issued while a store runs in an offline-capable mode lands
//! here until a push replays it against the backend, in enqueue order.

mod queue;

pub use queue::{PendingWriteAction, SyncQueue, WriteAction};
