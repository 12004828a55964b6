//! Store and queue configuration.

/// Bounds for the offline pending-write queue.
///
/// When the queue is full (by count or bytes), new writes are rejected to
/// keep offline growth bounded; accepted actions are never dropped.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of pending actions per collection (default: 10,000).
    pub max_count: usize,
    /// Maximum total payload bytes per collection (default: 100MB).
    pub max_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_count: 10_000,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

impl QueueConfig {
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            max_count,
            max_bytes,
        }
    }

    /// Limits suited to constrained mobile devices.
    pub fn mobile() -> Self {
        Self {
            max_count: 1_000,
            max_bytes: 10 * 1024 * 1024,
        }
    }

    /// Limits suited to desktop applications.
    pub fn desktop() -> Self {
        Self {
            max_count: 50_000,
            max_bytes: 500 * 1024 * 1024,
        }
    }
}

/// What a push drain does after an action fails against the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PushErrorPolicy {
    /// Keep draining; the failure is reported in the push result.
    #[default]
    Continue,
    /// Stop the drain at the first failure; remaining actions stay queued.
    Stop,
}

/// Per-store configuration. Queue bounds are client-wide (the cache/queue
/// pair is shared by every store on a collection) and live in [`QueueConfig`].
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Request only changes since the last successful fetch for a query,
    /// when the backend supports delta-set fetches. Off by default.
    pub delta_set: bool,
    pub push_error_policy: PushErrorPolicy,
}

impl StoreConfig {
    pub fn with_delta_set(mut self, enabled: bool) -> Self {
        self.delta_set = enabled;
        self
    }

    pub fn with_push_error_policy(mut self, policy: PushErrorPolicy) -> Self {
        self.push_error_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_config_presets() {
        let default = QueueConfig::default();
        assert_eq!(default.max_count, 10_000);
        assert_eq!(default.max_bytes, 100 * 1024 * 1024);

        let mobile = QueueConfig::mobile();
        assert_eq!(mobile.max_count, 1_000);

        let desktop = QueueConfig::desktop();
        assert_eq!(desktop.max_count, 50_000);
    }

    #[test]
    fn test_store_config_builders() {
        let config = StoreConfig::default()
            .with_delta_set(true)
            .with_push_error_policy(PushErrorPolicy::Stop);
        assert!(config.delta_set);
        assert_eq!(config.push_error_policy, PushErrorPolicy::Stop);
    }
}
