//! The subset of the root configuration the orchestrator needs.

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub message_batch_size: usize,
    pub max_history_messages: u32,
    pub cleanup_interval_minutes: u64,
    pub health_check_interval_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            message_batch_size: 10,
            max_history_messages: 100,
            cleanup_interval_minutes: 5,
            health_check_interval_seconds: 60,
        }
    }
}

/// Capacity of the ingress queue shared between the source gateway tasks and
/// the orchestrator's drain loop.
pub const INGRESS_QUEUE_CAPACITY: usize = 1000;

/// `periodic_sync` cadence and its error backoff.
pub const PERIODIC_SYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);
pub const PERIODIC_SYNC_ERROR_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// `stats_refresh` cadence.
pub const STATS_REFRESH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// `batch_drain`'s unconditional flush cadence when the queue is non-empty.
pub const BATCH_FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5);

/// `ingress_drain`'s dequeue timeout.
pub const INGRESS_DEQUEUE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Age threshold passed to both rate limiters' `clear_old_buckets`.
pub const BUCKET_MAX_AGE: std::time::Duration = std::time::Duration::from_secs(3600);

/// Health check threshold on ingress queue occupancy.
pub const HEALTHY_QUEUE_CEILING: usize = 500;
