use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Fetch pipeline resource/behavior controls.
pub struct FetchConf {
    /// Size of the process-wide pool executing open calls and stream creations.
    pub worker_pool_size: usize,
    /// Number of partitions whose streams may be under setup ahead of the consumer.
    pub creation_window: usize,
    /// Per-worker timeout for the batched open-stream round trip.
    pub open_stream_timeout_ms: u64,
    /// Iterator re-poll interval while a partition's stream is not yet registered.
    pub registry_poll_interval_ms: u64,
    /// Report replica exhaustion as a stage-retryable fetch failure.
    pub throws_fetch_failure: bool,
    /// Ask workers to serve file-local reads where the data is co-located.
    pub prefer_local_read: bool,
    /// Connection failures before a worker address is excluded from selection.
    pub exclusion_failure_threshold: u32,
}

impl Default for FetchConf {
    fn default() -> Self {
        Self {
            worker_pool_size: 8,
            creation_window: 4,
            open_stream_timeout_ms: 30_000,
            registry_poll_interval_ms: 5,
            throws_fetch_failure: true,
            prefer_local_read: false,
            exclusion_failure_threshold: 3,
        }
    }
}
