//! Windowed stream creation: per-partition setup tasks with ordered replica
//! fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rsf_common::{FetchConf, PartitionId, Result, RsfError};
use tracing::{debug, error, warn};

use crate::client::{ClientPool, StreamReadRequest};
use crate::context::TaskContext;
use crate::fault::{FaultState, FetchFault};
use crate::location::{Location, MapIndexRange, ShuffleHandle};
use crate::open::OpenStreamResult;
use crate::pool::fetch_pool;
use crate::stream::{CompressionCodec, PartitionStream, StreamCloser};

/// Outcome of one partition's stream creation, keyed by partition id in the
/// registry. Entries are inserted at most once and never overwritten.
pub(crate) enum RegistryEntry {
    /// Partition had no registered location; the upstream stage produced no
    /// rows for it. Filtered out of the yielded sequence.
    Empty,
    Open(PartitionStream),
}

/// Ledger of every closer handed out by this pipeline instance. Closers
/// registered after shutdown are closed on the spot.
#[derive(Default)]
pub(crate) struct StreamCleanup {
    shutdown: AtomicBool,
    closers: Mutex<Vec<StreamCloser>>,
}

impl StreamCleanup {
    pub(crate) fn register(&self, closer: StreamCloser) {
        if self.shutdown.load(Ordering::Acquire) {
            closer.close();
            return;
        }
        self.closers.lock().push(closer);
    }

    pub(crate) fn close_all(&self) {
        self.shutdown.store(true, Ordering::Release);
        for closer in self.closers.lock().drain(..) {
            closer.close();
        }
    }
}

/// State shared between the fetch iterator and its creation tasks.
pub(crate) struct PipelineShared {
    pub(crate) shuffle: ShuffleHandle,
    pub(crate) shuffle_key: String,
    pub(crate) conf: FetchConf,
    pub(crate) fault: FaultState,
    pub(crate) registry: Mutex<HashMap<u32, RegistryEntry>>,
    /// Ordered replica locations per partition in the requested range.
    pub(crate) locations: HashMap<u32, Vec<Location>>,
    pub(crate) tokens: OpenStreamResult,
    pub(crate) mapper_attempts: Arc<Vec<u32>>,
    pub(crate) map_range: MapIndexRange,
    pub(crate) clients: Arc<ClientPool>,
    pub(crate) cleanup: Arc<StreamCleanup>,
    pub(crate) task: Arc<dyn TaskContext>,
}

/// Submit one partition's creation task to the shared pool.
///
/// The caller bounds how many of these are outstanding (the creation window);
/// the pool additionally bounds how many run at once process-wide. A failed
/// partition records a fault and leaves its registry slot empty; it must not
/// stall the other partitions.
pub(crate) fn submit_creation(shared: &Arc<PipelineShared>, partition_id: u32) {
    let shared = Arc::clone(shared);
    let pool = fetch_pool(shared.conf.worker_pool_size);
    tokio::spawn(async move {
        let _permit = match pool.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        match create_partition_stream(&shared, partition_id).await {
            Ok(entry) => {
                shared
                    .registry
                    .lock()
                    .entry(partition_id)
                    .or_insert(entry);
            }
            Err(e) => {
                if !shared.fault.is_faulted() {
                    shared.fault.capture(FetchFault::classify(partition_id, e));
                }
            }
        }
    });
}

/// Materialize one partition's stream: attempt its replicas in order, first
/// success wins, remaining replicas are never contacted.
async fn create_partition_stream(
    shared: &Arc<PipelineShared>,
    partition_id: u32,
) -> Result<RegistryEntry> {
    let locations = match shared.locations.get(&partition_id) {
        Some(locations) if !locations.is_empty() => locations,
        _ => return Ok(RegistryEntry::Empty),
    };

    let mut last_error: Option<RsfError> = None;
    for (replica, location) in locations.iter().enumerate() {
        let Some(token) = shared.tokens.get(location) else {
            debug!(
                partition_id,
                replica,
                worker = %location.worker,
                "no stream token for replica; trying next"
            );
            continue;
        };
        let connection = match shared.clients.get(&location.worker) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    partition_id,
                    replica,
                    worker = %location.worker,
                    error = %e,
                    "replica connection lost before stream open; trying next"
                );
                last_error = Some(e);
                continue;
            }
        };
        let request = StreamReadRequest {
            shuffle_id: shared.shuffle.shuffle_id,
            partition_id: PartitionId(partition_id),
            token: *token,
            map_range: shared.map_range,
            mapper_attempts: Arc::clone(&shared.mapper_attempts),
        };
        match connection.open_partition_stream(request).await {
            Ok(mut stream) => {
                // Writers in this protocol ship raw payloads; the worker-side
                // default codec must not apply to fetched data.
                stream.set_codec(CompressionCodec::None);
                stream.attach_metrics(Arc::clone(&shared.task), shared.shuffle_key.clone());
                shared.cleanup.register(stream.closer());
                debug!(
                    partition_id,
                    replica,
                    worker = %location.worker,
                    "partition stream opened"
                );
                return Ok(RegistryEntry::Open(stream));
            }
            Err(e) => {
                warn!(
                    partition_id,
                    replica,
                    worker = %location.worker,
                    error = %e,
                    "replica stream open failed; trying next"
                );
                last_error = Some(e);
            }
        }
    }

    error!(
        partition_id,
        replicas = locations.len(),
        "all replicas failed to open"
    );
    Err(last_error.unwrap_or_else(|| {
        RsfError::StreamOpen(format!(
            "partition {partition_id}: no replica produced a stream token"
        ))
    }))
}
