//! Public fetch entry point and the partition-ordered consumption iterator.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rsf_common::{FetchConf, PartitionId, Result, RsfError, global_metrics};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::client::{ClientFactory, ClientPool, WorkerExclusions};
use crate::context::TaskContext;
use crate::create::{PipelineShared, RegistryEntry, StreamCleanup, submit_creation};
use crate::fault::{FaultKind, FaultState, FetchFault};
use crate::group::group_locations;
use crate::location::{LocationService, MapIndexRange, PartitionRange, ShuffleHandle};
use crate::open::open_worker_batches;
use crate::stream::PartitionStream;

/// Client-side shuffle fetch pipeline.
///
/// One fetcher is shared by the tasks of a consuming engine; each
/// [`ShuffleFetcher::fetch`] call builds an independent pipeline instance for
/// one shuffle id and one partition range. Pooled connections and the worker
/// exclusion list are the only state shared between instances.
pub struct ShuffleFetcher {
    conf: FetchConf,
    locations: Arc<dyn LocationService>,
    clients: Arc<ClientPool>,
    exclusions: Arc<WorkerExclusions>,
}

impl ShuffleFetcher {
    pub fn new(
        conf: FetchConf,
        location_service: Arc<dyn LocationService>,
        client_factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let exclusions = Arc::new(WorkerExclusions::new(conf.exclusion_failure_threshold));
        Self {
            clients: Arc::new(ClientPool::new(client_factory)),
            locations: location_service,
            exclusions,
            conf,
        }
    }

    /// Worker exclusion list, shared with other fetchers if desired.
    pub fn exclusions(&self) -> Arc<WorkerExclusions> {
        Arc::clone(&self.exclusions)
    }

    /// Open a fetch pipeline for `range` of `shuffle` and return the lazy
    /// sequence of `(partition id, stream)` pairs, consumed exactly once in
    /// ascending partition order.
    ///
    /// Discovery happens here; stream opening and creation are pipelined
    /// behind the returned iterator rather than completed up front.
    pub async fn fetch(
        &self,
        shuffle: ShuffleHandle,
        range: PartitionRange,
        map_range: Option<MapIndexRange>,
        task: Arc<dyn TaskContext>,
    ) -> Result<FetchIterator> {
        let shuffle_key = shuffle.shuffle_key();
        info!(
            shuffle_key = %shuffle_key,
            start = range.start(),
            end = range.end(),
            "shuffle fetch started"
        );
        if range.is_empty() {
            return Ok(FetchIterator::without_pipeline(
                shuffle,
                shuffle_key,
                range,
                self.conf.clone(),
                Arc::clone(&self.locations),
                task,
            ));
        }

        let groups = match self
            .locations
            .resolve_locations(shuffle.shuffle_id, PartitionId(range.start()))
            .await
        {
            Ok(groups) => groups,
            // Interruption/timeout is a cancellation signal, not a data
            // failure: pass it through unconverted. Everything else blocks
            // the whole range and escalates as a fetch failure for the first
            // requested partition.
            Err(e @ RsfError::DiscoveryTransient(_)) => return Err(e),
            Err(e) => {
                let fault = FetchFault::classify(range.start(), e);
                return Err(escalate_fault(
                    &self.conf,
                    self.locations.as_ref(),
                    shuffle,
                    &fault,
                )
                .await);
            }
        };

        if groups.mapper_count() == 0 {
            debug!(
                shuffle_key = %shuffle_key,
                "shuffle has no mappers; every partition yields an empty stream"
            );
            return Ok(FetchIterator::without_pipeline(
                shuffle,
                shuffle_key,
                range,
                self.conf.clone(),
                Arc::clone(&self.locations),
                task,
            ));
        }

        let map_range = map_range.unwrap_or_default();
        let batches = group_locations(
            &groups,
            range,
            map_range,
            self.conf.prefer_local_read,
            &self.clients,
            &self.exclusions,
        );
        let tokens =
            open_worker_batches(&shuffle_key, batches, &self.conf, &self.exclusions).await?;

        let mut locations = HashMap::new();
        for partition_id in range.iter() {
            if let Some(replicas) = groups.partitions.get(&partition_id) {
                locations.insert(partition_id, replicas.clone());
            }
        }

        let shared = Arc::new(PipelineShared {
            shuffle,
            shuffle_key: shuffle_key.clone(),
            conf: self.conf.clone(),
            fault: FaultState::new(),
            registry: Mutex::new(HashMap::new()),
            locations,
            tokens,
            mapper_attempts: Arc::new(groups.mapper_attempts),
            map_range,
            clients: Arc::clone(&self.clients),
            cleanup: Arc::new(StreamCleanup::default()),
            task: Arc::clone(&task),
        });

        // Streams are released on any task outcome, including streams created
        // after the task already terminated.
        let cleanup = Arc::clone(&shared.cleanup);
        task.on_completion(Box::new(move || cleanup.close_all()));

        let window = self.conf.creation_window.max(1) as u32;
        let initial_end = range.start().saturating_add(window).min(range.end());
        for partition_id in range.start()..initial_end {
            submit_creation(&shared, partition_id);
        }

        Ok(FetchIterator {
            pipeline: Some(shared),
            shuffle,
            shuffle_key,
            conf: self.conf.clone(),
            locations: Arc::clone(&self.locations),
            task,
            range,
            next_partition: range.start(),
            window_cursor: initial_end,
            finished: false,
            partitions_yielded: 0,
            wait_millis_total: 0,
        })
    }
}

/// Resolve a captured fault into the error surfaced to the consuming task.
async fn escalate_fault(
    conf: &FetchConf,
    locations: &dyn LocationService,
    shuffle: ShuffleHandle,
    fault: &FetchFault,
) -> RsfError {
    match fault.kind() {
        FaultKind::Transient | FaultKind::Fatal => fault.to_error(),
        FaultKind::FetchFailure => {
            if conf.throws_fetch_failure
                && locations
                    .report_fetch_failure(shuffle.app_shuffle_id, shuffle.shuffle_id)
                    .await
            {
                RsfError::FetchFailure {
                    app_shuffle_id: shuffle.app_shuffle_id,
                    shuffle_id: shuffle.shuffle_id,
                    partition_id: PartitionId(fault.partition_id()),
                }
            } else {
                fault.to_error()
            }
        }
    }
}

/// Lazy, finite, forward-only sequence of `(partition id, stream)` pairs in
/// ascending partition-id order.
///
/// Without a pipeline (empty range, or a shuffle whose mapper count is zero)
/// every partition yields an explicit empty stream with no network activity.
pub struct FetchIterator {
    pipeline: Option<Arc<PipelineShared>>,
    shuffle: ShuffleHandle,
    shuffle_key: String,
    conf: FetchConf,
    locations: Arc<dyn LocationService>,
    task: Arc<dyn TaskContext>,
    range: PartitionRange,
    next_partition: u32,
    window_cursor: u32,
    finished: bool,
    partitions_yielded: u64,
    wait_millis_total: u64,
}

impl FetchIterator {
    fn without_pipeline(
        shuffle: ShuffleHandle,
        shuffle_key: String,
        range: PartitionRange,
        conf: FetchConf,
        locations: Arc<dyn LocationService>,
        task: Arc<dyn TaskContext>,
    ) -> Self {
        Self {
            pipeline: None,
            shuffle,
            shuffle_key,
            conf,
            locations,
            task,
            range,
            next_partition: range.start(),
            window_cursor: range.end(),
            finished: false,
            partitions_yielded: 0,
            wait_millis_total: 0,
        }
    }

    /// Next `(partition id, stream)` pair, or `None` once the range is
    /// exhausted. After an error no further elements are produced.
    pub async fn next(&mut self) -> Option<Result<(PartitionId, PartitionStream)>> {
        loop {
            if self.finished {
                return None;
            }
            if self.next_partition >= self.range.end() {
                self.finish();
                return None;
            }
            let partition_id = self.next_partition;

            let Some(shared) = self.pipeline.as_ref().map(Arc::clone) else {
                self.next_partition += 1;
                return Some(Ok((
                    PartitionId(partition_id),
                    PartitionStream::empty(partition_id),
                )));
            };

            let waited = Instant::now();
            let entry = loop {
                if let Some(entry) = shared.registry.lock().remove(&partition_id) {
                    break entry;
                }
                if let Some(fault) = shared.fault.get() {
                    self.finished = true;
                    let err = escalate_fault(
                        &self.conf,
                        self.locations.as_ref(),
                        self.shuffle,
                        fault,
                    )
                    .await;
                    return Some(Err(err));
                }
                sleep(Duration::from_millis(self.conf.registry_poll_interval_ms)).await;
            };
            let wait_ms = waited.elapsed().as_millis() as u64;
            self.wait_millis_total += wait_ms;
            self.task.add_read_time_millis(wait_ms);

            // Consuming one partition admits exactly one more into setup.
            if self.window_cursor < self.range.end() {
                submit_creation(&shared, self.window_cursor);
                self.window_cursor += 1;
            }
            self.next_partition += 1;

            match entry {
                RegistryEntry::Empty => continue,
                RegistryEntry::Open(stream) => {
                    let closer = stream.closer();
                    self.task.on_completion(Box::new(move || closer.close()));
                    self.task.add_blocks_fetched(1);
                    self.partitions_yielded += 1;
                    return Some(Ok((PartitionId(partition_id), stream)));
                }
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        global_metrics().record_fetch(
            &self.shuffle_key,
            self.partitions_yielded,
            self.wait_millis_total as f64 / 1000.0,
        );
        info!(
            shuffle_key = %self.shuffle_key,
            partitions = self.partitions_yielded,
            wait_ms = self.wait_millis_total,
            "shuffle fetch completed"
        );
    }
}
