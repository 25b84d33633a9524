//! Location grouping: one batch of open-stream entries per reachable worker.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::{ClientPool, Connection, WorkerExclusions};
use crate::location::{FileGroups, Location, MapIndexRange, PartitionRange, WorkerAddress};
use crate::wire::OpenStreamEntry;

/// Accumulated open-stream entries for one worker, with the originating
/// locations kept in submission order so response tokens can be matched back.
pub struct WorkerBatch {
    pub worker: WorkerAddress,
    pub connection: Arc<dyn Connection>,
    pub entries: Vec<OpenStreamEntry>,
    pub locations: Vec<Location>,
}

/// Partition the requested range's locations into per-worker batches.
///
/// Batches are created lazily, at most one per distinct worker address.
/// Workers whose connection cannot be acquired are reported to the exclusion
/// list and contribute no batch; their locations fall through to the next
/// replica (or to no token at all) during stream creation. Partitions without
/// any location are simply absent here.
pub fn group_locations(
    groups: &FileGroups,
    range: PartitionRange,
    map_range: MapIndexRange,
    prefer_local_read: bool,
    clients: &ClientPool,
    exclusions: &WorkerExclusions,
) -> Vec<WorkerBatch> {
    let mut batches: Vec<WorkerBatch> = Vec::new();
    let mut by_worker: HashMap<WorkerAddress, usize> = HashMap::new();
    let mut unreachable: HashSet<WorkerAddress> = HashSet::new();

    for partition_id in range.iter() {
        let Some(locations) = groups.partitions.get(&partition_id) else {
            continue;
        };
        for location in locations {
            if unreachable.contains(&location.worker) {
                continue;
            }
            if exclusions.is_excluded(&location.worker) {
                debug!(
                    worker = %location.worker,
                    partition_id,
                    "skipping excluded worker during location grouping"
                );
                continue;
            }
            let batch_index = match by_worker.get(&location.worker) {
                Some(index) => *index,
                None => match clients.get(&location.worker) {
                    Ok(connection) => {
                        exclusions.record_success(&location.worker);
                        batches.push(WorkerBatch {
                            worker: location.worker.clone(),
                            connection,
                            entries: Vec::new(),
                            locations: Vec::new(),
                        });
                        let index = batches.len() - 1;
                        by_worker.insert(location.worker.clone(), index);
                        index
                    }
                    Err(e) => {
                        warn!(
                            worker = %location.worker,
                            error = %e,
                            "worker connection failed; dropping its batch"
                        );
                        exclusions.record_failure(&location.worker);
                        unreachable.insert(location.worker.clone());
                        continue;
                    }
                },
            };
            let batch = &mut batches[batch_index];
            batch.entries.push(OpenStreamEntry {
                file_name: location.file_name.clone(),
                start_map_index: map_range.start(),
                end_map_index: map_range.end(),
                prefer_local_read,
            });
            batch.locations.push(location.clone());
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use rsf_common::{Result, RsfError};

    use super::group_locations;
    use crate::client::{
        ClientFactory, ClientPool, Connection, StreamReadRequest, WorkerExclusions,
    };
    use crate::location::{FileGroups, Location, MapIndexRange, PartitionRange, WorkerAddress};
    use crate::stream::PartitionStream;

    struct StubConnection;

    #[async_trait]
    impl Connection for StubConnection {
        async fn send_request(&self, _payload: Bytes, _timeout: Duration) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        async fn open_partition_stream(
            &self,
            request: StreamReadRequest,
        ) -> Result<PartitionStream> {
            Ok(PartitionStream::empty(request.partition_id.0))
        }
    }

    struct StubFactory {
        refuse_host: Option<&'static str>,
        dials: AtomicUsize,
    }

    impl ClientFactory for StubFactory {
        fn create_client(&self, address: &WorkerAddress) -> Result<Arc<dyn Connection>> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if Some(address.host.as_str()) == self.refuse_host {
                return Err(RsfError::WorkerUnreachable(format!(
                    "connect to {address} refused"
                )));
            }
            Ok(Arc::new(StubConnection))
        }
    }

    fn file_groups(entries: &[(u32, &str, u16, &str)]) -> FileGroups {
        let mut partitions: HashMap<u32, Vec<Location>> = HashMap::new();
        for (partition_id, host, port, file) in entries {
            partitions
                .entry(*partition_id)
                .or_default()
                .push(Location::new(WorkerAddress::new(*host, *port), *file));
        }
        FileGroups {
            partitions,
            mapper_attempts: vec![0],
        }
    }

    #[test]
    fn builds_one_batch_per_worker_in_first_seen_order() {
        let groups = file_groups(&[
            (0, "a", 9000, "p0-r0.data"),
            (1, "a", 9000, "p1-r0.data"),
            (2, "b", 9000, "p2-r0.data"),
            (2, "a", 9000, "p2-r1.data"),
        ]);
        let factory = Arc::new(StubFactory {
            refuse_host: None,
            dials: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory.clone());
        let exclusions = WorkerExclusions::new(3);

        let batches = group_locations(
            &groups,
            PartitionRange::new(0, 3).expect("range"),
            MapIndexRange::default(),
            true,
            &pool,
            &exclusions,
        );

        assert_eq!(batches.len(), 2);
        assert_eq!(factory.dials.load(Ordering::SeqCst), 2);
        let a = &batches[0];
        assert_eq!(a.worker, WorkerAddress::new("a", 9000));
        assert_eq!(a.entries.len(), 3);
        assert_eq!(a.locations.len(), 3);
        assert!(a.entries.iter().all(|e| e.prefer_local_read));
        assert_eq!(
            a.entries
                .iter()
                .map(|e| e.file_name.as_str())
                .collect::<Vec<_>>(),
            vec!["p0-r0.data", "p1-r0.data", "p2-r1.data"]
        );
        let b = &batches[1];
        assert_eq!(b.worker, WorkerAddress::new("b", 9000));
        assert_eq!(b.entries.len(), 1);
    }

    #[test]
    fn connect_failure_drops_the_batch_and_feeds_exclusions() {
        let groups = file_groups(&[
            (0, "down", 9000, "p0-r0.data"),
            (0, "up", 9000, "p0-r1.data"),
            (1, "down", 9000, "p1-r0.data"),
        ]);
        let factory = Arc::new(StubFactory {
            refuse_host: Some("down"),
            dials: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory.clone());
        let exclusions = WorkerExclusions::new(1);

        let batches = group_locations(
            &groups,
            PartitionRange::new(0, 2).expect("range"),
            MapIndexRange::default(),
            false,
            &pool,
            &exclusions,
        );

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].worker, WorkerAddress::new("up", 9000));
        assert!(exclusions.is_excluded(&WorkerAddress::new("down", 9000)));
        // The failed address is dialed once for the whole scan.
        assert_eq!(factory.dials.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn already_excluded_workers_are_not_dialed() {
        let groups = file_groups(&[(0, "bad", 9000, "p0-r0.data")]);
        let factory = Arc::new(StubFactory {
            refuse_host: None,
            dials: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory.clone());
        let exclusions = WorkerExclusions::new(1);
        exclusions.record_failure(&WorkerAddress::new("bad", 9000));

        let batches = group_locations(
            &groups,
            PartitionRange::new(0, 1).expect("range"),
            MapIndexRange::default(),
            false,
            &pool,
            &exclusions,
        );

        assert!(batches.is_empty());
        assert_eq!(factory.dials.load(Ordering::SeqCst), 0);
    }
}
