//! Transport seams: pooled worker connections and the exclusion list fed by
//! connection failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rsf_common::{PartitionId, Result, ShuffleId, global_metrics};
use tracing::warn;

use crate::location::{MapIndexRange, WorkerAddress};
use crate::stream::PartitionStream;
use crate::wire::StreamToken;

/// Arguments for opening one partition's streaming read on a worker.
#[derive(Debug, Clone)]
pub struct StreamReadRequest {
    pub shuffle_id: ShuffleId,
    pub partition_id: PartitionId,
    /// Token issued by the worker during the batched open round trip.
    pub token: StreamToken,
    pub map_range: MapIndexRange,
    /// Latest registered attempt id per mapper index; scopes which map
    /// outputs the worker serves.
    pub mapper_attempts: Arc<Vec<u32>>,
}

#[async_trait]
/// One pooled connection to a storage worker.
pub trait Connection: Send + Sync {
    /// Synchronous request/response round trip with a serialized message.
    async fn send_request(&self, payload: Bytes, timeout: Duration) -> Result<Bytes>;
    /// Open the per-partition streaming read for a previously issued token.
    async fn open_partition_stream(&self, request: StreamReadRequest) -> Result<PartitionStream>;
}

/// Transport client factory supplied by the hosting engine.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, address: &WorkerAddress) -> Result<Arc<dyn Connection>>;
}

/// Find-or-create cache of pooled connections, shared across pipeline
/// instances.
pub struct ClientPool {
    factory: Arc<dyn ClientFactory>,
    cache: Mutex<HashMap<WorkerAddress, Arc<dyn Connection>>>,
}

impl ClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Cached connection for `address`, creating one if absent. Factory
    /// failures are not cached; the next caller retries.
    pub fn get(&self, address: &WorkerAddress) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = self.cache.lock().get(address) {
            return Ok(Arc::clone(conn));
        }
        // The factory may dial; keep it outside the lock. If two callers race,
        // the first insert wins and the loser's connection is dropped.
        let created = self.factory.create_client(address)?;
        let mut cache = self.cache.lock();
        let conn = cache
            .entry(address.clone())
            .or_insert_with(|| Arc::clone(&created));
        Ok(Arc::clone(conn))
    }
}

/// Worker addresses excluded from location selection after repeated
/// connection failures.
pub struct WorkerExclusions {
    threshold: u32,
    failures: Mutex<HashMap<WorkerAddress, u32>>,
}

impl WorkerExclusions {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Count one connection failure against `address`.
    pub fn record_failure(&self, address: &WorkerAddress) {
        let mut failures = self.failures.lock();
        let count = failures.entry(address.clone()).or_insert(0);
        *count += 1;
        if *count == self.threshold {
            warn!(
                worker = %address,
                failures = *count,
                "worker excluded from location selection after repeated connection failures"
            );
        }
        let excluded = failures.values().filter(|c| **c >= self.threshold).count() as u64;
        global_metrics().set_excluded_workers(excluded);
    }

    /// Reset the consecutive-failure count after a successful acquisition.
    pub fn record_success(&self, address: &WorkerAddress) {
        self.failures.lock().remove(address);
    }

    pub fn is_excluded(&self, address: &WorkerAddress) -> bool {
        self.failures
            .lock()
            .get(address)
            .is_some_and(|count| *count >= self.threshold)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use rsf_common::{Result, RsfError};

    use super::{ClientFactory, ClientPool, Connection, StreamReadRequest, WorkerExclusions};
    use crate::location::WorkerAddress;
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

    struct CountingFactory {
        created: AtomicUsize,
    }

    impl ClientFactory for CountingFactory {
        fn create_client(&self, address: &WorkerAddress) -> Result<Arc<dyn Connection>> {
            if address.host == "down" {
                return Err(RsfError::WorkerUnreachable(format!(
                    "connect to {address} refused"
                )));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubConnection))
        }
    }

    #[test]
    fn pool_reuses_connections_per_address() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory.clone());
        let a = WorkerAddress::new("w1", 9000);
        let b = WorkerAddress::new("w2", 9000);

        pool.get(&a).expect("connect a");
        pool.get(&a).expect("connect a again");
        pool.get(&b).expect("connect b");
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pool_does_not_cache_failures() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let pool = ClientPool::new(factory);
        let down = WorkerAddress::new("down", 9000);
        assert!(pool.get(&down).is_err());
        assert!(pool.get(&down).is_err());
    }

    #[test]
    fn exclusion_applies_at_threshold_and_resets_on_success() {
        let exclusions = WorkerExclusions::new(2);
        let addr = WorkerAddress::new("w1", 9000);

        exclusions.record_failure(&addr);
        assert!(!exclusions.is_excluded(&addr));
        exclusions.record_failure(&addr);
        assert!(exclusions.is_excluded(&addr));

        exclusions.record_success(&addr);
        assert!(!exclusions.is_excluded(&addr));
    }
}
