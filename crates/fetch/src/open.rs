//! Batched stream opening: one request/response round trip per worker.

use std::collections::HashMap;
use std::time::Duration;

use rsf_common::{FetchConf, Result, RsfError, global_metrics};
use tracing::{debug, error, warn};

use crate::client::WorkerExclusions;
use crate::group::WorkerBatch;
use crate::location::Location;
use crate::pool::fetch_pool;
use crate::wire::{OpenStreamBatchRequest, OpenStreamBatchResponse, StreamToken};

/// Tokens issued by workers, keyed by the location they were opened for.
/// Locations absent from the map are unusable and fall through to the next
/// replica during stream creation.
pub type OpenStreamResult = HashMap<Location, StreamToken>;

/// Send every worker's batch concurrently on the shared pool and join all of
/// them before returning.
///
/// Any transport or decode failure fails that worker's whole batch: none of
/// its locations receive a token, and the failure is counted against the
/// worker's exclusion record. This phase reads no partition data.
pub async fn open_worker_batches(
    shuffle_key: &str,
    batches: Vec<WorkerBatch>,
    conf: &FetchConf,
    exclusions: &WorkerExclusions,
) -> Result<OpenStreamResult> {
    let pool = fetch_pool(conf.worker_pool_size);
    let timeout = Duration::from_millis(conf.open_stream_timeout_ms);
    let sent = batches.len() as u64;

    let mut handles = Vec::with_capacity(batches.len());
    for batch in batches {
        let permit = pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| RsfError::Internal(format!("fetch pool unavailable: {e}")))?;
        let request = OpenStreamBatchRequest {
            shuffle_key: shuffle_key.to_string(),
            entries: batch.entries,
        };
        let connection = batch.connection;
        let worker = batch.worker;
        let locations = batch.locations;
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let outcome = connection
                .send_request(request.to_bytes(), timeout)
                .await
                .and_then(|payload| OpenStreamBatchResponse::from_bytes(payload.as_ref()))
                .and_then(|response| response.success_tokens(locations.len()));
            (worker, locations, outcome)
        }));
    }

    let mut result = OpenStreamResult::new();
    let mut failed = 0_u64;
    for handle in handles {
        match handle.await {
            Ok((worker, locations, Ok(tokens))) => {
                let issued = tokens.iter().filter(|t| t.is_some()).count();
                debug!(
                    worker = %worker,
                    requested = locations.len(),
                    issued,
                    "open stream batch completed"
                );
                for (location, token) in locations.into_iter().zip(tokens) {
                    if let Some(token) = token {
                        result.insert(location, token);
                    }
                }
            }
            Ok((worker, locations, Err(e))) => {
                warn!(
                    worker = %worker,
                    requested = locations.len(),
                    error = %e,
                    "open stream batch failed; no tokens issued for this worker"
                );
                exclusions.record_failure(&worker);
                failed += 1;
            }
            Err(e) => {
                error!(error = %e, "open stream batch task aborted");
                failed += 1;
            }
        }
    }
    global_metrics().record_open_batches(shuffle_key, sent, failed);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use bytes::Bytes;
    use rsf_common::{FetchConf, Result, RsfError};

    use super::open_worker_batches;
    use crate::client::{Connection, StreamReadRequest, WorkerExclusions};
    use crate::group::WorkerBatch;
    use crate::location::{Location, WorkerAddress};
    use crate::stream::PartitionStream;
    use crate::wire::{
        OpenStatus, OpenStreamBatchRequest, OpenStreamBatchResponse, OpenStreamEntry,
    };

    /// Issues sequential tokens, refusing entries named in `refuse_files`.
    struct ScriptedWorker {
        refuse_files: Vec<&'static str>,
        fail_transport: bool,
    }

    #[async_trait]
    impl Connection for ScriptedWorker {
        async fn send_request(&self, payload: Bytes, _timeout: Duration) -> Result<Bytes> {
            if self.fail_transport {
                return Err(RsfError::WorkerUnreachable("request timed out".into()));
            }
            let request = OpenStreamBatchRequest::from_bytes(payload.as_ref())?;
            let mut statuses = Vec::new();
            let mut tokens = Vec::new();
            for (index, entry) in request.entries.iter().enumerate() {
                if self.refuse_files.contains(&entry.file_name.as_str()) {
                    statuses.push(OpenStatus::FileNotFound as i32);
                    tokens.push(0);
                } else {
                    statuses.push(OpenStatus::Success as i32);
                    tokens.push(100 + index as u64);
                }
            }
            Ok(OpenStreamBatchResponse { statuses, tokens }.to_bytes())
        }

        async fn open_partition_stream(
            &self,
            request: StreamReadRequest,
        ) -> Result<PartitionStream> {
            Ok(PartitionStream::empty(request.partition_id.0))
        }
    }

    fn batch(
        host: &str,
        files: &[&'static str],
        connection: Arc<dyn Connection>,
    ) -> (WorkerBatch, Vec<Location>) {
        let worker = WorkerAddress::new(host, 9000);
        let locations = files
            .iter()
            .map(|f| Location::new(worker.clone(), *f))
            .collect::<Vec<_>>();
        let entries = files
            .iter()
            .map(|f| OpenStreamEntry {
                file_name: f.to_string(),
                start_map_index: 0,
                end_map_index: u32::MAX,
                prefer_local_read: false,
            })
            .collect();
        (
            WorkerBatch {
                worker,
                connection,
                entries,
                locations: locations.clone(),
            },
            locations,
        )
    }

    #[tokio::test]
    async fn tokens_map_back_to_locations_and_refusals_stay_absent() {
        let conn: Arc<dyn Connection> = Arc::new(ScriptedWorker {
            refuse_files: vec!["p1.data"],
            fail_transport: false,
        });
        let (batch, locations) = batch("a", &["p0.data", "p1.data", "p2.data"], conn);
        let exclusions = WorkerExclusions::new(3);

        let result = open_worker_batches("1-1", vec![batch], &FetchConf::default(), &exclusions)
            .await
            .expect("open");

        assert_eq!(result.len(), 2);
        assert!(result.contains_key(&locations[0]));
        assert!(!result.contains_key(&locations[1]));
        assert!(result.contains_key(&locations[2]));
    }

    #[tokio::test]
    async fn transport_failure_is_contained_to_one_worker() {
        let good: Arc<dyn Connection> = Arc::new(ScriptedWorker {
            refuse_files: vec![],
            fail_transport: false,
        });
        let bad: Arc<dyn Connection> = Arc::new(ScriptedWorker {
            refuse_files: vec![],
            fail_transport: true,
        });
        let (good_batch, good_locations) = batch("up", &["p0.data"], good);
        let (bad_batch, bad_locations) = batch("down", &["p1.data"], bad);
        let exclusions = WorkerExclusions::new(1);

        let result = open_worker_batches(
            "1-2",
            vec![bad_batch, good_batch],
            &FetchConf::default(),
            &exclusions,
        )
        .await
        .expect("open");

        assert_eq!(result.len(), 1);
        assert!(result.contains_key(&good_locations[0]));
        assert!(!result.contains_key(&bad_locations[0]));
        assert!(exclusions.is_excluded(&WorkerAddress::new("down", 9000)));
    }
}
