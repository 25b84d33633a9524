//! Discovery-side data model: partition ranges, replica locations, and the
//! location-service seam.

use std::collections::HashMap;

use async_trait::async_trait;
use rsf_common::{AppShuffleId, PartitionId, Result, RsfError, ShuffleId};

/// Half-open interval `[start, end)` over partition ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    start: u32,
    end: u32,
}

impl PartitionRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(RsfError::InvalidConfig(format!(
                "partition range start {start} exceeds end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> {
        self.start..self.end
    }
}

/// Half-open interval `[start, end)` over mapper attempt indices.
///
/// Scopes which upstream map outputs are visible to a read; the default spans
/// every mapper, which is correct for stages that were never partially retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapIndexRange {
    start: u32,
    end: u32,
}

impl MapIndexRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(RsfError::InvalidConfig(format!(
                "map index range start {start} exceeds end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }
}

impl Default for MapIndexRange {
    fn default() -> Self {
        Self {
            start: 0,
            end: u32::MAX,
        }
    }
}

/// Network address of one storage worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One physical copy of one partition's data on a storage worker.
///
/// Replica rank is implicit: a partition's locations are ordered, and stream
/// creation attempts them in that order, first success wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub worker: WorkerAddress,
    pub file_name: String,
}

impl Location {
    pub fn new(worker: WorkerAddress, file_name: impl Into<String>) -> Self {
        Self {
            worker,
            file_name: file_name.into(),
        }
    }
}

/// Resolved placement of a shuffle's partitions, as returned by discovery.
#[derive(Debug, Clone, Default)]
pub struct FileGroups {
    /// Ordered replica locations per partition id. Partitions absent from the
    /// map produced no rows upstream.
    pub partitions: HashMap<u32, Vec<Location>>,
    /// Latest registered attempt id per mapper index.
    pub mapper_attempts: Vec<u32>,
}

impl FileGroups {
    pub fn mapper_count(&self) -> usize {
        self.mapper_attempts.len()
    }
}

/// Identifies one shuffle to fetch from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShuffleHandle {
    pub app_shuffle_id: AppShuffleId,
    pub shuffle_id: ShuffleId,
}

impl ShuffleHandle {
    pub fn new(app_shuffle_id: AppShuffleId, shuffle_id: ShuffleId) -> Self {
        Self {
            app_shuffle_id,
            shuffle_id,
        }
    }

    /// Key under which workers registered this shuffle's files.
    pub fn shuffle_key(&self) -> String {
        format!("{}-{}", self.app_shuffle_id, self.shuffle_id)
    }
}

#[async_trait]
/// Location/discovery service contract.
pub trait LocationService: Send + Sync {
    /// Resolve the partition -> replica-locations mapping for a shuffle.
    ///
    /// `partition_hint` is any partition id the caller is interested in; the
    /// service may use it to route the lookup.
    async fn resolve_locations(
        &self,
        shuffle_id: ShuffleId,
        partition_hint: PartitionId,
    ) -> Result<FileGroups>;

    /// Report that a partition of the shuffle could not be fetched; returns
    /// whether the report was accepted (a stage retry will follow).
    async fn report_fetch_failure(
        &self,
        app_shuffle_id: AppShuffleId,
        shuffle_id: ShuffleId,
    ) -> bool;
}
