//! Remote shuffle-block fetch pipeline.
//!
//! Given a shuffle id and a contiguous partition range, resolves where each
//! partition's data lives, opens remote streams in one batched round trip per
//! worker, materializes per-partition byte streams with a bounded look-ahead
//! window, and hands them to the consuming task in ascending partition order.
//!
//! Responsibilities:
//! - group replica locations into per-worker open batches ([`group`]);
//! - perform the batched open-stream round trips ([`open`], [`wire`]);
//! - create partition streams with ordered replica fallback behind a sliding
//!   creation window ([`stream`]);
//! - drive consumption and failure escalation ([`fetch`], [`fault`]).
//!
//! External collaborators, seams only: the location/discovery service
//! ([`location::LocationService`]), the transport client factory
//! ([`client::ClientFactory`]), and the consuming task's context
//! ([`context::TaskContext`]). Decoding the fetched bytes is the consumer's
//! concern.

pub mod client;
pub mod context;
mod create;
pub mod fault;
pub mod fetch;
pub mod group;
pub mod location;
pub mod open;
mod pool;
pub mod stream;
pub mod wire;


pub use client::{ClientFactory, ClientPool, Connection, StreamReadRequest, WorkerExclusions};
pub use context::TaskContext;
pub use fault::{FaultKind, FaultState, FetchFault};
pub use fetch::{FetchIterator, ShuffleFetcher};
pub use group::{WorkerBatch, group_locations};
pub use location::{
    FileGroups, Location, LocationService, MapIndexRange, PartitionRange, ShuffleHandle,
    WorkerAddress,
};
pub use open::{OpenStreamResult, open_worker_batches};
pub use stream::{ChunkStream, CompressionCodec, PartitionStream, StreamCloser};
pub use wire::{
    OpenStatus, OpenStreamBatchRequest, OpenStreamBatchResponse, OpenStreamEntry, StreamToken,
};
