use thiserror::Error;

use crate::ids::{AppShuffleId, PartitionId, ShuffleId};

/// Canonical RSF error taxonomy used across crates.
///
/// Classification guidance:
/// - [`RsfError::InvalidConfig`]: range/config/contract violations discovered before any fetch
/// - [`RsfError::DiscoveryTransient`]: interruption/timeout while resolving locations; a
///   task-level cancellation signal, never converted to a data failure
/// - [`RsfError::Discovery`]: genuine location-resolution failure; blocks the whole range
/// - [`RsfError::WorkerUnreachable`]: per-worker connect failure; contained and excluded
/// - [`RsfError::StreamOpen`]: per-location stream setup failure; falls through to the next replica
/// - [`RsfError::FetchFailure`]: stage-retryable, raised after every replica of a partition failed
/// - [`RsfError::Io`]: raw IO failures from std APIs
/// - [`RsfError::Internal`]: anything unclassified; propagated without conversion
#[derive(Debug, Error)]
pub enum RsfError {
    /// Invalid or inconsistent configuration/range state.
    ///
    /// Examples:
    /// - partition range with `start > end`
    /// - map index range with `start > end`
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Location resolution was interrupted or timed out.
    ///
    /// Propagated unchanged to the caller; the scheduler layer treats it as
    /// task cancellation, not as missing shuffle data.
    #[error("location discovery interrupted: {0}")]
    DiscoveryTransient(String),

    /// Location resolution failed for a reason other than interruption/timeout.
    #[error("location discovery failed: {0}")]
    Discovery(String),

    /// A storage worker could not be reached or refused the connection.
    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),

    /// A per-partition stream could not be opened at one location.
    #[error("stream open failed: {0}")]
    StreamOpen(String),

    /// Shuffle data for a partition could not be obtained from any replica.
    ///
    /// Carries the ids the stage scheduler needs to retry the producing stage.
    #[error(
        "fetch failure: shuffle {shuffle_id} partition {partition_id} \
         (app shuffle {app_shuffle_id}) has no readable replica"
    )]
    FetchFailure {
        /// Application-visible shuffle id reported to the discovery service.
        app_shuffle_id: AppShuffleId,
        /// Internal shuffle id the data was registered under.
        shuffle_id: ShuffleId,
        /// Partition whose replicas were exhausted.
        partition_id: PartitionId,
    },

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unclassified failures; aborted without retry, original message intact.
    #[error("{0}")]
    Internal(String),
}

/// Standard RSF result alias.
pub type Result<T> = std::result::Result<T, RsfError>;
