//! Shared fetch-fault cell: one captured error per pipeline instance,
//! first writer wins, read-only once set.

use std::sync::OnceLock;

use rsf_common::RsfError;

/// How a captured fault escalates out of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Interruption/timeout during discovery: rethrown unchanged, treated as
    /// task cancellation by the layer above.
    Transient,
    /// Shuffle data unobtainable: convertible to a stage-retryable fetch
    /// failure.
    FetchFailure,
    /// Unclassified: propagated without conversion, no retry.
    Fatal,
}

/// One captured pipeline error plus the partition it is attributed to.
#[derive(Debug)]
pub struct FetchFault {
    kind: FaultKind,
    partition_id: u32,
    cause: RsfError,
}

impl FetchFault {
    /// Classify a captured error by its variant. The transient/genuine
    /// distinction during discovery is exactly this type-of-cause check.
    pub fn classify(partition_id: u32, cause: RsfError) -> Self {
        let kind = match &cause {
            RsfError::DiscoveryTransient(_) => FaultKind::Transient,
            RsfError::Discovery(_)
            | RsfError::WorkerUnreachable(_)
            | RsfError::StreamOpen(_)
            | RsfError::FetchFailure { .. } => FaultKind::FetchFailure,
            RsfError::InvalidConfig(_) | RsfError::Io(_) | RsfError::Internal(_) => {
                FaultKind::Fatal
            }
        };
        Self {
            kind,
            partition_id,
            cause,
        }
    }

    pub fn kind(&self) -> FaultKind {
        self.kind
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// Rebuild the captured cause with its variant intact, so escalation
    /// preserves the type-of-cause distinction.
    pub fn to_error(&self) -> RsfError {
        match &self.cause {
            RsfError::InvalidConfig(m) => RsfError::InvalidConfig(m.clone()),
            RsfError::DiscoveryTransient(m) => RsfError::DiscoveryTransient(m.clone()),
            RsfError::Discovery(m) => RsfError::Discovery(m.clone()),
            RsfError::WorkerUnreachable(m) => RsfError::WorkerUnreachable(m.clone()),
            RsfError::StreamOpen(m) => RsfError::StreamOpen(m.clone()),
            RsfError::FetchFailure {
                app_shuffle_id,
                shuffle_id,
                partition_id,
            } => RsfError::FetchFailure {
                app_shuffle_id: *app_shuffle_id,
                shuffle_id: *shuffle_id,
                partition_id: *partition_id,
            },
            RsfError::Io(e) => RsfError::Io(std::io::Error::new(e.kind(), e.to_string())),
            RsfError::Internal(m) => RsfError::Internal(m.clone()),
        }
    }
}

/// Monotonic fault cell shared by every concurrent pipeline task.
#[derive(Debug, Default)]
pub struct FaultState {
    slot: OnceLock<FetchFault>,
}

impl FaultState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare-and-set capture; returns whether this fault was recorded.
    pub fn capture(&self, fault: FetchFault) -> bool {
        self.slot.set(fault).is_ok()
    }

    pub fn get(&self) -> Option<&FetchFault> {
        self.slot.get()
    }

    pub fn is_faulted(&self) -> bool {
        self.slot.get().is_some()
    }
}
