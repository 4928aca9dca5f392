use std::collections::TryReserveError;
use std::io;

/// Errors reported by the collector.
///
/// Corruption of the object graph itself (for example unlinking an object
/// that is not a member of its generation) is not represented here: it
/// panics, since no caller could recover from it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("allocation failed while registering an object: {0}")]
    AllocationFailed(#[from] TryReserveError),

    #[error("object is detached from the object graph")]
    Detached,

    #[error("lock is already held by the calling thread")]
    WouldDeadlock,

    #[error("a background worker is already running")]
    WorkerRunning,

    #[error("failed to spawn background worker: {0}")]
    Spawn(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
