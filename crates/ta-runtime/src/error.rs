use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("task failed on rank {rank}: {msg}")]
    TaskFailed { rank: usize, msg: String },
    #[error("rank {rank} failed to fetch from rank {target}: {msg}")]
    RemoteFetch {
        rank: usize,
        target: usize,
        msg: String,
    },
    #[error("process group aborted by rank {origin}: {reason}")]
    Aborted { origin: usize, reason: String },
    #[error("rank {rank} made no progress for {timeout:?} waiting for {what}")]
    WaitTimeout {
        rank: usize,
        timeout: Duration,
        what: String,
    },
    #[error("rank {rank} is not in a group of {size} processes")]
    InvalidRank { rank: usize, size: usize },
    #[error("rank {rank} panicked: {msg}")]
    RankPanicked { rank: usize, msg: String },
    #[error("object {id} is not registered on rank {rank}")]
    UnknownObject { rank: usize, id: u64 },
    #[error("invalid runtime configuration: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Returns true for errors that take the whole process group down.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, RuntimeError::Config(_) | RuntimeError::InvalidRank { .. })
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
