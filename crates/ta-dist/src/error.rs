use ta_runtime::RuntimeError;
use ta_tensor::TensorError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistError {
    #[error("invalid tiled range: {0}")]
    InvalidTiledRange(String),
    #[error("shape covers tile range {got} but {expected} is required")]
    ShapeRangeMismatch { expected: String, got: String },
    #[error("process map covers {got} tiles but {expected} are required")]
    PmapSizeMismatch { expected: usize, got: usize },
    #[error("invalid process grid: {0}")]
    InvalidProcessGrid(String),
    #[error("contracted dimension {dim} differs: {left} vs {right}")]
    InnerExtentMismatch {
        dim: usize,
        left: String,
        right: String,
    },
    #[error("rank mismatch: expected {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },
    #[error("tile {index} is not local to rank {rank}")]
    NonLocalTile { index: usize, rank: usize },
    #[error("tile {0} is structurally zero")]
    ZeroTile(usize),
    #[error("tile {index} is out of range for {size} tiles")]
    TileOutOfRange { index: usize, size: usize },
    #[error("tile {index} covers {got} but {expected} is required")]
    TileRangeMismatch {
        index: usize,
        expected: String,
        got: String,
    },
    #[error("tile {0} has already been set")]
    TileAlreadySet(usize),
    #[error("evaluator has already been evaluated")]
    AlreadyEvaluated,
    #[error("evaluator has not been evaluated")]
    NotEvaluated,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Incompatible operands or a malformed grid, detected at construction.
    Configuration,
    /// A scheduled task failed; fatal for the process group.
    RuntimeTask,
    /// A remote fetch failed; fatal for the process group.
    RemoteFetch,
    /// The caller broke an API contract.
    Precondition,
}

impl DistError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DistError::InvalidTiledRange(_)
            | DistError::ShapeRangeMismatch { .. }
            | DistError::PmapSizeMismatch { .. }
            | DistError::InvalidProcessGrid(_)
            | DistError::InnerExtentMismatch { .. }
            | DistError::RankMismatch { .. }
            | DistError::Tensor(_) => ErrorKind::Configuration,
            DistError::NonLocalTile { .. }
            | DistError::ZeroTile(_)
            | DistError::TileOutOfRange { .. }
            | DistError::TileRangeMismatch { .. }
            | DistError::TileAlreadySet(_)
            | DistError::AlreadyEvaluated
            | DistError::NotEvaluated => ErrorKind::Precondition,
            DistError::Runtime(e) => match e {
                RuntimeError::RemoteFetch { .. } => ErrorKind::RemoteFetch,
                RuntimeError::Config(_) | RuntimeError::InvalidRank { .. } => {
                    ErrorKind::Configuration
                }
                _ => ErrorKind::RuntimeTask,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, DistError>;
