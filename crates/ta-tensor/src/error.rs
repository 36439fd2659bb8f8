use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
    #[error("range mismatch: expected {expected:?}, got {got:?}")]
    RangeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("rank mismatch: expected {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },
    #[error("invalid permutation {0:?}")]
    InvalidPermutation(Vec<usize>),
    #[error("gemm inner dimension mismatch: [{m}x{k}] * [{k2}x{n}]")]
    GemmMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("coordinate {coord:?} out of range {range}")]
    OutOfRange { coord: Vec<usize>, range: String },
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
