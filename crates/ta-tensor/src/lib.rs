//! `ta-tensor` - Dense tiles and the index algebra used by tile-array.
//!
//! This crate provides:
//! - `Range`, the multi-dimensional index box a tile (or a tile grid) covers
//! - `Permutation` of tensor modes
//! - `GemmHelper`, which fuses contracted and free modes into matrix extents
//! - A `Tensor` tile type backed by row-major storage
//! - A `ComputeBackend` trait and the reference `CpuBackend`
//! - The `Tile` capability trait the distributed evaluators are generic over

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod gemm;
pub mod permutation;
pub mod range;
pub mod tensor;
pub mod tile;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::{DType, Scalar};
pub use error::{Result, TensorError};
pub use gemm::GemmHelper;
pub use permutation::Permutation;
pub use range::Range;
pub use tensor::Tensor;
pub use tile::Tile;
