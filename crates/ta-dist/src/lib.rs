//! `ta-dist` - Distributed tiled arrays and evaluators for tile-array.
//!
//! This crate provides:
//! - `TiledRange`, the tiling of each mode of a tensor
//! - `Shape`, the dense or norm-based sparse pattern of nonzero tiles
//! - `Pmap` tile-to-process maps and the SUMMA `ProcGrid`
//! - `DistArray`, tiles stored on their owning processes
//! - `DistEval` evaluators: `ArrayEval` leaves and the `ContractionEval`
//!   SUMMA engine
//!
//! Every process builds the same arrays and evaluators in the same order;
//! evaluation is driven by tasks and messages on the `ta-runtime` process
//! group.

pub mod array_eval;
pub mod contraction_eval;
pub mod dist_array;
pub mod dist_eval;
pub mod error;
pub mod pmap;
pub mod proc_grid;
pub mod shape;
pub mod tiled_range;

pub use array_eval::ArrayEval;
pub use contraction_eval::{ContractionEval, ContractionMetadata, ContractionStats};
pub use dist_array::DistArray;
pub use dist_eval::{DistEval, EvalStatus};
pub use error::{DistError, ErrorKind, Result};
pub use pmap::{Pmap, PmapKind};
pub use proc_grid::ProcGrid;
pub use shape::{Shape, SparseShape};
pub use tiled_range::{TiledRange, TiledRange1};
