use std::fmt::Debug;

use crate::dtype::Scalar;
use crate::error::Result;
use crate::permutation::Permutation;

/// Trait for pluggable tile kernels.
///
/// Data is passed in as row-major slices. Kernels that produce a new tile
/// return owned vectors; `gemm` accumulates into an existing buffer so the
/// contraction engine can reduce partial products in place.
pub trait ComputeBackend<T: Scalar>: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiply-accumulate: `c += alpha * a @ b`.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - `c`: row-major data of shape [m, n]
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        &self,
        alpha: T,
        a: &[T],
        b: &[T],
        c: &mut [T],
        m: usize,
        k: usize,
        n: usize,
    ) -> Result<()>;

    /// Element-wise in-place addition: `a[i] += b[i]`.
    fn add_assign(&self, a: &mut [T], b: &[T]) -> Result<()>;

    /// Scalar multiplication: `result[i] = a[i] * s`.
    fn scale(&self, a: &[T], s: T) -> Vec<T>;

    /// Reorder the modes of a row-major array with the given extent.
    fn permute(&self, a: &[T], extent: &[usize], perm: &Permutation) -> Result<Vec<T>>;
}
