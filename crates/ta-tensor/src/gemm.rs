use crate::error::{Result, TensorError};
use crate::range::Range;

/// Maps a contraction of two tensors onto a single matrix multiply.
///
/// Left modes are ordered `[outer..., inner...]` and right modes
/// `[inner..., outer...]`. The result modes are the left outer modes followed
/// by the right outer modes, so fusing each group gives `(m, k)`, `(k, n)` and
/// `(m, n)` row-major matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmHelper {
    result_rank: usize,
    left_rank: usize,
    right_rank: usize,
    num_contract: usize,
}

impl GemmHelper {
    pub fn new(result_rank: usize, left_rank: usize, right_rank: usize) -> Result<Self> {
        let total = left_rank + right_rank;
        if total < result_rank || (total - result_rank) % 2 != 0 {
            return Err(TensorError::Other(format!(
                "cannot contract rank {} with rank {} into rank {}",
                left_rank, right_rank, result_rank
            )));
        }
        let num_contract = (total - result_rank) / 2;
        if num_contract > left_rank || num_contract > right_rank {
            return Err(TensorError::Other(format!(
                "{} contracted modes exceed operand ranks {} and {}",
                num_contract, left_rank, right_rank
            )));
        }
        Ok(GemmHelper {
            result_rank,
            left_rank,
            right_rank,
            num_contract,
        })
    }

    pub fn result_rank(&self) -> usize {
        self.result_rank
    }

    pub fn left_rank(&self) -> usize {
        self.left_rank
    }

    pub fn right_rank(&self) -> usize {
        self.right_rank
    }

    /// Number of contracted (inner) modes.
    pub fn num_contract(&self) -> usize {
        self.num_contract
    }

    pub fn left_outer<'a, T>(&self, left: &'a [T]) -> &'a [T] {
        &left[..self.left_rank - self.num_contract]
    }

    pub fn left_inner<'a, T>(&self, left: &'a [T]) -> &'a [T] {
        &left[self.left_rank - self.num_contract..]
    }

    pub fn right_inner<'a, T>(&self, right: &'a [T]) -> &'a [T] {
        &right[..self.num_contract]
    }

    pub fn right_outer<'a, T>(&self, right: &'a [T]) -> &'a [T] {
        &right[self.num_contract..]
    }

    /// Returns true if the contracted modes of both operands agree.
    pub fn inner_matches<T: PartialEq>(&self, left: &[T], right: &[T]) -> bool {
        self.left_inner(left) == self.right_inner(right)
    }

    /// Concatenate the outer modes of both operands.
    pub fn make_result<T: Clone>(&self, left: &[T], right: &[T]) -> Vec<T> {
        let mut out = self.left_outer(left).to_vec();
        out.extend_from_slice(self.right_outer(right));
        out
    }

    /// Range of the product of tiles covering `left` and `right`.
    pub fn make_result_range(&self, left: &Range, right: &Range) -> Result<Range> {
        self.check_ranks(left.rank(), right.rank())?;
        if !self.inner_matches(left.extent(), right.extent()) {
            let (m, k, n) = self.compute_matrix_sizes(left.extent(), right.extent());
            return Err(TensorError::GemmMismatch {
                m,
                k,
                k2: self.right_inner(right.extent()).iter().product(),
                n,
            });
        }
        if !self.inner_matches(left.lobound(), right.lobound()) {
            return Err(TensorError::Other(format!(
                "contracted modes of {} and {} are not aligned",
                left, right
            )));
        }
        Ok(Range::new(
            self.make_result(left.lobound(), right.lobound()),
            self.make_result(left.extent(), right.extent()),
        ))
    }

    /// Fused `(m, k, n)` sizes; `k` is taken from the left operand.
    pub fn compute_matrix_sizes(&self, left: &[usize], right: &[usize]) -> (usize, usize, usize) {
        let m = self.left_outer(left).iter().product();
        let k = self.left_inner(left).iter().product();
        let n = self.right_outer(right).iter().product();
        (m, k, n)
    }

    pub fn check_ranks(&self, left: usize, right: usize) -> Result<()> {
        if left != self.left_rank {
            return Err(TensorError::RankMismatch {
                expected: self.left_rank,
                got: left,
            });
        }
        if right != self.right_rank {
            return Err(TensorError::RankMismatch {
                expected: self.right_rank,
                got: right,
            });
        }
        Ok(())
    }
}
