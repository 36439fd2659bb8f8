use std::fmt::Debug;

use crate::dtype::Scalar;
use crate::error::Result;
use crate::gemm::GemmHelper;
use crate::permutation::Permutation;
use crate::range::Range;
use crate::tensor::Tensor;

/// The operations a tile type must provide to take part in distributed
/// evaluation.
///
/// Tiles cross process boundaries by value, hence `Send + 'static`.
pub trait Tile: Clone + Send + Debug + 'static {
    type Scalar: Scalar;

    /// Element range this tile covers.
    fn range(&self) -> &Range;

    /// The additive identity over `range`.
    fn zeros(range: Range) -> Self;

    fn is_zero(&self) -> bool;

    fn norm(&self) -> f64;

    /// `factor * (self x right)`.
    fn contract(&self, right: &Self, helper: &GemmHelper, factor: Self::Scalar) -> Result<Self>;

    /// `self += partial`.
    fn accumulate(&mut self, partial: &Self) -> Result<()>;

    fn scale(&self, factor: Self::Scalar) -> Self;

    fn permute(&self, perm: &Permutation) -> Result<Self>;
}

impl<T: Scalar> Tile for Tensor<T> {
    type Scalar = T;

    fn range(&self) -> &Range {
        Tensor::range(self)
    }

    fn zeros(range: Range) -> Self {
        Tensor::zeros(range)
    }

    fn is_zero(&self) -> bool {
        Tensor::is_zero(self)
    }

    fn norm(&self) -> f64 {
        Tensor::norm(self)
    }

    fn contract(&self, right: &Self, helper: &GemmHelper, factor: T) -> Result<Self> {
        Tensor::contract(self, right, helper, factor)
    }

    fn accumulate(&mut self, partial: &Self) -> Result<()> {
        self.add_to(partial)
    }

    fn scale(&self, factor: T) -> Self {
        Tensor::scale(self, factor)
    }

    fn permute(&self, perm: &Permutation) -> Result<Self> {
        Tensor::permute(self, perm)
    }
}
