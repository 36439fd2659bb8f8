use ta_tensor::{GemmHelper, Permutation, Range, Tile};

use crate::error::{DistError, Result};

/// Per-tile sparsity of a tiled tensor.
///
/// The range is the tile range of the owning tensor. Dense shapes report
/// every tile as nonzero.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Dense(Range),
    Sparse(SparseShape),
}

/// Tile norms with a screening threshold: a tile whose norm is below the
/// threshold is structurally zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseShape {
    range: Range,
    norms: Vec<f64>,
    threshold: f64,
}

impl SparseShape {
    pub fn new(range: Range, norms: Vec<f64>, threshold: f64) -> Result<Self> {
        if norms.len() != range.volume() {
            return Err(DistError::ShapeRangeMismatch {
                expected: format!("{} tiles", range.volume()),
                got: format!("{} norms", norms.len()),
            });
        }
        Ok(SparseShape {
            range,
            norms,
            threshold,
        })
    }

    /// Shape with `mask[i] == true` marking nonzero tiles.
    pub fn from_mask(range: Range, mask: &[bool]) -> Result<Self> {
        let norms = mask.iter().map(|&nz| if nz { 1.0 } else { 0.0 }).collect();
        Self::new(range, norms, 0.5)
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn norms(&self) -> &[f64] {
        &self.norms
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn norm(&self, ord: usize) -> f64 {
        self.norms[ord]
    }

    pub fn is_zero(&self, ord: usize) -> bool {
        self.norms[ord] < self.threshold
    }

    fn permute(&self, perm: &Permutation) -> Result<SparseShape> {
        let range = self.range.permute(perm)?;
        let mut norms = vec![0.0; self.norms.len()];
        for (ord, &norm) in self.norms.iter().enumerate() {
            norms[range.ordinal(&perm.apply(&self.range.coord(ord)))] = norm;
        }
        Ok(SparseShape {
            range,
            norms,
            threshold: self.threshold,
        })
    }
}

impl From<SparseShape> for Shape {
    fn from(s: SparseShape) -> Self {
        Shape::Sparse(s)
    }
}

impl Shape {
    pub fn dense(range: Range) -> Self {
        Shape::Dense(range)
    }

    /// Sparse shape from the actual tiles; `None` entries are zero tiles.
    pub fn from_tiles<T: Tile>(range: Range, tiles: &[Option<T>], threshold: f64) -> Result<Self> {
        let norms = tiles
            .iter()
            .map(|t| t.as_ref().map_or(0.0, |t| t.norm()))
            .collect();
        Ok(Shape::Sparse(SparseShape::new(range, norms, threshold)?))
    }

    pub fn range(&self) -> &Range {
        match self {
            Shape::Dense(range) => range,
            Shape::Sparse(s) => &s.range,
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Shape::Dense(_))
    }

    pub fn is_zero(&self, ord: usize) -> bool {
        match self {
            Shape::Dense(_) => false,
            Shape::Sparse(s) => s.is_zero(ord),
        }
    }

    /// Norm estimate of tile `ord`; dense tiles count as 1.
    pub fn norm(&self, ord: usize) -> f64 {
        match self {
            Shape::Dense(_) => 1.0,
            Shape::Sparse(s) => s.norm(ord),
        }
    }

    fn threshold(&self) -> f64 {
        match self {
            Shape::Dense(_) => 1.0,
            Shape::Sparse(s) => s.threshold,
        }
    }

    pub fn nonzero_count(&self) -> usize {
        let volume = self.range().volume();
        (0..volume).filter(|&i| !self.is_zero(i)).count()
    }

    /// Check that this shape describes the tile range `tiles`.
    pub fn validate(&self, tiles: &Range) -> Result<()> {
        if self.range().extent() != tiles.extent() {
            return Err(DistError::ShapeRangeMismatch {
                expected: tiles.to_string(),
                got: self.range().to_string(),
            });
        }
        Ok(())
    }

    pub fn permute(&self, perm: &Permutation) -> Result<Shape> {
        match self {
            Shape::Dense(range) => Ok(Shape::Dense(range.permute(perm)?)),
            Shape::Sparse(s) => Ok(Shape::Sparse(s.permute(perm)?)),
        }
    }

    /// Shape of the contraction of `self` with `right`.
    ///
    /// Result tile `(m, n)` gets norm `sum_k |L(m,k)| * |R(k,n)|` over the
    /// phases where both operand tiles are nonzero, and the product of the
    /// operand thresholds, so it is zero exactly when no phase contributes.
    /// Two dense operands give a dense result.
    pub fn gemm(&self, right: &Shape, helper: &GemmHelper) -> Result<Shape> {
        let (left_tiles, right_tiles) = (self.range().extent(), right.range().extent());
        helper
            .check_ranks(left_tiles.len(), right_tiles.len())
            .map_err(DistError::from)?;
        if !helper.inner_matches(left_tiles, right_tiles) {
            return Err(DistError::InnerExtentMismatch {
                dim: 0,
                left: format!("{:?}", helper.left_inner(left_tiles)),
                right: format!("{:?}", helper.right_inner(right_tiles)),
            });
        }
        let range = Range::from_extent(helper.make_result(left_tiles, right_tiles));
        if self.is_dense() && right.is_dense() {
            return Ok(Shape::Dense(range));
        }

        let (m, k, n) = helper.compute_matrix_sizes(left_tiles, right_tiles);
        let mut norms = vec![0.0; m * n];
        for i in 0..m {
            for p in 0..k {
                let l = i * k + p;
                if self.is_zero(l) {
                    continue;
                }
                let ln = self.norm(l);
                for j in 0..n {
                    let r = p * n + j;
                    if !right.is_zero(r) {
                        norms[i * n + j] += ln * right.norm(r);
                    }
                }
            }
        }
        let threshold = self.threshold() * right.threshold();
        Ok(Shape::Sparse(SparseShape::new(range, norms, threshold)?))
    }
}
