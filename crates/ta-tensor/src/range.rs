use crate::error::{Result, TensorError};
use crate::permutation::Permutation;
use std::fmt;

/// A multi-dimensional index box: a lower bound and an extent per dimension.
///
/// Used both for the elements a tile covers and for the tile grid of a tiled
/// array. Ordinals are row-major offsets relative to the lower bound.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    lobound: Vec<usize>,
    extent: Vec<usize>,
}

impl Range {
    /// Create a range from lower bounds and extents.
    ///
    /// # Panics
    /// Panics if `lobound.len() != extent.len()`.
    pub fn new(lobound: Vec<usize>, extent: Vec<usize>) -> Self {
        assert_eq!(
            lobound.len(),
            extent.len(),
            "lobound {:?} and extent {:?} differ in rank",
            lobound,
            extent
        );
        Range { lobound, extent }
    }

    /// Create a range with a zero lower bound.
    pub fn from_extent(extent: Vec<usize>) -> Self {
        Range {
            lobound: vec![0; extent.len()],
            extent,
        }
    }

    /// Create a range from inclusive lower and exclusive upper bounds.
    pub fn from_bounds(lobound: &[usize], upbound: &[usize]) -> Result<Self> {
        if lobound.len() != upbound.len() {
            return Err(TensorError::RankMismatch {
                expected: lobound.len(),
                got: upbound.len(),
            });
        }
        let mut extent = Vec::with_capacity(lobound.len());
        for (&lo, &up) in lobound.iter().zip(upbound) {
            if up < lo {
                return Err(TensorError::Other(format!(
                    "upper bound {:?} below lower bound {:?}",
                    upbound, lobound
                )));
            }
            extent.push(up - lo);
        }
        Ok(Range::new(lobound.to_vec(), extent))
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.extent.len()
    }

    pub fn lobound(&self) -> &[usize] {
        &self.lobound
    }

    pub fn extent(&self) -> &[usize] {
        &self.extent
    }

    /// Exclusive upper bound per dimension.
    pub fn upbound(&self) -> Vec<usize> {
        self.lobound
            .iter()
            .zip(&self.extent)
            .map(|(lo, ex)| lo + ex)
            .collect()
    }

    /// Total number of indices in the box (1 for rank 0).
    pub fn volume(&self) -> usize {
        self.extent.iter().product()
    }

    /// Row-major strides: for extent [d0, d1, d2] they are [d1*d2, d2, 1].
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.extent.len()];
        for i in (0..self.extent.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.extent[i + 1];
        }
        strides
    }

    /// Returns true if `coord` lies inside the box.
    pub fn contains(&self, coord: &[usize]) -> bool {
        coord.len() == self.rank()
            && coord
                .iter()
                .zip(self.lobound.iter().zip(&self.extent))
                .all(|(&c, (&lo, &ex))| c >= lo && c < lo + ex)
    }

    /// Returns true if `ord` is a valid ordinal of this range.
    pub fn includes_ordinal(&self, ord: usize) -> bool {
        ord < self.volume()
    }

    /// Row-major ordinal of an absolute coordinate.
    ///
    /// # Panics
    /// Panics in debug builds if `coord` is outside the range.
    pub fn ordinal(&self, coord: &[usize]) -> usize {
        debug_assert!(self.contains(coord), "{:?} not in {}", coord, self);
        let mut ord = 0;
        for ((&c, &lo), &ex) in coord.iter().zip(&self.lobound).zip(&self.extent) {
            ord = ord * ex + (c - lo);
        }
        ord
    }

    /// Absolute coordinate of a row-major ordinal.
    pub fn coord(&self, mut ord: usize) -> Vec<usize> {
        debug_assert!(self.includes_ordinal(ord));
        let mut coord = vec![0; self.rank()];
        for i in (0..self.rank()).rev() {
            let ex = self.extent[i];
            coord[i] = self.lobound[i] + ord % ex;
            ord /= ex;
        }
        coord
    }

    /// Like [`ordinal`](Self::ordinal) but checked.
    pub fn try_ordinal(&self, coord: &[usize]) -> Result<usize> {
        if !self.contains(coord) {
            return Err(TensorError::OutOfRange {
                coord: coord.to_vec(),
                range: self.to_string(),
            });
        }
        Ok(self.ordinal(coord))
    }

    /// All coordinates in row-major order.
    pub fn coords(&self) -> impl Iterator<Item = Vec<usize>> + '_ {
        (0..self.volume()).map(move |ord| self.coord(ord))
    }

    /// Reorder the dimensions: dimension `i` moves to position `perm[i]`.
    pub fn permute(&self, perm: &Permutation) -> Result<Range> {
        if perm.dim() != self.rank() {
            return Err(TensorError::RankMismatch {
                expected: self.rank(),
                got: perm.dim(),
            });
        }
        Ok(Range::new(perm.apply(&self.lobound), perm.apply(&self.extent)))
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let up = self.upbound();
        write!(f, "[")?;
        for (i, (lo, up)) in self.lobound.iter().zip(&up).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}..{}", lo, up)?;
        }
        write!(f, "]")
    }
}

impl From<Vec<usize>> for Range {
    fn from(extent: Vec<usize>) -> Self {
        Range::from_extent(extent)
    }
}

impl From<&[usize]> for Range {
    fn from(extent: &[usize]) -> Self {
        Range::from_extent(extent.to_vec())
    }
}
