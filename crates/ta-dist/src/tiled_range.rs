use std::fmt;

use ta_tensor::{Permutation, Range};

use crate::error::{DistError, Result};

/// Partition of one dimension into contiguous tiles.
///
/// Tile `i` covers elements `boundaries[i]..boundaries[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TiledRange1 {
    boundaries: Vec<usize>,
}

impl TiledRange1 {
    /// Boundaries must hold at least two strictly increasing values.
    pub fn new(boundaries: Vec<usize>) -> Result<Self> {
        if boundaries.len() < 2 {
            return Err(DistError::InvalidTiledRange(format!(
                "need at least two boundaries, got {:?}",
                boundaries
            )));
        }
        if boundaries.windows(2).any(|w| w[0] >= w[1]) {
            return Err(DistError::InvalidTiledRange(format!(
                "boundaries {:?} are not strictly increasing",
                boundaries
            )));
        }
        Ok(TiledRange1 { boundaries })
    }

    /// `extent` elements from zero in tiles of `tile_size` (the last one may
    /// be shorter).
    pub fn uniform(extent: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(DistError::InvalidTiledRange("tile size is zero".to_string()));
        }
        let mut boundaries: Vec<usize> = (0..extent).step_by(tile_size).collect();
        boundaries.push(extent);
        Self::new(boundaries)
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn tile_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// First element.
    pub fn lobound(&self) -> usize {
        self.boundaries[0]
    }

    /// One past the last element.
    pub fn upbound(&self) -> usize {
        self.boundaries[self.boundaries.len() - 1]
    }

    pub fn element_count(&self) -> usize {
        self.upbound() - self.lobound()
    }

    /// Element bounds `(start, end)` of tile `i`.
    pub fn tile(&self, i: usize) -> (usize, usize) {
        (self.boundaries[i], self.boundaries[i + 1])
    }

    pub fn tile_extent(&self, i: usize) -> usize {
        self.boundaries[i + 1] - self.boundaries[i]
    }

    /// Index of the tile holding `element`.
    pub fn element_to_tile(&self, element: usize) -> Option<usize> {
        if element < self.lobound() || element >= self.upbound() {
            return None;
        }
        Some(self.boundaries.partition_point(|&b| b <= element) - 1)
    }
}

impl fmt::Display for TiledRange1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, b) in self.boundaries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", b)?;
        }
        write!(f, ")")
    }
}

/// Tiling of a multi-dimensional element range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledRange {
    dims: Vec<TiledRange1>,
    tiles: Range,
    elements: Range,
}

impl TiledRange {
    pub fn new(dims: Vec<TiledRange1>) -> Self {
        let tiles = Range::from_extent(dims.iter().map(|d| d.tile_count()).collect());
        let elements = Range::new(
            dims.iter().map(|d| d.lobound()).collect(),
            dims.iter().map(|d| d.element_count()).collect(),
        );
        TiledRange {
            dims,
            tiles,
            elements,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[TiledRange1] {
        &self.dims
    }

    pub fn dim(&self, i: usize) -> &TiledRange1 {
        &self.dims[i]
    }

    /// Range of tile coordinates.
    pub fn tiles_range(&self) -> &Range {
        &self.tiles
    }

    /// Range of element coordinates.
    pub fn elements_range(&self) -> &Range {
        &self.elements
    }

    /// Number of tiles.
    pub fn volume(&self) -> usize {
        self.tiles.volume()
    }

    /// Element range covered by tile `ord`.
    pub fn make_tile_range(&self, ord: usize) -> Range {
        self.make_tile_range_at(&self.tiles.coord(ord))
    }

    /// Element range covered by the tile at `coord`.
    pub fn make_tile_range_at(&self, coord: &[usize]) -> Range {
        let (lo, ex) = self
            .dims
            .iter()
            .zip(coord)
            .map(|(d, &i)| (d.tile(i).0, d.tile_extent(i)))
            .unzip();
        Range::new(lo, ex)
    }

    /// Ordinal of the tile holding element `coord`.
    pub fn element_to_tile(&self, coord: &[usize]) -> Option<usize> {
        if coord.len() != self.rank() {
            return None;
        }
        let tile: Option<Vec<usize>> = self
            .dims
            .iter()
            .zip(coord)
            .map(|(d, &e)| d.element_to_tile(e))
            .collect();
        tile.map(|t| self.tiles.ordinal(&t))
    }

    pub fn permute(&self, perm: &Permutation) -> Result<TiledRange> {
        if perm.dim() != self.rank() {
            return Err(DistError::RankMismatch {
                expected: self.rank(),
                got: perm.dim(),
            });
        }
        Ok(TiledRange::new(perm.apply(&self.dims)))
    }
}

impl fmt::Display for TiledRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}
