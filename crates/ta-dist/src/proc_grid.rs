use tracing::debug;

use crate::error::{DistError, Result};
use crate::pmap::Pmap;

/// A 2D arrangement of processes for SUMMA-style contraction.
///
/// The result is a `rows x cols` tile matrix. Process `(r, c)` of the
/// `proc_rows x proc_cols` grid computes result tiles `(m, n)` with
/// `m % proc_rows == r` and `n % proc_cols == c`. Ranks at or beyond
/// `proc_size` are not part of the grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcGrid {
    rank: usize,
    procs: usize,
    rows: usize,
    cols: usize,
    proc_rows: usize,
    proc_cols: usize,
}

impl ProcGrid {
    /// Choose a grid for a `rows x cols` tile matrix covering
    /// `row_elements x col_elements` elements.
    ///
    /// Minimizes the larger of the per-process row and column panel extents,
    /// preferring grids that use more processes and then squarer ones.
    pub fn new(
        rank: usize,
        procs: usize,
        rows: usize,
        cols: usize,
        row_elements: usize,
        col_elements: usize,
    ) -> Result<Self> {
        if procs == 0 {
            return Err(DistError::InvalidProcessGrid(
                "process count is zero".to_string(),
            ));
        }
        if rank >= procs {
            return Err(DistError::InvalidProcessGrid(format!(
                "rank {} outside a group of {}",
                rank, procs
            )));
        }

        let mut best = (1, 1);
        let mut best_key = (usize::MAX, 0, usize::MAX);
        for pr in 1..=procs.min(rows.max(1)) {
            for pc in 1..=(procs / pr).min(cols.max(1)) {
                let cost = row_elements.div_ceil(pr).max(col_elements.div_ceil(pc));
                // Lower cost, then more processes, then squarer.
                let key = (cost, usize::MAX - pr * pc, pr.abs_diff(pc));
                if key < best_key {
                    best_key = key;
                    best = (pr, pc);
                }
            }
        }
        let (proc_rows, proc_cols) = best;
        debug!(rank, procs, rows, cols, proc_rows, proc_cols, "process grid");
        Ok(ProcGrid {
            rank,
            procs,
            rows,
            cols,
            proc_rows,
            proc_cols,
        })
    }

    /// A grid with explicit dimensions.
    pub fn with_dims(
        rank: usize,
        procs: usize,
        rows: usize,
        cols: usize,
        proc_rows: usize,
        proc_cols: usize,
    ) -> Result<Self> {
        if procs == 0 || proc_rows == 0 || proc_cols == 0 || proc_rows * proc_cols > procs {
            return Err(DistError::InvalidProcessGrid(format!(
                "{}x{} grid does not fit {} processes",
                proc_rows, proc_cols, procs
            )));
        }
        if rank >= procs {
            return Err(DistError::InvalidProcessGrid(format!(
                "rank {} outside a group of {}",
                rank, procs
            )));
        }
        Ok(ProcGrid {
            rank,
            procs,
            rows,
            cols,
            proc_rows,
            proc_cols,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn procs(&self) -> usize {
        self.procs
    }

    /// Result tile rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Result tile columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn proc_rows(&self) -> usize {
        self.proc_rows
    }

    pub fn proc_cols(&self) -> usize {
        self.proc_cols
    }

    /// Number of processes in the grid.
    pub fn proc_size(&self) -> usize {
        self.proc_rows * self.proc_cols
    }

    /// Grid position `(row, col)` of this process, if it is in the grid.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.position_of(self.rank)
    }

    pub fn position_of(&self, rank: usize) -> Option<(usize, usize)> {
        (rank < self.proc_size()).then(|| (rank / self.proc_cols, rank % self.proc_cols))
    }

    pub fn rank_of(&self, row: usize, col: usize) -> usize {
        row * self.proc_cols + col
    }

    /// Distribution of a `rows x inner` left operand: tile `(m, k)` lives on
    /// grid process `(m % proc_rows, k % proc_cols)`.
    pub fn make_row_phase_pmap(&self, inner: usize) -> Result<Pmap> {
        Pmap::cyclic_2d(
            self.rank,
            self.procs,
            self.rows,
            inner,
            self.proc_rows,
            self.proc_cols,
        )
    }

    /// Distribution of an `inner x cols` right operand: tile `(k, n)` lives on
    /// grid process `(k % proc_rows, n % proc_cols)`.
    pub fn make_col_phase_pmap(&self, inner: usize) -> Result<Pmap> {
        Pmap::cyclic_2d(
            self.rank,
            self.procs,
            inner,
            self.cols,
            self.proc_rows,
            self.proc_cols,
        )
    }

    /// Result distribution aligned with the grid, so no result tile has to
    /// be forwarded after it is computed.
    pub fn make_pmap(&self) -> Result<Pmap> {
        Pmap::cyclic_2d(
            self.rank,
            self.procs,
            self.rows,
            self.cols,
            self.proc_rows,
            self.proc_cols,
        )
    }
}
