use crate::error::{DistError, Result};

/// How tiles are assigned to processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PmapKind {
    /// Contiguous blocks of `block` tiles per process; the last is truncated.
    Blocked { block: usize },
    /// Every process owns every tile.
    Replicated,
    /// Row-major `rows x cols` tile matrix dealt cyclically over a
    /// `proc_rows x proc_cols` process grid.
    Cyclic2D {
        rows: usize,
        cols: usize,
        proc_rows: usize,
        proc_cols: usize,
    },
}

/// Process map: owner of every tile of a tensor, as seen from one process.
///
/// `owner` is a pure function of the tile ordinal, so every process computes
/// the same answer without communicating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pmap {
    rank: usize,
    procs: usize,
    size: usize,
    kind: PmapKind,
    local: Vec<usize>,
}

impl Pmap {
    pub fn blocked(rank: usize, procs: usize, size: usize) -> Result<Self> {
        check_procs(rank, procs)?;
        let block = size.div_ceil(procs).max(1);
        let start = (rank * block).min(size);
        let end = ((rank + 1) * block).min(size);
        Ok(Pmap {
            rank,
            procs,
            size,
            kind: PmapKind::Blocked { block },
            local: (start..end).collect(),
        })
    }

    pub fn replicated(rank: usize, procs: usize, size: usize) -> Result<Self> {
        check_procs(rank, procs)?;
        Ok(Pmap {
            rank,
            procs,
            size,
            kind: PmapKind::Replicated,
            local: (0..size).collect(),
        })
    }

    pub fn cyclic_2d(
        rank: usize,
        procs: usize,
        rows: usize,
        cols: usize,
        proc_rows: usize,
        proc_cols: usize,
    ) -> Result<Self> {
        check_procs(rank, procs)?;
        if proc_rows == 0 || proc_cols == 0 || proc_rows * proc_cols > procs {
            return Err(DistError::InvalidProcessGrid(format!(
                "{}x{} grid does not fit {} processes",
                proc_rows, proc_cols, procs
            )));
        }
        let kind = PmapKind::Cyclic2D {
            rows,
            cols,
            proc_rows,
            proc_cols,
        };
        let size = rows * cols;
        let local = (0..size)
            .filter(|&i| cyclic_owner(i, cols, proc_rows, proc_cols) == rank)
            .collect();
        Ok(Pmap {
            rank,
            procs,
            size,
            kind,
            local,
        })
    }

    /// Rank of the process this map was built for.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn procs(&self) -> usize {
        self.procs
    }

    /// Number of tiles mapped.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn kind(&self) -> &PmapKind {
        &self.kind
    }

    pub fn is_replicated(&self) -> bool {
        matches!(self.kind, PmapKind::Replicated)
    }

    /// Owning process of tile `i`. For a replicated map this is the local
    /// process.
    pub fn owner(&self, i: usize) -> usize {
        debug_assert!(i < self.size, "tile {} out of {}", i, self.size);
        match self.kind {
            PmapKind::Blocked { block } => i / block,
            PmapKind::Replicated => self.rank,
            PmapKind::Cyclic2D {
                cols,
                proc_rows,
                proc_cols,
                ..
            } => cyclic_owner(i, cols, proc_rows, proc_cols),
        }
    }

    pub fn is_local(&self, i: usize) -> bool {
        self.is_replicated() || self.owner(i) == self.rank
    }

    /// Locally owned tiles in increasing order.
    pub fn local_tiles(&self) -> std::slice::Iter<'_, usize> {
        self.local.iter()
    }

    pub fn local_size(&self) -> usize {
        self.local.len()
    }
}

fn check_procs(rank: usize, procs: usize) -> Result<()> {
    if procs == 0 {
        return Err(DistError::InvalidProcessGrid(
            "no processes to map tiles to".to_string(),
        ));
    }
    if rank >= procs {
        return Err(DistError::InvalidProcessGrid(format!(
            "rank {} outside a group of {}",
            rank, procs
        )));
    }
    Ok(())
}

fn cyclic_owner(i: usize, cols: usize, proc_rows: usize, proc_cols: usize) -> usize {
    let (row, col) = (i / cols, i % cols);
    (row % proc_rows) * proc_cols + col % proc_cols
}
