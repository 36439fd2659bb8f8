use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use ta_runtime::{Dependency, Future, ObjectId, ReleaseGuard};
use ta_tensor::{GemmHelper, Permutation, Scalar, TensorError, Tile};
use tracing::{debug, trace};

use crate::array_eval::ArrayEval;
use crate::dist_array::DistArray;
use crate::dist_eval::{DistEval, EvalCore, EvalStatus};
use crate::error::{DistError, Result};
use crate::pmap::Pmap;
use crate::proc_grid::ProcGrid;
use crate::shape::Shape;
use crate::tiled_range::TiledRange;

/// How two operands are contracted: the mode mapping, a permutation applied
/// to the result, and a scaling factor.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractionMetadata<S> {
    pub helper: GemmHelper,
    pub perm: Permutation,
    pub factor: S,
}

impl<S: Scalar> ContractionMetadata<S> {
    /// Unscaled, unpermuted contraction.
    pub fn new(helper: GemmHelper) -> Self {
        ContractionMetadata {
            perm: Permutation::identity(helper.result_rank()),
            helper,
            factor: S::one(),
        }
    }

    pub fn with_perm(mut self, perm: Permutation) -> Self {
        self.perm = perm;
        self
    }

    pub fn with_factor(mut self, factor: S) -> Self {
        self.factor = factor;
        self
    }
}

/// Work done by one process for one contraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractionStats {
    /// Contract-and-accumulate tasks scheduled.
    pub contract_tasks: usize,
    /// Phases skipped for nonzero outputs because an operand tile is zero.
    pub skipped_phases: usize,
    /// Left panel tiles fetched from another process.
    pub left_fetches: usize,
    /// Right panel tiles fetched from another process.
    pub right_fetches: usize,
    /// Result tiles sent to an owner outside this grid position.
    pub forwarded_tiles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

/// The registered part of a contraction: the result tiles and the work
/// counters of this process.
pub(crate) struct ContractionShared<T: Tile> {
    core: EvalCore<T>,
    stats: Cell<ContractionStats>,
}

impl<T: Tile> ContractionShared<T> {
    fn serve(&self, index: usize) -> Result<Future<T>> {
        self.core.check_get(index)?;
        Ok(self.core.future(index))
    }

    fn deliver(&self, index: usize, tile: T) -> Result<()> {
        let future = self.core.future(index);
        if future.probe() {
            return Err(DistError::TileAlreadySet(index));
        }
        future.set(tile);
        Ok(())
    }

    fn update_stats(&self, f: impl FnOnce(&mut ContractionStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

/// SUMMA contraction of two evaluators over a process grid.
///
/// Operands are viewed as `M x K` and `K x N` tile matrices, distributed
/// over the grid's row and column phase pmaps. Grid process
/// `(m % proc_rows, n % proc_cols)` computes result tile `(m, n)`: for each
/// phase `k` where both `L(m,k)` and `R(k,n)` are nonzero it fetches the two
/// panel tiles from the operand evaluators, so a panel tile travels along
/// its grid row or column only to processes that use it. Partial products
/// are accumulated in ascending `k`; the sum is scaled by `factor`, permuted
/// and handed to its owner under the result pmap.
pub struct ContractionEval<T: Tile> {
    left: Box<DistEval<T>>,
    right: Box<DistEval<T>>,
    grid: ProcGrid,
    meta: ContractionMetadata<T::Scalar>,
    /// Result layout before `meta.perm`.
    trange: TiledRange,
    shape: Shape,
    sizes: (usize, usize, usize),
    left_panels: RefCell<HashMap<usize, Future<T>>>,
    right_panels: RefCell<HashMap<usize, Future<T>>>,
    shared: Rc<ContractionShared<T>>,
    id: ObjectId,
    _guard: ReleaseGuard,
}

/// Checks that the operands can be contracted as described by `helper`.
fn check_operands(helper: &GemmHelper, left: &TiledRange, right: &TiledRange) -> Result<()> {
    if left.rank() != helper.left_rank() {
        return Err(DistError::RankMismatch {
            expected: helper.left_rank(),
            got: left.rank(),
        });
    }
    if right.rank() != helper.right_rank() {
        return Err(DistError::RankMismatch {
            expected: helper.right_rank(),
            got: right.rank(),
        });
    }
    let inner = helper.left_inner(left.dims()).iter();
    for (dim, (l, r)) in inner.zip(helper.right_inner(right.dims())).enumerate() {
        if l != r {
            return Err(DistError::InnerExtentMismatch {
                dim,
                left: l.to_string(),
                right: r.to_string(),
            });
        }
    }
    Ok(())
}

impl<T: Tile> ContractionEval<T> {
    /// Contract `left` with `right`, producing a result with the given shape
    /// and distribution. `shape` and `pmap` describe the permuted result.
    pub fn new(
        left: DistEval<T>,
        right: DistEval<T>,
        grid: ProcGrid,
        meta: ContractionMetadata<T::Scalar>,
        shape: Shape,
        pmap: Pmap,
    ) -> Result<Self> {
        let helper = meta.helper;
        check_operands(&helper, left.trange(), right.trange())?;
        if meta.perm.dim() != helper.result_rank() {
            return Err(DistError::RankMismatch {
                expected: helper.result_rank(),
                got: meta.perm.dim(),
            });
        }
        let trange = TiledRange::new(helper.make_result(left.trange().dims(), right.trange().dims()));
        let result_trange = trange.permute(&meta.perm)?;
        shape.validate(result_trange.tiles_range())?;
        let unpermuted = shape.permute(&meta.perm.inverse())?;

        let sizes = helper.compute_matrix_sizes(
            left.trange().tiles_range().extent(),
            right.trange().tiles_range().extent(),
        );
        let (m, _, n) = sizes;
        let world = left.world().clone();
        if grid.rows() != m || grid.cols() != n {
            return Err(DistError::InvalidProcessGrid(format!(
                "grid covers {}x{} tiles but the result has {}x{}",
                grid.rows(),
                grid.cols(),
                m,
                n
            )));
        }
        if grid.rank() != world.rank() || grid.procs() != world.size() {
            return Err(DistError::InvalidProcessGrid(format!(
                "grid built for rank {} of {}, not rank {} of {}",
                grid.rank(),
                grid.procs(),
                world.rank(),
                world.size()
            )));
        }

        let core = EvalCore::new(world.clone(), result_trange, shape, pmap)?;
        let shared = Rc::new(ContractionShared {
            core,
            stats: Cell::new(ContractionStats::default()),
        });
        let id = world.register_object(Rc::clone(&shared));
        debug!(
            rank = world.rank(),
            id,
            m,
            k = sizes.1,
            n,
            proc_rows = grid.proc_rows(),
            proc_cols = grid.proc_cols(),
            "created contraction"
        );
        Ok(ContractionEval {
            left: Box::new(left),
            right: Box::new(right),
            grid,
            meta,
            trange,
            shape: unpermuted,
            sizes,
            left_panels: RefCell::new(HashMap::new()),
            right_panels: RefCell::new(HashMap::new()),
            shared,
            id,
            _guard: ReleaseGuard::new(world, id),
        })
    }

    /// Contract two stored arrays.
    ///
    /// Builds the process grid, evaluators that redistribute the operands
    /// over the grid's phase pmaps, and the result shape. The result is
    /// distributed over the grid when unpermuted and blocked otherwise.
    pub fn from_arrays(
        left: &DistArray<T>,
        right: &DistArray<T>,
        meta: ContractionMetadata<T::Scalar>,
    ) -> Result<Self> {
        let helper = meta.helper;
        check_operands(&helper, left.trange(), right.trange())?;
        let world = left.world();
        let (m, k, n) = helper.compute_matrix_sizes(
            left.trange().tiles_range().extent(),
            right.trange().tiles_range().extent(),
        );
        let row_elements: usize = helper
            .left_outer(left.trange().elements_range().extent())
            .iter()
            .product();
        let col_elements: usize = helper
            .right_outer(right.trange().elements_range().extent())
            .iter()
            .product();
        let grid = ProcGrid::new(world.rank(), world.size(), m, n, row_elements, col_elements)?;

        let left_eval = ArrayEval::new(
            left.clone(),
            grid.make_row_phase_pmap(k)?,
            Permutation::identity(helper.left_rank()),
        )?;
        let right_eval = ArrayEval::new(
            right.clone(),
            grid.make_col_phase_pmap(k)?,
            Permutation::identity(helper.right_rank()),
        )?;
        let shape = left
            .shape()
            .gemm(right.shape(), &helper)?
            .permute(&meta.perm)?;
        let pmap = if meta.perm.is_identity() {
            grid.make_pmap()?
        } else {
            Pmap::blocked(world.rank(), world.size(), m * n)?
        };
        Self::new(left_eval.into(), right_eval.into(), grid, meta, shape, pmap)
    }

    pub(crate) fn core(&self) -> &EvalCore<T> {
        &self.shared.core
    }

    pub fn left(&self) -> &DistEval<T> {
        &self.left
    }

    pub fn right(&self) -> &DistEval<T> {
        &self.right
    }

    pub fn grid(&self) -> &ProcGrid {
        &self.grid
    }

    pub fn metadata(&self) -> &ContractionMetadata<T::Scalar> {
        &self.meta
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Counters for the work done on this process so far.
    pub fn stats(&self) -> ContractionStats {
        self.shared.stats.get()
    }

    pub fn get(&self, index: usize) -> Result<Future<T>> {
        self.shared.serve(index)
    }

    /// Future for nonzero result tile `index` wherever it lives.
    pub fn fetch(&self, index: usize) -> Result<Future<T>> {
        let Some(owner) = self.core().remote_owner(index)? else {
            return self.get(index);
        };
        let future = self
            .core()
            .world()
            .request::<ContractionShared<T>, T, DistError, _>(owner, self.id, move |_, shared| {
                shared.serve(index)
            })?;
        Ok(future)
    }

    /// Schedule the contraction tasks of this process.
    ///
    /// Operands that have not been evaluated yet are activated without
    /// prefetching: their tiles are only fetched for phases that some
    /// nonzero result tile of this grid position uses.
    pub fn eval(&self) -> Result<()> {
        let core = self.core();
        core.begin_eval()?;
        for operand in [&self.left, &self.right] {
            if operand.status() == EvalStatus::Constructed {
                operand.activate()?;
            }
        }
        for index in core.local_tiles() {
            core.track(&core.future(index));
        }
        self.compute()?;
        let stats = self.stats();
        debug!(
            rank = core.world().rank(),
            id = self.id,
            tasks = stats.contract_tasks,
            skipped = stats.skipped_phases,
            left_fetched = stats.left_fetches,
            right_fetched = stats.right_fetches,
            pending = core.pending(),
            "contraction scheduled"
        );
        Ok(())
    }

    /// Finish local work, including the operands', without fencing.
    pub(crate) fn drain(&self) -> Result<()> {
        self.core().await_pending()?;
        self.left.drain()?;
        self.right.drain()?;
        self.left_panels.borrow_mut().clear();
        self.right_panels.borrow_mut().clear();
        Ok(())
    }

    fn result_is_zero(&self, m: usize, n: usize) -> bool {
        self.shape.is_zero(m * self.sizes.2 + n)
    }

    /// Local copy of operand tile `index`, fetched on first use.
    fn panel(&self, side: Side, index: usize) -> Result<Future<T>> {
        let (panels, operand) = match side {
            Side::Left => (&self.left_panels, &self.left),
            Side::Right => (&self.right_panels, &self.right),
        };
        if let Some(tile) = panels.borrow().get(&index) {
            return Ok(tile.clone());
        }
        let tile = operand.fetch(index)?;
        if !operand.pmap().is_local(index) {
            trace!(rank = self.core().world().rank(), index, ?side, "fetch panel tile");
            self.shared.update_stats(|s| match side {
                Side::Left => s.left_fetches += 1,
                Side::Right => s.right_fetches += 1,
            });
        }
        panels.borrow_mut().insert(index, tile.clone());
        Ok(tile)
    }

    /// Schedule the contract tasks for the result tiles of this grid
    /// position.
    fn compute(&self) -> Result<()> {
        let Some((row, col)) = self.grid.position() else {
            return Ok(());
        };
        let (m_tiles, k_tiles, n_tiles) = self.sizes;
        let (rows, cols) = (self.grid.proc_rows(), self.grid.proc_cols());
        for m in (row..m_tiles).step_by(rows) {
            for n in (col..n_tiles).step_by(cols) {
                if self.result_is_zero(m, n) {
                    continue;
                }
                let phases: Vec<usize> = (0..k_tiles)
                    .filter(|&k| {
                        !self.left.is_zero(m * k_tiles + k) && !self.right.is_zero(k * n_tiles + n)
                    })
                    .collect();
                self.shared.update_stats(|s| {
                    s.contract_tasks += phases.len();
                    s.skipped_phases += k_tiles - phases.len();
                });
                self.schedule_tile(m, n, &phases)?;
            }
        }
        Ok(())
    }

    /// Chain one task per phase into an accumulator, then a final task that
    /// delivers the finished tile.
    fn schedule_tile(&self, m: usize, n: usize, phases: &[usize]) -> Result<()> {
        let world = self.core().world();
        let (_, k_tiles, n_tiles) = self.sizes;
        let unpermuted = m * n_tiles + n;
        let range = self.trange.make_tile_range(unpermuted);
        let acc: Rc<RefCell<Option<T>>> = Rc::new(RefCell::new(None));
        let mut previous: Option<Future<()>> = None;

        for &k in phases {
            let left = self.panel(Side::Left, m * k_tiles + k)?;
            let right = self.panel(Side::Right, k * n_tiles + n)?;
            let mut deps: Vec<&dyn Dependency> = Vec::with_capacity(3);
            deps.push(&left);
            deps.push(&right);
            if let Some(p) = &previous {
                deps.push(p);
            }
            let (l, r, acc) = (left.clone(), right.clone(), Rc::clone(&acc));
            let helper = self.meta.helper;
            let zero = range.clone();
            let done = world.add_task(&deps, move |_| -> Result<()> {
                let one = <T::Scalar as Scalar>::one();
                let partial = l
                    .with(|lt| r.with(|rt| lt.contract(rt, &helper, one)))
                    .flatten()
                    .ok_or_else(|| missing("operand", k))??;
                let mut acc = acc.borrow_mut();
                acc.get_or_insert_with(|| T::zeros(zero))
                    .accumulate(&partial)?;
                Ok(())
            });
            previous = Some(done);
        }

        let (perm, factor) = (self.meta.perm.clone(), self.meta.factor);
        let coord = self.trange.tiles_range().coord(unpermuted);
        let index = self.core().trange().tiles_range().ordinal(&perm.apply(&coord));
        let pmap = self.core().pmap();
        let owners: Vec<usize> = if pmap.is_replicated() {
            (0..pmap.procs()).collect()
        } else {
            vec![pmap.owner(index)]
        };
        let (shared, id) = (Rc::clone(&self.shared), self.id);
        let deps: Vec<&dyn Dependency> = previous.iter().map(|p| p as &dyn Dependency).collect();
        world.add_task(&deps, move |world| -> Result<()> {
            let mut tile = acc.borrow_mut().take().unwrap_or_else(|| T::zeros(range));
            if factor != <T::Scalar as Scalar>::one() {
                tile = tile.scale(factor);
            }
            let tile = if perm.is_identity() {
                tile
            } else {
                tile.permute(&perm)?
            };
            for owner in owners {
                if owner == world.rank() {
                    shared.deliver(index, tile.clone())?;
                    continue;
                }
                trace!(from = world.rank(), owner, index, "forward result tile");
                let value = tile.clone();
                world.send_to_object::<ContractionShared<T>, DistError, _>(
                    owner,
                    id,
                    move |_, shared| shared.deliver(index, value),
                )?;
                shared.update_stats(|s| s.forwarded_tiles += 1);
            }
            Ok(())
        });
        Ok(())
    }
}

fn missing(what: &str, index: usize) -> DistError {
    DistError::Tensor(TensorError::Other(format!("{} tile {} missing", what, index)))
}

impl<T: Tile> std::fmt::Debug for ContractionEval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractionEval")
            .field("id", &self.id)
            .field("grid", &self.grid)
            .field("sizes", &self.sizes)
            .field("trange", &self.core().trange().to_string())
            .finish()
    }
}
