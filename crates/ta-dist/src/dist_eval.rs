use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use ta_runtime::{Future, World};
use ta_tensor::{Range, Tile};

use crate::array_eval::ArrayEval;
use crate::contraction_eval::ContractionEval;
use crate::error::{DistError, Result};
use crate::pmap::Pmap;
use crate::shape::Shape;
use crate::tiled_range::TiledRange;

/// Lifecycle of an evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalStatus {
    Constructed,
    /// `eval` has been called; tiles may still be outstanding.
    Active,
    Complete,
}

type TileMap<T> = Rc<RefCell<HashMap<usize, Future<T>>>>;

/// State shared by every evaluator kind: the result layout, memoized tile
/// futures and the outstanding-tile counter.
pub(crate) struct EvalCore<T> {
    world: World,
    trange: Arc<TiledRange>,
    shape: Arc<Shape>,
    pmap: Arc<Pmap>,
    tiles: TileMap<T>,
    pending: Rc<Cell<usize>>,
    status: Cell<EvalStatus>,
}

impl<T: Tile> EvalCore<T> {
    pub fn new(world: World, trange: TiledRange, shape: Shape, pmap: Pmap) -> Result<Self> {
        shape.validate(trange.tiles_range())?;
        if pmap.size() != trange.volume() {
            return Err(DistError::PmapSizeMismatch {
                expected: trange.volume(),
                got: pmap.size(),
            });
        }
        Ok(EvalCore {
            world,
            trange: Arc::new(trange),
            shape: Arc::new(shape),
            pmap: Arc::new(pmap),
            tiles: Rc::new(RefCell::new(HashMap::new())),
            pending: Rc::new(Cell::new(0)),
            status: Cell::new(EvalStatus::Constructed),
        })
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn trange(&self) -> &TiledRange {
        &self.trange
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn pmap(&self) -> &Pmap {
        &self.pmap
    }

    pub fn status(&self) -> EvalStatus {
        self.status.get()
    }

    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// `get` is only valid for local, nonzero tiles.
    pub fn check_get(&self, index: usize) -> Result<()> {
        if index >= self.trange.volume() {
            return Err(DistError::TileOutOfRange {
                index,
                size: self.trange.volume(),
            });
        }
        if !self.pmap.is_local(index) {
            return Err(DistError::NonLocalTile {
                index,
                rank: self.pmap.rank(),
            });
        }
        if self.shape.is_zero(index) {
            return Err(DistError::ZeroTile(index));
        }
        Ok(())
    }

    /// The process to fetch nonzero tile `index` from, or `None` if this
    /// process holds it.
    pub fn remote_owner(&self, index: usize) -> Result<Option<usize>> {
        if index >= self.trange.volume() {
            return Err(DistError::TileOutOfRange {
                index,
                size: self.trange.volume(),
            });
        }
        if self.shape.is_zero(index) {
            return Err(DistError::ZeroTile(index));
        }
        Ok((!self.pmap.is_local(index)).then(|| self.pmap.owner(index)))
    }

    /// Indices with a future, in increasing order.
    pub fn requested(&self) -> Vec<usize> {
        let mut tiles: Vec<usize> = self.tiles.borrow().keys().copied().collect();
        tiles.sort_unstable();
        tiles
    }

    /// The future for `index`, created on first use.
    pub fn future(&self, index: usize) -> Future<T> {
        self.tiles
            .borrow_mut()
            .entry(index)
            .or_insert_with(Future::new)
            .clone()
    }

    /// The future for `index`, produced by `make` on first use.
    pub fn memoize(&self, index: usize, make: impl FnOnce() -> Result<Future<T>>) -> Result<Future<T>> {
        if let Some(f) = self.tiles.borrow().get(&index) {
            return Ok(f.clone());
        }
        let f = make()?;
        self.tiles.borrow_mut().insert(index, f.clone());
        Ok(f)
    }

    /// Count `future` as outstanding until it resolves.
    pub fn track(&self, future: &Future<T>) {
        let pending = Rc::clone(&self.pending);
        pending.set(pending.get() + 1);
        future.register_callback(move || pending.set(pending.get() - 1));
    }

    pub fn begin_eval(&self) -> Result<()> {
        if self.status.get() != EvalStatus::Constructed {
            return Err(DistError::AlreadyEvaluated);
        }
        self.status.set(EvalStatus::Active);
        Ok(())
    }

    /// Local nonzero tile indices in increasing order.
    pub fn local_tiles(&self) -> Vec<usize> {
        self.pmap
            .local_tiles()
            .copied()
            .filter(|&i| !self.shape.is_zero(i))
            .collect()
    }

    /// Run work until every tracked tile has resolved.
    pub fn await_pending(&self) -> Result<()> {
        if self.status.get() == EvalStatus::Constructed {
            return Err(DistError::NotEvaluated);
        }
        let pending = Rc::clone(&self.pending);
        self.world
            .await_until("evaluator tiles", || pending.get() == 0)?;
        self.status.set(EvalStatus::Complete);
        Ok(())
    }
}

/// A node of a distributed evaluation tree.
///
/// Every process builds the same tree in the same order. `get` hands out
/// futures for local tiles without blocking; only `wait` blocks, and it keeps
/// executing tasks and handling messages while it does.
pub enum DistEval<T: Tile> {
    Array(ArrayEval<T>),
    Contraction(ContractionEval<T>),
}

impl<T: Tile> DistEval<T> {
    fn core(&self) -> &EvalCore<T> {
        match self {
            DistEval::Array(e) => e.core(),
            DistEval::Contraction(e) => e.core(),
        }
    }

    /// Future for local, nonzero tile `index`. Repeated calls return the
    /// same future.
    pub fn get(&self, index: usize) -> Result<Future<T>> {
        match self {
            DistEval::Array(e) => e.get(index),
            DistEval::Contraction(e) => e.get(index),
        }
    }

    /// Structural zero test; never computes anything.
    pub fn is_zero(&self, index: usize) -> bool {
        self.core().shape().is_zero(index)
    }

    pub fn shape(&self) -> &Shape {
        self.core().shape()
    }

    pub fn pmap(&self) -> &Pmap {
        self.core().pmap()
    }

    pub fn trange(&self) -> &TiledRange {
        self.core().trange()
    }

    pub fn world(&self) -> &World {
        self.core().world()
    }

    /// Element range of tile `index`.
    pub fn range(&self, index: usize) -> Range {
        self.core().trange().make_tile_range(index)
    }

    /// Number of tiles.
    pub fn size(&self) -> usize {
        self.core().trange().volume()
    }

    pub fn status(&self) -> EvalStatus {
        self.core().status()
    }

    /// Local tiles not yet resolved.
    pub fn pending(&self) -> usize {
        self.core().pending()
    }

    /// Local nonzero tiles in increasing order.
    pub fn local_tiles(&self) -> Vec<usize> {
        self.core().local_tiles()
    }

    /// Future for nonzero tile `index` from whichever process holds it.
    pub fn fetch(&self, index: usize) -> Result<Future<T>> {
        match self {
            DistEval::Array(e) => e.fetch(index),
            DistEval::Contraction(e) => e.fetch(index),
        }
    }

    /// Start computing every local tile. Does not block.
    pub fn eval(&self) -> Result<()> {
        match self {
            DistEval::Array(e) => e.eval(),
            DistEval::Contraction(e) => e.eval(),
        }
    }

    /// Start evaluation on behalf of a consumer that pulls tiles with
    /// `fetch`. Stored tiles are then only requested when fetched.
    pub(crate) fn activate(&self) -> Result<()> {
        match self {
            DistEval::Array(e) => e.core().begin_eval(),
            DistEval::Contraction(e) => e.eval(),
        }
    }

    /// Collective: block until every local tile has resolved and the group
    /// has passed a fence.
    pub fn wait(&self) -> Result<()> {
        self.drain()?;
        self.core().world().fence()?;
        Ok(())
    }

    /// Finish local work in this subtree without fencing.
    pub(crate) fn drain(&self) -> Result<()> {
        match self {
            DistEval::Array(e) => e.core().await_pending(),
            DistEval::Contraction(e) => e.drain(),
        }
    }
}

impl<T: Tile> From<ArrayEval<T>> for DistEval<T> {
    fn from(e: ArrayEval<T>) -> Self {
        DistEval::Array(e)
    }
}

impl<T: Tile> From<ContractionEval<T>> for DistEval<T> {
    fn from(e: ContractionEval<T>) -> Self {
        DistEval::Contraction(e)
    }
}

impl<T: Tile> std::fmt::Debug for DistEval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            DistEval::Array(_) => "Array",
            DistEval::Contraction(_) => "Contraction",
        };
        f.debug_struct("DistEval")
            .field("kind", &kind)
            .field("trange", &self.trange().to_string())
            .field("status", &self.status())
            .field("pending", &self.pending())
            .finish()
    }
}
