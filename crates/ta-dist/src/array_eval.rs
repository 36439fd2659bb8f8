use std::rc::Rc;

use ta_runtime::{Future, ObjectId, ReleaseGuard};
use ta_tensor::{Permutation, Tile, TensorError};
use tracing::trace;

use crate::dist_array::DistArray;
use crate::dist_eval::EvalCore;
use crate::error::{DistError, Result};
use crate::pmap::Pmap;

/// The registered part of an [`ArrayEval`], reachable by other processes.
pub(crate) struct ArrayState<T: Tile> {
    core: EvalCore<T>,
    array: DistArray<T>,
    perm: Permutation,
}

impl<T: Tile> ArrayState<T> {
    /// Array tile backing evaluator tile `index`.
    fn source_index(&self, index: usize) -> usize {
        if self.perm.is_identity() {
            return index;
        }
        let coord = self.core.trange().tiles_range().coord(index);
        let source = self.perm.inverse().apply(&coord);
        self.array.trange().tiles_range().ordinal(&source)
    }

    fn get(&self, index: usize) -> Result<Future<T>> {
        self.core.check_get(index)?;
        self.core.memoize(index, || {
            let source = self.array.find(self.source_index(index))?;
            let tile = if self.perm.is_identity() {
                source
            } else {
                let perm = self.perm.clone();
                let input = source.clone();
                self.core.world().add_task(&[&source], move |_| {
                    input.with(|tile| tile.permute(&perm)).unwrap_or_else(|| {
                        Err(TensorError::Other("source tile missing".to_string()))
                    })
                })
            };
            self.core.track(&tile);
            Ok(tile)
        })
    }
}

/// Leaf evaluator over a stored array.
///
/// The evaluator may be distributed differently from the array it reads
/// (e.g. over a contraction's phase pmap); tiles owned elsewhere are fetched
/// from the array's owner. With a permutation `p`, tile `i` is the array tile
/// at the inverse-permuted coordinate, permuted by `p`.
///
/// Every process must construct its evaluators in the same order.
pub struct ArrayEval<T: Tile> {
    state: Rc<ArrayState<T>>,
    id: ObjectId,
    _guard: ReleaseGuard,
}

impl<T: Tile> ArrayEval<T> {
    pub fn new(array: DistArray<T>, pmap: Pmap, perm: Permutation) -> Result<Self> {
        let trange = array.trange().permute(&perm)?;
        let shape = array.shape().permute(&perm)?;
        let world = array.world().clone();
        let core = EvalCore::new(world.clone(), trange, shape, pmap)?;
        let state = Rc::new(ArrayState { core, array, perm });
        let id = world.register_object(Rc::clone(&state));
        Ok(ArrayEval {
            state,
            id,
            _guard: ReleaseGuard::new(world, id),
        })
    }

    /// Evaluator with the array's own layout.
    pub fn identity(array: DistArray<T>) -> Result<Self> {
        let pmap = array.pmap().clone();
        let perm = Permutation::identity(array.trange().rank());
        Self::new(array, pmap, perm)
    }

    pub(crate) fn core(&self) -> &EvalCore<T> {
        &self.state.core
    }

    pub fn array(&self) -> &DistArray<T> {
        &self.state.array
    }

    pub fn perm(&self) -> &Permutation {
        &self.state.perm
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Future for local, nonzero tile `index`; the stored tile is requested
    /// on first use.
    pub fn get(&self, index: usize) -> Result<Future<T>> {
        self.state.get(index)
    }

    /// Future for nonzero tile `index` wherever it lives. A nonlocal tile is
    /// requested from the evaluator that owns it, which serves it through its
    /// own `get`.
    pub fn fetch(&self, index: usize) -> Result<Future<T>> {
        let Some(owner) = self.state.core.remote_owner(index)? else {
            return self.get(index);
        };
        let future = self
            .state
            .core
            .world()
            .request::<ArrayState<T>, T, DistError, _>(owner, self.id, move |_, state| {
                state.get(index)
            })?;
        Ok(future)
    }

    /// Local tiles requested so far, in increasing order.
    pub fn requested_tiles(&self) -> Vec<usize> {
        self.state.core.requested()
    }

    /// Request every local nonzero tile.
    pub fn eval(&self) -> Result<()> {
        let core = &self.state.core;
        core.begin_eval()?;
        let local = core.local_tiles();
        trace!(
            rank = core.world().rank(),
            array = self.state.array.id(),
            tiles = local.len(),
            "array eval"
        );
        for index in local {
            self.get(index)?;
        }
        Ok(())
    }
}
