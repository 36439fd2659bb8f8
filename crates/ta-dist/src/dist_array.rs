use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use ta_runtime::{Future, ObjectId, ReleaseGuard, World};
use ta_tensor::{Range, Tile};
use tracing::trace;

use crate::error::{DistError, Result};
use crate::pmap::Pmap;
use crate::shape::Shape;
use crate::tiled_range::TiledRange;

/// The registered, process-local part of a `DistArray`.
pub(crate) struct ArrayImpl<T> {
    trange: Arc<TiledRange>,
    shape: Arc<Shape>,
    pmap: Arc<Pmap>,
    tiles: RefCell<HashMap<usize, Future<T>>>,
}

impl<T: Tile> ArrayImpl<T> {
    fn local_future(&self, index: usize) -> Future<T> {
        self.tiles
            .borrow_mut()
            .entry(index)
            .or_insert_with(Future::new)
            .clone()
    }

    fn find_local(&self, index: usize) -> Result<Future<T>> {
        if !self.pmap.is_local(index) {
            return Err(DistError::NonLocalTile {
                index,
                rank: self.pmap.rank(),
            });
        }
        if self.shape.is_zero(index) {
            return Err(DistError::ZeroTile(index));
        }
        Ok(self.local_future(index))
    }

    fn set_local(&self, index: usize, tile: T) -> Result<()> {
        let future = self.find_local(index)?;
        if future.probe() {
            return Err(DistError::TileAlreadySet(index));
        }
        future.set(tile);
        Ok(())
    }
}

/// A tiled tensor whose tiles are stored on their owning processes.
///
/// Every process constructs the array in the same order; clones share the
/// local part. When the last handle is dropped the local part is released at
/// the next fence.
pub struct DistArray<T: Tile> {
    world: World,
    id: ObjectId,
    inner: Rc<ArrayImpl<T>>,
    _guard: Rc<ReleaseGuard>,
}

impl<T: Tile> Clone for DistArray<T> {
    fn clone(&self) -> Self {
        DistArray {
            world: self.world.clone(),
            id: self.id,
            inner: Rc::clone(&self.inner),
            _guard: Rc::clone(&self._guard),
        }
    }
}

impl<T: Tile> DistArray<T> {
    pub fn new(world: &World, trange: TiledRange, shape: Shape, pmap: Pmap) -> Result<Self> {
        shape.validate(trange.tiles_range())?;
        if pmap.size() != trange.volume() {
            return Err(DistError::PmapSizeMismatch {
                expected: trange.volume(),
                got: pmap.size(),
            });
        }
        let inner = Rc::new(ArrayImpl {
            trange: Arc::new(trange),
            shape: Arc::new(shape),
            pmap: Arc::new(pmap),
            tiles: RefCell::new(HashMap::new()),
        });
        let id = world.register_object(Rc::clone(&inner));
        trace!(rank = world.rank(), id, "created array");
        Ok(DistArray {
            world: world.clone(),
            id,
            inner,
            _guard: Rc::new(ReleaseGuard::new(world.clone(), id)),
        })
    }

    /// Dense array with a blocked distribution.
    pub fn dense(world: &World, trange: TiledRange) -> Result<Self> {
        let shape = Shape::dense(trange.tiles_range().clone());
        let pmap = Pmap::blocked(world.rank(), world.size(), trange.volume())?;
        Self::new(world, trange, shape, pmap)
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn trange(&self) -> &TiledRange {
        &self.inner.trange
    }

    pub fn shape(&self) -> &Shape {
        &self.inner.shape
    }

    pub fn pmap(&self) -> &Pmap {
        &self.inner.pmap
    }

    /// Number of tiles.
    pub fn size(&self) -> usize {
        self.inner.trange.volume()
    }

    pub fn is_zero(&self, index: usize) -> bool {
        self.inner.shape.is_zero(index)
    }

    pub fn is_local(&self, index: usize) -> bool {
        self.inner.pmap.is_local(index)
    }

    /// Element range of tile `index`.
    pub fn tile_range(&self, index: usize) -> Range {
        self.inner.trange.make_tile_range(index)
    }

    /// Locally owned, nonzero tiles in increasing order.
    pub fn local_tiles(&self) -> Vec<usize> {
        self.inner
            .pmap
            .local_tiles()
            .copied()
            .filter(|&i| !self.is_zero(i))
            .collect()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.size() {
            return Err(DistError::TileOutOfRange {
                index,
                size: self.size(),
            });
        }
        if self.is_zero(index) {
            return Err(DistError::ZeroTile(index));
        }
        Ok(())
    }

    /// Store tile `index`; a tile owned elsewhere is sent to its owner.
    pub fn set(&self, index: usize, tile: T) -> Result<()> {
        self.check_index(index)?;
        let expected = self.tile_range(index);
        if tile.range() != &expected {
            return Err(DistError::TileRangeMismatch {
                index,
                expected: expected.to_string(),
                got: tile.range().to_string(),
            });
        }
        if self.is_local(index) {
            return self.inner.set_local(index, tile);
        }
        let owner = self.inner.pmap.owner(index);
        self.world
            .send_to_object::<ArrayImpl<T>, DistError, _>(owner, self.id, move |_, array| {
                array.set_local(index, tile)
            })?;
        Ok(())
    }

    /// Future for tile `index`: the stored future if local, otherwise a
    /// one-sided fetch from the owner.
    pub fn find(&self, index: usize) -> Result<Future<T>> {
        self.check_index(index)?;
        if self.is_local(index) {
            return Ok(self.inner.local_future(index));
        }
        let owner = self.inner.pmap.owner(index);
        let future = self
            .world
            .request::<ArrayImpl<T>, T, DistError, _>(owner, self.id, move |_, array| {
                array.find_local(index)
            })?;
        Ok(future)
    }

    /// Fill every local nonzero tile with `f(index, tile_range)`.
    pub fn init_tiles(&self, mut f: impl FnMut(usize, Range) -> T) -> Result<()> {
        for index in self.local_tiles() {
            let tile = f(index, self.tile_range(index));
            self.set(index, tile)?;
        }
        Ok(())
    }
}

impl<T: Tile> fmt::Debug for DistArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistArray")
            .field("id", &self.id)
            .field("trange", &self.inner.trange.to_string())
            .field("rank", &self.world.rank())
            .finish()
    }
}
