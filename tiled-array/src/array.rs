//! The distributed tiled array.

use std::sync::Arc;

use parking_lot::RwLock;

use tiled_range::{BlockRange, Shape, TiledRange};
use tiled_runtime::{Rank, TaskFuture, World};
use tiled_tile::{Tile, TileError};
use tiled_traits::Scalar;

use crate::pmap::{CyclicMap, ProcessMap};
use crate::store::TileStore;
use crate::{ArrayError, Result};

struct ArrayInner<T: Scalar> {
    world: World,
    trange: TiledRange,
    pmap: Arc<dyn ProcessMap>,
    shape: RwLock<Shape>,
    store: TileStore<T>,
}

/// A tiled array whose tiles are distributed over the ranks of a world.
///
/// Cheap to clone: clones share the tile store and shape. Construction is
/// collective — every rank must create its arrays in the same order.
pub struct DistArray<T: Scalar> {
    inner: Arc<ArrayInner<T>>,
}

impl<T: Scalar> Clone for DistArray<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Scalar> DistArray<T> {
    /// A dense array over `trange` with the default block-cyclic map.
    pub fn new(world: &World, trange: TiledRange) -> Self {
        let pmap: Arc<dyn ProcessMap> = Arc::new(CyclicMap::new(world.size()));
        Self::with_parts(world, trange, Shape::Dense, pmap).expect("dense shape always fits")
    }

    /// An array with an explicit sparsity shape.
    pub fn with_shape(world: &World, trange: TiledRange, shape: Shape) -> Result<Self> {
        let pmap: Arc<dyn ProcessMap> = Arc::new(CyclicMap::new(world.size()));
        Self::with_parts(world, trange, shape, pmap)
    }

    /// Fully explicit constructor.
    pub fn with_parts(
        world: &World,
        trange: TiledRange,
        shape: Shape,
        pmap: Arc<dyn ProcessMap>,
    ) -> Result<Self> {
        shape.validate(trange.tile_volume())?;
        let store = TileStore::new(world, trange.tile_volume(), Arc::clone(&pmap));
        Ok(Self {
            inner: Arc::new(ArrayInner {
                world: world.clone(),
                trange,
                pmap,
                shape: RwLock::new(shape),
                store,
            }),
        })
    }

    pub fn world(&self) -> &World {
        &self.inner.world
    }

    pub fn trange(&self) -> &TiledRange {
        &self.inner.trange
    }

    pub fn shape(&self) -> Shape {
        self.inner.shape.read().clone()
    }

    /// Replace the published shape (evaluator use; shapes are immutable
    /// between assignments).
    pub fn set_shape(&self, shape: Shape) -> Result<()> {
        shape.validate(self.inner.trange.tile_volume())?;
        *self.inner.shape.write() = shape;
        Ok(())
    }

    pub fn pmap(&self) -> &Arc<dyn ProcessMap> {
        &self.inner.pmap
    }

    pub fn store(&self) -> &TileStore<T> {
        &self.inner.store
    }

    pub fn owner(&self, ordinal: usize) -> Rank {
        self.inner.pmap.owner(ordinal)
    }

    pub fn is_local(&self, ordinal: usize) -> bool {
        self.owner(ordinal) == self.inner.world.rank()
    }

    /// Ordinals this rank owns, zero tiles included.
    pub fn local_ordinals(&self) -> Vec<usize> {
        self.inner
            .pmap
            .local_ordinals(self.inner.world.rank(), self.inner.trange.tile_volume())
    }

    fn check_ordinal(&self, ordinal: usize) -> Result<BlockRange> {
        Ok(self.inner.trange.tile_range(ordinal)?)
    }

    /// Store a tile; storing into a structurally zero ordinal or with
    /// mismatched extents is an error.
    pub fn insert_tile(&self, ordinal: usize, tile: Tile<T>) -> Result<()> {
        let range = self.check_ordinal(ordinal)?;
        if self.shape().is_zero(ordinal) {
            return Err(ArrayError::StructuralZero(ordinal));
        }
        if !tile.range().congruent(&range) {
            return Err(ArrayError::Tile(TileError::ExtentMismatch {
                left: tile.range().extents(),
                right: range.extents(),
            }));
        }
        self.inner.store.insert(ordinal, tile);
        Ok(())
    }

    /// Insert a constant-filled tile.
    pub fn insert_fill(&self, ordinal: usize, value: T) -> Result<()> {
        let range = self.check_ordinal(ordinal)?;
        self.insert_tile(ordinal, Tile::new(range, value))
    }

    /// Insert a tile from a row-major element iterator.
    pub fn insert_from_iter<I: IntoIterator<Item = T>>(
        &self,
        ordinal: usize,
        elements: I,
    ) -> Result<()> {
        let range = self.check_ordinal(ordinal)?;
        let data: Vec<T> = elements.into_iter().collect();
        let tile = Tile::from_vec(range, data).map_err(ArrayError::Tile)?;
        self.insert_tile(ordinal, tile)
    }

    /// A future for the tile at `ordinal`; a structurally zero ordinal
    /// yields an absent (empty) tile immediately.
    pub fn find(&self, ordinal: usize) -> Result<TaskFuture<Tile<T>>> {
        self.check_ordinal(ordinal)?;
        if self.shape().is_zero(ordinal) {
            return Ok(TaskFuture::ready(Tile::default()));
        }
        Ok(self.inner.store.find(ordinal))
    }

    pub fn probe(&self, ordinal: usize) -> Result<TaskFuture<bool>> {
        self.check_ordinal(ordinal)?;
        Ok(self.inner.store.probe(ordinal))
    }

    /// Remove the tile at `ordinal`, delegating to the keyed store erase.
    pub fn erase(&self, ordinal: usize) -> Result<()> {
        self.check_ordinal(ordinal)?;
        self.inner.store.erase(ordinal);
        Ok(())
    }

    /// Drop every locally held tile.
    pub fn clear(&self) {
        self.inner.store.clear();
    }

    /// Fill every locally owned, structurally non-zero tile with a
    /// constant.
    pub fn set_all_local(&self, value: T) {
        let shape = self.shape();
        for ordinal in self.local_ordinals() {
            if shape.is_zero(ordinal) {
                continue;
            }
            self.insert_fill(ordinal, value)
                .expect("owned non-zero ordinal");
        }
    }

    /// Fill every locally owned, structurally non-zero tile from a
    /// function of the absolute element index.
    pub fn fill_local_with<F: Fn(&[usize]) -> T>(&self, f: F) {
        let shape = self.shape();
        for ordinal in self.local_ordinals() {
            if shape.is_zero(ordinal) {
                continue;
            }
            let range = self
                .inner
                .trange
                .tile_range(ordinal)
                .expect("owned ordinal in range");
            let tile = Tile::from_fn(range, &f);
            self.inner.store.insert(ordinal, tile);
        }
    }

    /// Total number of tiles; with `local`, the number of locally stored
    /// ones.
    pub fn tile_count(&self, local: bool) -> usize {
        if local {
            self.inner.store.local_len()
        } else {
            self.inner.trange.tile_volume()
        }
    }
}

impl<T: Scalar> DistArray<T> {
    /// Check a tile ordinal is inside the grid without touching data.
    pub fn includes(&self, ordinal: usize) -> bool {
        ordinal < self.inner.trange.tile_volume()
    }
}
