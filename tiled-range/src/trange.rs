//! Multi-dimensional tiled ranges.

use tiled_perm::Permutation;

use crate::block::{row_major_weights, BlockRange};
use crate::tiling::TiledRange1;
use crate::{RangeError, Result};

/// The Cartesian product of `D ≥ 1` one-dimensional tilings.
///
/// The outer level is the tile grid (one tile per `D`-tuple of
/// per-dimension tile indices, linearized row-major), the inner level the
/// element coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiledRange {
    dims: Vec<TiledRange1>,
}

impl TiledRange {
    /// Build from per-dimension tilings; the zero-rank product is rejected.
    pub fn new(dims: Vec<TiledRange1>) -> Result<Self> {
        if dims.is_empty() {
            return Err(RangeError::ZeroRank);
        }
        Ok(Self { dims })
    }

    /// A square range: the same tiling in every one of `rank` dimensions.
    pub fn cubic(dim: &TiledRange1, rank: usize) -> Result<Self> {
        Self::new(vec![dim.clone(); rank])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dim(&self, d: usize) -> &TiledRange1 {
        &self.dims[d]
    }

    pub fn dims(&self) -> &[TiledRange1] {
        &self.dims
    }

    pub fn tile_counts(&self) -> Vec<usize> {
        self.dims.iter().map(|d| d.tile_count()).collect()
    }

    /// Total number of tiles in the grid.
    pub fn tile_volume(&self) -> usize {
        self.dims.iter().map(|d| d.tile_count()).product()
    }

    /// The outer (tile-grid) range.
    pub fn tiles_range(&self) -> BlockRange {
        BlockRange::from_extents(&self.tile_counts())
    }

    /// The full element box covered by the range.
    pub fn elements_range(&self) -> BlockRange {
        let lobound = self.dims.iter().map(|d| d.elements().0).collect();
        let upbound = self.dims.iter().map(|d| d.elements().1).collect();
        BlockRange::new(lobound, upbound).expect("tiling bounds are ordered")
    }

    pub fn element_volume(&self) -> usize {
        self.dims.iter().map(|d| d.element_count()).product()
    }

    /// Tile-grid multi-index of a tile ordinal.
    pub fn tile_index(&self, ordinal: usize) -> Result<Vec<usize>> {
        let count = self.tile_volume();
        if ordinal >= count {
            return Err(RangeError::OrdinalOutOfRange { ordinal, count });
        }
        let weights = row_major_weights(&self.tile_counts());
        let mut rest = ordinal;
        Ok(weights
            .iter()
            .map(|&w| {
                let i = rest / w;
                rest %= w;
                i
            })
            .collect())
    }

    /// Tile ordinal of a tile-grid multi-index.
    pub fn tile_ordinal(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(RangeError::RankMismatch {
                left: self.rank(),
                right: index.len(),
            });
        }
        let counts = self.tile_counts();
        for (d, (&i, &c)) in index.iter().zip(&counts).enumerate() {
            if i >= c {
                return Err(RangeError::BadBounds { dim: d, lo: i, up: c });
            }
        }
        let weights = row_major_weights(&counts);
        Ok(index.iter().zip(&weights).map(|(&i, &w)| i * w).sum())
    }

    /// The element box of a tile.
    pub fn tile_range(&self, ordinal: usize) -> Result<BlockRange> {
        let index = self.tile_index(ordinal)?;
        let mut lobound = Vec::with_capacity(self.rank());
        let mut upbound = Vec::with_capacity(self.rank());
        for (d, &t) in index.iter().enumerate() {
            let (lo, up) = self.dims[d].tile(t);
            lobound.push(lo);
            upbound.push(up);
        }
        Ok(BlockRange::new(lobound, upbound).expect("tile bounds are ordered"))
    }

    /// The tile ordinal containing an element coordinate, or `None` when
    /// the coordinate lies outside the range.
    pub fn tile_of_element(&self, element: &[usize]) -> Option<usize> {
        if element.len() != self.rank() {
            return None;
        }
        let mut index = Vec::with_capacity(self.rank());
        for (d, &e) in element.iter().enumerate() {
            index.push(self.dims[d].tile_of(e)?);
        }
        self.tile_ordinal(&index).ok()
    }

    /// Reorder dimensions: dimension `d` of the result at position `p[d]`.
    pub fn permuted(&self, perm: &Permutation) -> Result<TiledRange> {
        let dims = perm.apply(&self.dims)?;
        Ok(TiledRange { dims })
    }
}
