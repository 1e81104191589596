//! Dense rectangular element ranges.

use tiled_perm::Permutation;

use crate::{RangeError, Result};

/// Row-major ordinal weights (last index varies fastest).
pub fn row_major_weights(extents: &[usize]) -> Vec<usize> {
    let rank = extents.len();
    let mut weights = vec![1usize; rank];
    for d in (0..rank.saturating_sub(1)).rev() {
        weights[d] = weights[d + 1] * extents[d + 1];
    }
    weights
}

/// The element box of one tile: half-open bounds `[lobound, upbound)` per
/// dimension.
///
/// A rank-0 `BlockRange` is the empty sentinel used by uninitialized tiles;
/// it has volume zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockRange {
    lobound: Vec<usize>,
    upbound: Vec<usize>,
}

impl Default for BlockRange {
    fn default() -> Self {
        Self::empty()
    }
}

impl BlockRange {
    /// Build a range from per-dimension bounds. `lobound[d] > upbound[d]` is
    /// rejected.
    pub fn new(lobound: Vec<usize>, upbound: Vec<usize>) -> Result<Self> {
        if lobound.len() != upbound.len() {
            return Err(RangeError::RankMismatch {
                left: lobound.len(),
                right: upbound.len(),
            });
        }
        for (d, (&lo, &up)) in lobound.iter().zip(&upbound).enumerate() {
            if lo > up {
                return Err(RangeError::BadBounds { dim: d, lo, up });
            }
        }
        Ok(Self { lobound, upbound })
    }

    /// A range starting at the origin with the given extents.
    pub fn from_extents(extents: &[usize]) -> Self {
        Self {
            lobound: vec![0; extents.len()],
            upbound: extents.to_vec(),
        }
    }

    /// The empty sentinel range (rank 0, volume 0).
    pub fn empty() -> Self {
        Self {
            lobound: Vec::new(),
            upbound: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.lobound.len()
    }

    pub fn lobound(&self) -> &[usize] {
        &self.lobound
    }

    pub fn upbound(&self) -> &[usize] {
        &self.upbound
    }

    pub fn extent(&self, d: usize) -> usize {
        self.upbound[d] - self.lobound[d]
    }

    pub fn extents(&self) -> Vec<usize> {
        self.lobound
            .iter()
            .zip(&self.upbound)
            .map(|(&lo, &up)| up - lo)
            .collect()
    }

    /// Number of elements; zero for the rank-0 sentinel.
    pub fn volume(&self) -> usize {
        if self.rank() == 0 {
            return 0;
        }
        self.extents().iter().product()
    }

    /// Row-major linearization weights for this range's extents.
    pub fn weights(&self) -> Vec<usize> {
        row_major_weights(&self.extents())
    }

    pub fn contains(&self, index: &[usize]) -> bool {
        index.len() == self.rank()
            && index
                .iter()
                .zip(self.lobound.iter().zip(&self.upbound))
                .all(|(&i, (&lo, &up))| i >= lo && i < up)
    }

    /// Linear buffer offset of an absolute element index.
    pub fn offset_of(&self, index: &[usize]) -> usize {
        assert!(self.contains(index), "element index {index:?} outside {self:?}");
        let weights = self.weights();
        index
            .iter()
            .zip(&self.lobound)
            .zip(&weights)
            .map(|((&i, &lo), &w)| (i - lo) * w)
            .sum()
    }

    /// Absolute element index at a linear buffer offset.
    pub fn index_of(&self, mut offset: usize) -> Vec<usize> {
        assert!(offset < self.volume(), "offset {offset} outside {self:?}");
        let weights = self.weights();
        let mut index = Vec::with_capacity(self.rank());
        for (d, &w) in weights.iter().enumerate() {
            index.push(self.lobound[d] + offset / w);
            offset %= w;
        }
        index
    }

    /// Reorder dimensions: bound `d` of the result at position `p[d]`.
    pub fn permuted(&self, perm: &Permutation) -> Result<BlockRange> {
        let lobound = perm.apply(&self.lobound)?;
        let upbound = perm.apply(&self.upbound)?;
        Ok(BlockRange { lobound, upbound })
    }

    /// Shift both bounds by a per-dimension offset; the volume is preserved.
    pub fn shifted(&self, delta: &[isize]) -> Result<BlockRange> {
        if delta.len() != self.rank() {
            return Err(RangeError::RankMismatch {
                left: self.rank(),
                right: delta.len(),
            });
        }
        let mut lobound = Vec::with_capacity(self.rank());
        let mut upbound = Vec::with_capacity(self.rank());
        for (d, &dd) in delta.iter().enumerate() {
            let lo = self.lobound[d] as isize + dd;
            let up = self.upbound[d] as isize + dd;
            if lo < 0 {
                return Err(RangeError::ShiftUnderflow(d));
            }
            lobound.push(lo as usize);
            upbound.push(up as usize);
        }
        Ok(BlockRange { lobound, upbound })
    }

    /// Equal extents (bounds may differ); the alignment test for
    /// element-wise tile operations.
    pub fn congruent(&self, other: &BlockRange) -> bool {
        self.rank() == other.rank()
            && (0..self.rank()).all(|d| self.extent(d) == other.extent(d))
    }
}
