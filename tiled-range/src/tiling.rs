//! One-dimensional tilings.

use crate::{RangeError, Result};

/// A strictly increasing boundary vector `b0 < b1 < … < bT` partitioning
/// `[b0, bT)` into `T` tiles, tile `t = [b_t, b_{t+1})`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TiledRange1 {
    boundaries: Vec<usize>,
}

impl TiledRange1 {
    /// Build a tiling from its boundary points. At least two points are
    /// required and they must be strictly increasing.
    pub fn new(boundaries: Vec<usize>) -> Result<Self> {
        if boundaries.len() < 2 {
            return Err(RangeError::TooFewBoundaries(boundaries.len()));
        }
        for i in 1..boundaries.len() {
            if boundaries[i] <= boundaries[i - 1] {
                return Err(RangeError::NonIncreasingBoundary(i));
            }
        }
        Ok(Self { boundaries })
    }

    /// A uniform blocking of `count` tiles of `block` elements starting at
    /// `start`.
    pub fn with_uniform(start: usize, block: usize, count: usize) -> Result<Self> {
        let boundaries = (0..=count).map(|i| start + i * block).collect();
        Self::new(boundaries)
    }

    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    pub fn tile_count(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Half-open element bounds of tile `t`.
    pub fn tile(&self, t: usize) -> (usize, usize) {
        assert!(t < self.tile_count(), "tile index {t} out of range");
        (self.boundaries[t], self.boundaries[t + 1])
    }

    pub fn tile_extent(&self, t: usize) -> usize {
        let (lo, up) = self.tile(t);
        up - lo
    }

    /// First and one-past-last element of the whole range.
    pub fn elements(&self) -> (usize, usize) {
        (self.boundaries[0], *self.boundaries.last().unwrap())
    }

    pub fn element_count(&self) -> usize {
        let (lo, up) = self.elements();
        up - lo
    }

    /// The unique tile `t` with `e ∈ [b_t, b_{t+1})`, or `None` when `e`
    /// lies outside the range. Binary search over the boundaries.
    pub fn tile_of(&self, e: usize) -> Option<usize> {
        let (lo, up) = self.elements();
        if e < lo || e >= up {
            return None;
        }
        Some(self.boundaries.partition_point(|&b| b <= e) - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_validates() {
        assert!(TiledRange1::new(vec![0]).is_err());
        assert!(TiledRange1::new(vec![0, 0]).is_err());
        assert!(TiledRange1::new(vec![0, 5, 3]).is_err());
        assert!(TiledRange1::new(vec![0, 5, 9]).is_ok());
    }

    #[test]
    fn tile_queries() {
        let r = TiledRange1::new(vec![1, 4, 6, 10]).unwrap();
        assert_eq!(r.tile_count(), 3);
        assert_eq!(r.tile(0), (1, 4));
        assert_eq!(r.tile(2), (6, 10));
        assert_eq!(r.tile_extent(1), 2);
        assert_eq!(r.elements(), (1, 10));
        assert_eq!(r.element_count(), 9);
    }

    #[test]
    fn tile_of_covers_every_element() {
        let r = TiledRange1::new(vec![1, 4, 6, 10]).unwrap();
        for e in 1..10 {
            let t = r.tile_of(e).unwrap();
            let (lo, up) = r.tile(t);
            assert!(e >= lo && e < up, "element {e} mapped to tile {t} = [{lo},{up})");
        }
        assert_eq!(r.tile_of(0), None);
        assert_eq!(r.tile_of(10), None);
    }

    #[test]
    fn uniform_blocking() {
        let r = TiledRange1::with_uniform(0, 512, 16).unwrap();
        assert_eq!(r.tile_count(), 16);
        assert_eq!(r.element_count(), 8192);
        assert_eq!(r.tile(3), (1536, 2048));
        assert!(TiledRange1::with_uniform(0, 0, 4).is_err());
    }
}
