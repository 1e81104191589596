//! Sparsity shapes over tile grids.

use tiled_perm::Permutation;

use crate::block::row_major_weights;
use crate::{RangeError, Result};

/// A fixed-capacity bitset over tile ordinals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSet {
    len: usize,
    words: Vec<u64>,
}

impl TileSet {
    /// An all-zero set over `len` ordinals.
    pub fn new(len: usize) -> Self {
        Self {
            len,
            words: vec![0; len.div_ceil(64)],
        }
    }

    /// An all-one set over `len` ordinals.
    pub fn full(len: usize) -> Self {
        let mut set = Self::new(len);
        for i in 0..len {
            set.insert(i);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, i: usize) {
        assert!(i < self.len, "ordinal {i} out of range {}", self.len);
        self.words[i / 64] |= 1u64 << (i % 64);
    }

    pub fn remove(&mut self, i: usize) {
        assert!(i < self.len, "ordinal {i} out of range {}", self.len);
        self.words[i / 64] &= !(1u64 << (i % 64));
    }

    pub fn contains(&self, i: usize) -> bool {
        assert!(i < self.len, "ordinal {i} out of range {}", self.len);
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Bitwise OR with a set of the same length.
    pub fn union(&self, other: &TileSet) -> TileSet {
        assert_eq!(self.len, other.len, "tile set length mismatch");
        TileSet {
            len: self.len,
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a | b)
                .collect(),
        }
    }

    /// Bitwise AND with a set of the same length.
    pub fn intersect(&self, other: &TileSet) -> TileSet {
        assert_eq!(self.len, other.len, "tile set length mismatch");
        TileSet {
            len: self.len,
            words: self
                .words
                .iter()
                .zip(&other.words)
                .map(|(a, b)| a & b)
                .collect(),
        }
    }

    /// Ordinals of set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.contains(i))
    }
}

impl FromIterator<usize> for TileSet {
    /// Collect ordinals into a set sized to the largest + 1; mostly a test
    /// convenience — prefer [`Shape::from_nonzeros`] for a known grid size.
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let ordinals: Vec<usize> = iter.into_iter().collect();
        let len = ordinals.iter().max().map_or(0, |&m| m + 1);
        let mut set = TileSet::new(len);
        for i in ordinals {
            set.insert(i);
        }
        set
    }
}

/// Classifies every tile of a grid as structurally zero or non-zero.
///
/// `Dense` declares every tile non-zero; `Sparse` carries an explicit
/// bitset, a zero bit meaning the tile is structurally zero. Shapes are
/// immutable once published by an expression node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Dense,
    Sparse(TileSet),
}

impl Shape {
    /// A sparse shape from a list of non-zero tile ordinals over an
    /// `ntiles` grid.
    pub fn from_nonzeros<I: IntoIterator<Item = usize>>(ntiles: usize, ordinals: I) -> Self {
        let mut set = TileSet::new(ntiles);
        for i in ordinals {
            set.insert(i);
        }
        Shape::Sparse(set)
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, Shape::Dense)
    }

    /// Total `is_zero` query; `Dense` shapes have no zero tiles.
    pub fn is_zero(&self, ordinal: usize) -> bool {
        match self {
            Shape::Dense => false,
            Shape::Sparse(set) => !set.contains(ordinal),
        }
    }

    pub fn nonzero_count(&self, ntiles: usize) -> usize {
        match self {
            Shape::Dense => ntiles,
            Shape::Sparse(set) => set.count_ones(),
        }
    }

    /// Check the shape covers exactly `ntiles` ordinals.
    pub fn validate(&self, ntiles: usize) -> Result<()> {
        match self {
            Shape::Dense => Ok(()),
            Shape::Sparse(set) if set.len() == ntiles => Ok(()),
            Shape::Sparse(set) => Err(RangeError::ShapeSizeMismatch {
                shape: set.len(),
                range: ntiles,
            }),
        }
    }

    /// Add/Subt combiner: bitwise OR; `Dense` absorbs.
    pub fn union(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Shape::Dense, _) | (_, Shape::Dense) => Shape::Dense,
            (Shape::Sparse(a), Shape::Sparse(b)) => Shape::Sparse(a.union(b)),
        }
    }

    /// Hadamard combiner: bitwise AND; `Dense` is the identity.
    pub fn intersect(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Shape::Dense, s) | (s, Shape::Dense) => s.clone(),
            (Shape::Sparse(a), Shape::Sparse(b)) => Shape::Sparse(a.intersect(b)),
        }
    }

    /// Relocate bits through a permutation of the tile grid.
    ///
    /// `tile_counts` are the per-dimension tile counts of the *unpermuted*
    /// grid.
    pub fn permuted(&self, perm: &Permutation, tile_counts: &[usize]) -> Result<Shape> {
        let set = match self {
            Shape::Dense => return Ok(Shape::Dense),
            Shape::Sparse(set) => set,
        };
        let src_weights = row_major_weights(tile_counts);
        let dst_counts = perm.apply(tile_counts)?;
        let dst_weights = row_major_weights(&dst_counts);

        let mut out = TileSet::new(set.len());
        for ordinal in set.iter_ones() {
            let mut rest = ordinal;
            let index: Vec<usize> = src_weights
                .iter()
                .map(|&w| {
                    let i = rest / w;
                    rest %= w;
                    i
                })
                .collect();
            let pindex = perm.apply(&index)?;
            let dst: usize = pindex.iter().zip(&dst_weights).map(|(&i, &w)| i * w).sum();
            out.insert(dst);
        }
        Ok(Shape::Sparse(out))
    }

    /// Contraction combiner: the boolean matrix product over fused tile
    /// index groups.
    ///
    /// `lhs` is read as an `m × k` grid, `rhs` as `k × n` (row-major fused
    /// ordinals); the output bit is `out[i,j] = OR_k (lhs[i,k] AND
    /// rhs[k,j])`. `Dense` operands behave as all-ones, and a fully dense
    /// product stays `Dense`.
    pub fn contract(lhs: &Shape, rhs: &Shape, m: usize, k: usize, n: usize) -> Shape {
        if lhs.is_dense() && rhs.is_dense() {
            return Shape::Dense;
        }
        let lhs_bits;
        let lhs_set = match lhs {
            Shape::Dense => {
                lhs_bits = TileSet::full(m * k);
                &lhs_bits
            }
            Shape::Sparse(set) => set,
        };
        let rhs_bits;
        let rhs_set = match rhs {
            Shape::Dense => {
                rhs_bits = TileSet::full(k * n);
                &rhs_bits
            }
            Shape::Sparse(set) => set,
        };
        assert_eq!(lhs_set.len(), m * k, "lhs shape does not cover an {m}x{k} grid");
        assert_eq!(rhs_set.len(), k * n, "rhs shape does not cover a {k}x{n} grid");

        let mut out = TileSet::new(m * n);
        for i in 0..m {
            for kk in 0..k {
                if !lhs_set.contains(i * k + kk) {
                    continue;
                }
                for j in 0..n {
                    if rhs_set.contains(kk * n + j) {
                        out.insert(i * n + j);
                    }
                }
            }
        }
        Shape::Sparse(out)
    }
}
