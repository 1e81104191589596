//! GEMM-style tile contraction.
//!
//! A contraction folds each operand's non-contracted index group into one
//! row dimension and its contracted group into one column dimension, then
//! runs a dense matrix multiply. [`GemmHelper`] carries the partition
//! (ranks plus transposition flags) and derives result ranges and the
//! folded `(m, n, k)` sizes; [`gemm_kernel`] is the narrow dense-GEMM
//! interface the tile suite consumes — optimized BLAS backends plug in
//! behind the same signature.

use tiled_range::BlockRange;
use tiled_traits::Scalar;

use crate::tile::Tile;
use crate::{Result, TileError};

/// Operand transposition flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trans {
    /// Contracted (inner) index group stored last.
    NoTrans,
    /// Contracted (inner) index group stored first.
    Trans,
}

/// The index-group partition of a pairwise tile contraction.
#[derive(Debug, Clone)]
pub struct GemmHelper {
    trans_left: Trans,
    trans_right: Trans,
    result_rank: usize,
    left_rank: usize,
    right_rank: usize,
}

impl GemmHelper {
    /// Build a helper; the ranks must admit a partition into
    /// `num_contract` shared indices and `result_rank` free ones.
    pub fn new(
        trans_left: Trans,
        trans_right: Trans,
        result_rank: usize,
        left_rank: usize,
        right_rank: usize,
    ) -> Result<Self> {
        let total = left_rank + right_rank;
        let bad = result_rank == 0
            || result_rank > total
            || (total - result_rank) % 2 != 0
            || (total - result_rank) / 2 > left_rank.min(right_rank);
        if bad {
            return Err(TileError::ContractionRanks {
                result: result_rank,
                left: left_rank,
                right: right_rank,
            });
        }
        Ok(Self {
            trans_left,
            trans_right,
            result_rank,
            left_rank,
            right_rank,
        })
    }

    /// Number of contracted index pairs.
    pub fn num_contract(&self) -> usize {
        (self.left_rank + self.right_rank - self.result_rank) / 2
    }

    pub fn result_rank(&self) -> usize {
        self.result_rank
    }

    pub fn left_rank(&self) -> usize {
        self.left_rank
    }

    pub fn right_rank(&self) -> usize {
        self.right_rank
    }

    pub fn trans_left(&self) -> Trans {
        self.trans_left
    }

    pub fn trans_right(&self) -> Trans {
        self.trans_right
    }

    /// Dimension positions `(outer, inner)` of the left operand.
    fn left_groups(&self) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let k = self.num_contract();
        let outer = self.left_rank - k;
        match self.trans_left {
            Trans::NoTrans => (0..outer, outer..self.left_rank),
            Trans::Trans => (k..self.left_rank, 0..k),
        }
    }

    /// Dimension positions `(outer, inner)` of the right operand.
    fn right_groups(&self) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
        let k = self.num_contract();
        let outer = self.right_rank - k;
        match self.trans_right {
            Trans::NoTrans => (k..self.right_rank, 0..k),
            Trans::Trans => (0..outer, outer..self.right_rank),
        }
    }

    /// Check rank and contracted-extent agreement of the operand ranges.
    pub fn check_compatible(&self, left: &BlockRange, right: &BlockRange) -> Result<()> {
        if left.rank() != self.left_rank || right.rank() != self.right_rank {
            return Err(TileError::ContractionRanks {
                result: self.result_rank,
                left: left.rank(),
                right: right.rank(),
            });
        }
        let (_, l_inner) = self.left_groups();
        let (_, r_inner) = self.right_groups();
        let l_ext: Vec<usize> = l_inner.map(|d| left.extent(d)).collect();
        let r_ext: Vec<usize> = r_inner.map(|d| right.extent(d)).collect();
        if l_ext != r_ext {
            return Err(TileError::ExtentMismatch {
                left: l_ext,
                right: r_ext,
            });
        }
        Ok(())
    }

    /// The element range of the contraction result: left outer bounds
    /// followed by right outer bounds.
    pub fn result_range(&self, left: &BlockRange, right: &BlockRange) -> Result<BlockRange> {
        let (l_outer, _) = self.left_groups();
        let (r_outer, _) = self.right_groups();
        let mut lobound = Vec::with_capacity(self.result_rank);
        let mut upbound = Vec::with_capacity(self.result_rank);
        for d in l_outer {
            lobound.push(left.lobound()[d]);
            upbound.push(left.upbound()[d]);
        }
        for d in r_outer {
            lobound.push(right.lobound()[d]);
            upbound.push(right.upbound()[d]);
        }
        Ok(BlockRange::new(lobound, upbound)?)
    }

    /// Folded `(m, n, k)` sizes of the dense multiply.
    pub fn fold(&self, left: &BlockRange, right: &BlockRange) -> (usize, usize, usize) {
        let (l_outer, l_inner) = self.left_groups();
        let (r_outer, _) = self.right_groups();
        let m = l_outer.map(|d| left.extent(d)).product();
        let k = l_inner.map(|d| left.extent(d)).product();
        let n = r_outer.map(|d| right.extent(d)).product();
        (m, n, k)
    }
}

/// Dense GEMM on contiguous row-major buffers:
/// `C = alpha * op(A) * op(B) + beta * C`.
///
/// `op(A)` is `m × k` (`lda ≥ k` untransposed, `lda ≥ m` transposed),
/// `op(B)` is `k × n`, `C` is `m × n` with `ldc ≥ n`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_kernel<T: Scalar>(
    trans_a: Trans,
    trans_b: Trans,
    m: usize,
    n: usize,
    k: usize,
    alpha: T,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    beta: T,
    c: &mut [T],
    ldc: usize,
) {
    let a_at = |i: usize, l: usize| match trans_a {
        Trans::NoTrans => a[i * lda + l],
        Trans::Trans => a[l * lda + i],
    };
    let b_at = |l: usize, j: usize| match trans_b {
        Trans::NoTrans => b[l * ldb + j],
        Trans::Trans => b[j * ldb + l],
    };

    let beta_zero = beta == T::zero();
    let alpha_one = alpha == T::one();

    for i in 0..m {
        for j in 0..n {
            let mut acc = T::zero();
            for l in 0..k {
                acc = acc + a_at(i, l) * b_at(l, j);
            }
            let dst = &mut c[i * ldc + j];
            *dst = match (alpha_one, beta_zero) {
                (true, true) => acc,
                (false, true) => alpha * acc,
                (true, false) => acc + beta * *dst,
                (false, false) => alpha * acc + beta * *dst,
            };
        }
    }
}

impl<T: Scalar> Tile<T> {
    /// `alpha * contract(self, rhs)` per `helper`; an empty operand yields
    /// an empty result.
    pub fn gemm(&self, rhs: &Tile<T>, alpha: T, helper: &GemmHelper) -> Result<Tile<T>> {
        if self.is_empty() || rhs.is_empty() {
            return Ok(Tile::default());
        }
        helper.check_compatible(self.range(), rhs.range())?;
        let range = helper.result_range(self.range(), rhs.range())?;
        let mut out = Tile::zero(range);
        gemm_into(&mut out, self, rhs, alpha, T::zero(), helper);
        Ok(out)
    }

    /// `self ← self + alpha * contract(left, right)`; empty inputs
    /// contribute nothing, an empty accumulator is zero-initialized.
    pub fn gemm_to(
        &mut self,
        left: &Tile<T>,
        right: &Tile<T>,
        alpha: T,
        helper: &GemmHelper,
    ) -> Result<()> {
        if left.is_empty() || right.is_empty() {
            return Ok(());
        }
        helper.check_compatible(left.range(), right.range())?;
        let range = helper.result_range(left.range(), right.range())?;
        if self.is_empty() {
            *self = Tile::zero(range);
        } else if !self.range().congruent(&range) {
            return Err(TileError::ExtentMismatch {
                left: self.range().extents(),
                right: range.extents(),
            });
        }
        gemm_into(self, left, right, alpha, T::one(), helper);
        Ok(())
    }
}

fn gemm_into<T: Scalar>(
    out: &mut Tile<T>,
    left: &Tile<T>,
    right: &Tile<T>,
    alpha: T,
    beta: T,
    helper: &GemmHelper,
) {
    let (m, n, k) = helper.fold(left.range(), right.range());
    let lda = match helper.trans_left() {
        Trans::NoTrans => k,
        Trans::Trans => m,
    };
    let ldb = match helper.trans_right() {
        Trans::NoTrans => n,
        Trans::Trans => k,
    };
    // k is at least 1: an outer product folds to a single contracted column.
    let (trans_a, trans_b) = (helper.trans_left(), helper.trans_right());
    let left_data = left.data().to_vec();
    let right_data = right.data().to_vec();
    gemm_kernel(
        trans_a,
        trans_b,
        m,
        n,
        k.max(1),
        alpha,
        &left_data,
        lda.max(1),
        &right_data,
        ldb.max(1),
        beta,
        out.data_mut(),
        n.max(1),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiled_range::BlockRange;

    fn tile(extents: &[usize], f: impl FnMut(&[usize]) -> f64) -> Tile<f64> {
        Tile::from_fn(BlockRange::from_extents(extents), f)
    }

    fn matmul_helper() -> GemmHelper {
        GemmHelper::new(Trans::NoTrans, Trans::NoTrans, 2, 2, 2).unwrap()
    }

    #[test]
    fn matmul_2x2() {
        let a = tile(&[2, 2], |i| [[1.0, 2.0], [3.0, 4.0]][i[0]][i[1]]);
        let b = tile(&[2, 2], |i| [[5.0, 6.0], [7.0, 8.0]][i[0]][i[1]]);
        let c = a.gemm(&b, 1.0, &matmul_helper()).unwrap();
        assert_eq!(c.get(&[0, 0]), 19.0);
        assert_eq!(c.get(&[0, 1]), 22.0);
        assert_eq!(c.get(&[1, 0]), 43.0);
        assert_eq!(c.get(&[1, 1]), 50.0);
    }

    #[test]
    fn matmul_rect_with_alpha() {
        let a = tile(&[2, 3], |i| (i[0] * 3 + i[1] + 1) as f64);
        let b = tile(&[3, 4], |i| (i[0] * 4 + i[1] + 1) as f64);
        let c = a.gemm(&b, 2.0, &matmul_helper()).unwrap();
        assert_eq!(c.range().extents(), vec![2, 4]);
        assert_eq!(c.get(&[0, 0]), 76.0); // 2 * 38
        assert_eq!(c.get(&[1, 3]), 256.0); // 2 * 128
    }

    #[test]
    fn gemm_to_accumulates() {
        let a = tile(&[2, 2], |i| if i[0] == i[1] { 1.0 } else { 0.0 });
        let b = tile(&[2, 2], |i| [[1.0, 2.0], [3.0, 4.0]][i[0]][i[1]]);
        let mut acc = Tile::default();
        let h = matmul_helper();
        acc.gemm_to(&a, &b, 1.0, &h).unwrap();
        acc.gemm_to(&a, &b, 2.0, &h).unwrap();
        // I*B + 2*I*B = 3*B
        assert_eq!(acc.get(&[0, 1]), 6.0);
        assert_eq!(acc.get(&[1, 0]), 9.0);
    }

    #[test]
    fn rank3_folding() {
        // left [2, 3, 4] contracting its last two dims with right [3, 4]:
        // result is rank 1 — m = 2, k = 12, n = 1 would need a rank-1
        // right outer; instead contract one dim: left [2, 3] x right [3, 4, 5]
        // over the shared "3" gives rank 3.
        let h = GemmHelper::new(Trans::NoTrans, Trans::NoTrans, 3, 2, 3).unwrap();
        assert_eq!(h.num_contract(), 1);
        let a = tile(&[2, 3], |i| (i[0] * 3 + i[1]) as f64);
        let b = tile(&[3, 4, 5], |i| (i[0] * 20 + i[1] * 5 + i[2]) as f64);
        let c = a.gemm(&b, 1.0, &h).unwrap();
        assert_eq!(c.range().extents(), vec![2, 4, 5]);
        // c[i, j, l] = sum_s a[i, s] * b[s, j, l]
        let expect = |i: usize, j: usize, l: usize| -> f64 {
            (0..3)
                .map(|s| ((i * 3 + s) * (s * 20 + j * 5 + l)) as f64)
                .sum()
        };
        assert_eq!(c.get(&[0, 0, 0]), expect(0, 0, 0));
        assert_eq!(c.get(&[1, 3, 4]), expect(1, 3, 4));
    }

    #[test]
    fn transposed_left_operand() {
        // left stored [k, m], flagged Trans: op(A) = A^T.
        let h = GemmHelper::new(Trans::Trans, Trans::NoTrans, 2, 2, 2).unwrap();
        let a = tile(&[2, 2], |i| [[1.0, 2.0], [3.0, 4.0]][i[0]][i[1]]);
        let b = tile(&[2, 2], |i| [[5.0, 6.0], [7.0, 8.0]][i[0]][i[1]]);
        let c = a.gemm(&b, 1.0, &h).unwrap();
        // A^T * B = [[1,3],[2,4]] * [[5,6],[7,8]] = [[26,30],[38,44]]
        assert_eq!(c.get(&[0, 0]), 26.0);
        assert_eq!(c.get(&[1, 1]), 44.0);
    }

    #[test]
    fn outer_product_has_no_contracted_group() {
        let h = GemmHelper::new(Trans::NoTrans, Trans::NoTrans, 2, 1, 1).unwrap();
        assert_eq!(h.num_contract(), 0);
        let a = tile(&[3], |i| (i[0] + 1) as f64);
        let b = tile(&[4], |i| (i[0] + 1) as f64);
        let c = a.gemm(&b, 1.0, &h).unwrap();
        assert_eq!(c.range().extents(), vec![3, 4]);
        assert_eq!(c.get(&[0, 0]), 1.0);
        assert_eq!(c.get(&[2, 3]), 12.0);
    }

    #[test]
    fn single_element_tiles_contract() {
        let h = matmul_helper();
        let a = tile(&[1, 1], |_| 3.0);
        let b = tile(&[1, 1], |_| 4.0);
        let c = a.gemm(&b, 1.0, &h).unwrap();
        assert_eq!(c.get(&[0, 0]), 12.0);
    }

    #[test]
    fn empty_operands_yield_empty() {
        let h = matmul_helper();
        let a = tile(&[2, 2], |_| 1.0);
        let e = Tile::<f64>::default();
        assert!(a.gemm(&e, 1.0, &h).unwrap().is_empty());
        let mut acc = Tile::default();
        acc.gemm_to(&e, &a, 1.0, &h).unwrap();
        assert!(acc.is_empty());
    }

    #[test]
    fn incompatible_extents_rejected() {
        let h = matmul_helper();
        let a = tile(&[2, 3], |_| 1.0);
        let b = tile(&[4, 2], |_| 1.0);
        assert!(a.gemm(&b, 1.0, &h).is_err());
    }

    #[test]
    fn bad_rank_partitions_rejected() {
        assert!(GemmHelper::new(Trans::NoTrans, Trans::NoTrans, 0, 2, 2).is_err());
        assert!(GemmHelper::new(Trans::NoTrans, Trans::NoTrans, 3, 2, 2).is_err());
        assert!(GemmHelper::new(Trans::NoTrans, Trans::NoTrans, 6, 2, 2).is_err());
    }
}
