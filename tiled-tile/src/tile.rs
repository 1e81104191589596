//! The dense tile value type.

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};
use tiled_perm::Permutation;
use tiled_range::BlockRange;
use tiled_traits::{is_unit_factor, Scalar};

use crate::{Result, TileError};

type IdxVec = SmallVec<[usize; 8]>;

/// A dense rectangular block of scalars with an absolute element range and
/// row-major storage.
///
/// `Clone` is shallow (the buffer is reference-counted and shared);
/// in-place operations copy-on-write, so aliased handles never observe a
/// mutation. The default tile is *empty* — it has no buffer and stands for
/// a structural zero.
#[derive(Debug, Clone)]
pub struct Tile<T> {
    range: BlockRange,
    data: Arc<Vec<T>>,
}

impl<T> Default for Tile<T> {
    fn default() -> Self {
        Self {
            range: BlockRange::empty(),
            data: Arc::new(Vec::new()),
        }
    }
}

impl<T: Scalar> Tile<T> {
    /// A tile with every element set to `value`.
    pub fn new(range: BlockRange, value: T) -> Self {
        let volume = range.volume();
        Self {
            range,
            data: Arc::new(vec![value; volume]),
        }
    }

    /// A zero-filled tile.
    pub fn zero(range: BlockRange) -> Self {
        Self::new(range, T::zero())
    }

    /// Wrap an existing row-major buffer; its length must match the range
    /// volume.
    pub fn from_vec(range: BlockRange, data: Vec<T>) -> Result<Self> {
        if data.len() != range.volume() {
            return Err(TileError::BadBuffer {
                len: data.len(),
                volume: range.volume(),
            });
        }
        Ok(Self {
            range,
            data: Arc::new(data),
        })
    }

    /// Fill from a function of the absolute element index.
    pub fn from_fn<F: FnMut(&[usize]) -> T>(range: BlockRange, mut f: F) -> Self {
        let data = (0..range.volume()).map(|o| f(&range.index_of(o))).collect();
        Self {
            range,
            data: Arc::new(data),
        }
    }

    /// `true` for the uninitialized (structural-zero) tile.
    pub fn is_empty(&self) -> bool {
        self.range.rank() == 0
    }

    pub fn range(&self) -> &BlockRange {
        &self.range
    }

    pub fn volume(&self) -> usize {
        self.range.volume()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// Element at an absolute index.
    pub fn get(&self, index: &[usize]) -> T {
        self.data[self.range.offset_of(index)]
    }

    /// An independent deep copy of the buffer.
    pub fn deep_clone(&self) -> Self {
        Self {
            range: self.range.clone(),
            data: Arc::new(self.data.as_ref().clone()),
        }
    }

    /// `true` when both handles share one buffer.
    pub fn shares_buffer(&self, other: &Tile<T>) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub(crate) fn data_mut(&mut self) -> &mut [T] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Move the element range by a per-dimension offset; the payload is
    /// untouched.
    pub fn shift(&self, delta: &[isize]) -> Result<Self> {
        Ok(Self {
            range: self.range.shifted(delta)?,
            data: Arc::clone(&self.data),
        })
    }

    /// In-place range shift.
    pub fn shift_to(&mut self, delta: &[isize]) -> Result<()> {
        self.range = self.range.shifted(delta)?;
        Ok(())
    }

    /// A tile whose extents and data are reindexed by `perm`.
    pub fn permuted(&self, perm: &Permutation) -> Result<Self> {
        self.map_permuted(perm, |x| x)
    }

    /// Scaled copy; a unit prefactor returns a shallow copy.
    pub fn scale(&self, alpha: T) -> Self {
        if is_unit_factor(alpha) {
            return self.clone();
        }
        self.map(|x| x * alpha)
    }

    /// In-place scale; a unit prefactor is a no-op.
    pub fn scale_to(&mut self, alpha: T) {
        if is_unit_factor(alpha) {
            return;
        }
        self.map_to(|x| x * alpha);
    }

    /// Fused scale + permute in a single pass over the elements.
    pub fn scale_permuted(&self, alpha: T, perm: &Permutation) -> Result<Self> {
        if is_unit_factor(alpha) {
            return self.permuted(perm);
        }
        self.map_permuted(perm, |x| x * alpha)
    }

    pub fn neg(&self) -> Self {
        self.map(|x| -x)
    }

    pub fn neg_to(&mut self) {
        self.map_to(|x| -x);
    }

    pub fn neg_permuted(&self, perm: &Permutation) -> Result<Self> {
        self.map_permuted(perm, |x| -x)
    }

    /// Complex conjugate; the identity for real scalars.
    pub fn conj(&self) -> Self {
        self.map(|x| x.conj())
    }

    pub fn conj_to(&mut self) {
        self.map_to(|x| x.conj());
    }

    // ------------------------------------------------------------------
    // Element-pass helpers shared by the operator suite.
    // ------------------------------------------------------------------

    pub(crate) fn map<F: Fn(T) -> T>(&self, f: F) -> Self {
        if self.is_empty() {
            return Self::default();
        }
        Self {
            range: self.range.clone(),
            data: Arc::new(self.data.iter().map(|&x| f(x)).collect()),
        }
    }

    pub(crate) fn map_to<F: Fn(T) -> T>(&mut self, f: F) {
        if self.is_empty() {
            return;
        }
        for x in self.data_mut() {
            *x = f(*x);
        }
    }

    pub(crate) fn map_permuted<F: Fn(T) -> T>(&self, perm: &Permutation, f: F) -> Result<Self> {
        if self.is_empty() {
            return Ok(Self::default());
        }
        let dst_range = self.range.permuted(perm)?;
        let out = permute_pass(&self.data, &self.range, &dst_range, perm, |_, x| f(x));
        Ok(Self {
            range: dst_range,
            data: Arc::new(out),
        })
    }

    /// Check element-range alignment for a binary operation.
    pub(crate) fn check_congruent(&self, rhs: &Tile<T>) -> Result<()> {
        if !self.range.congruent(rhs.range()) {
            return Err(TileError::ExtentMismatch {
                left: self.range.extents(),
                right: rhs.range.extents(),
            });
        }
        Ok(())
    }

    pub(crate) fn zip<F: Fn(T, T) -> T>(&self, rhs: &Tile<T>, f: F) -> Result<Self> {
        self.check_congruent(rhs)?;
        Ok(Self {
            range: self.range.clone(),
            data: Arc::new(
                self.data
                    .iter()
                    .zip(rhs.data.iter())
                    .map(|(&a, &b)| f(a, b))
                    .collect(),
            ),
        })
    }

    pub(crate) fn zip_to<F: Fn(T, T) -> T>(&mut self, rhs: &Tile<T>, f: F) -> Result<()> {
        self.check_congruent(rhs)?;
        let rhs_data = Arc::clone(&rhs.data);
        for (a, &b) in self.data_mut().iter_mut().zip(rhs_data.iter()) {
            *a = f(*a, b);
        }
        Ok(())
    }

    pub(crate) fn zip_permuted<F: Fn(T, T) -> T>(
        &self,
        rhs: &Tile<T>,
        perm: &Permutation,
        f: F,
    ) -> Result<Self> {
        self.check_congruent(rhs)?;
        let dst_range = self.range.permuted(perm)?;
        let rhs_data = Arc::clone(&rhs.data);
        let out = permute_pass(&self.data, &self.range, &dst_range, perm, |src_off, a| {
            f(a, rhs_data[src_off])
        });
        Ok(Self {
            range: dst_range,
            data: Arc::new(out),
        })
    }
}

/// Single pass copying `src` into the permuted layout, applying `f` to each
/// element (given its source offset). The odometer walks source offsets in
/// row-major order while the destination offset follows the permuted
/// strides.
fn permute_pass<T: Scalar, F: Fn(usize, T) -> T>(
    src: &[T],
    src_range: &BlockRange,
    dst_range: &BlockRange,
    perm: &Permutation,
    f: F,
) -> Vec<T> {
    let rank = src_range.rank();
    let extents = src_range.extents();
    let dst_weights = dst_range.weights();
    let strides: IdxVec = (0..rank).map(|d| dst_weights[perm.image(d)]).collect();

    let mut out = vec![T::zero(); src.len()];
    let mut idx: IdxVec = smallvec![0; rank];
    let mut dst_off = 0usize;
    for (src_off, &v) in src.iter().enumerate() {
        out[dst_off] = f(src_off, v);
        for d in (0..rank).rev() {
            idx[d] += 1;
            dst_off += strides[d];
            if idx[d] < extents[d] {
                break;
            }
            dst_off -= strides[d] * extents[d];
            idx[d] = 0;
        }
    }
    out
}

impl<T: Scalar> PartialEq for Tile<T> {
    fn eq(&self, other: &Self) -> bool {
        self.range == other.range && self.data == other.data
    }
}
