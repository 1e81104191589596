//! Element-wise binary tile operations.
//!
//! Every operation takes a scalar prefactor applied to the result; a unit
//! prefactor skips the scaling pass. The `_permuted` forms fuse the layout
//! permutation into the same element pass, the `_to` forms accumulate in
//! place. Operands align by congruent element ranges; an empty operand is a
//! structural zero (absorbing for `mult`, neutral for `add`/`subt`).

use tiled_perm::Permutation;
use tiled_traits::{is_unit_factor, Scalar};

use crate::tile::Tile;
use crate::Result;

impl<T: Scalar> Tile<T> {
    /// `(self + rhs) * alpha`.
    pub fn add(&self, rhs: &Tile<T>, alpha: T) -> Result<Tile<T>> {
        match (self.is_empty(), rhs.is_empty()) {
            (true, true) => Ok(Tile::default()),
            (false, true) => Ok(self.scale(alpha)),
            (true, false) => Ok(rhs.scale(alpha)),
            (false, false) => {
                if is_unit_factor(alpha) {
                    self.zip(rhs, |a, b| a + b)
                } else {
                    self.zip(rhs, move |a, b| (a + b) * alpha)
                }
            }
        }
    }

    /// `perm ^ ((self + rhs) * alpha)` in one pass.
    pub fn add_permuted(&self, rhs: &Tile<T>, alpha: T, perm: &Permutation) -> Result<Tile<T>> {
        match (self.is_empty(), rhs.is_empty()) {
            (true, true) => Ok(Tile::default()),
            (false, true) => self.scale_permuted(alpha, perm),
            (true, false) => rhs.scale_permuted(alpha, perm),
            (false, false) => {
                if is_unit_factor(alpha) {
                    self.zip_permuted(rhs, perm, |a, b| a + b)
                } else {
                    self.zip_permuted(rhs, perm, move |a, b| (a + b) * alpha)
                }
            }
        }
    }

    /// `(self += rhs) *= alpha`.
    pub fn add_to(&mut self, rhs: &Tile<T>, alpha: T) -> Result<()> {
        if rhs.is_empty() {
            self.scale_to(alpha);
            return Ok(());
        }
        if self.is_empty() {
            *self = rhs.scale(alpha);
            return Ok(());
        }
        if is_unit_factor(alpha) {
            self.zip_to(rhs, |a, b| a + b)
        } else {
            self.zip_to(rhs, move |a, b| (a + b) * alpha)
        }
    }

    /// `(self - rhs) * alpha`.
    pub fn subt(&self, rhs: &Tile<T>, alpha: T) -> Result<Tile<T>> {
        match (self.is_empty(), rhs.is_empty()) {
            (true, true) => Ok(Tile::default()),
            (false, true) => Ok(self.scale(alpha)),
            (true, false) => Ok(if is_unit_factor(alpha) {
                rhs.neg()
            } else {
                rhs.map(move |b| -b * alpha)
            }),
            (false, false) => {
                if is_unit_factor(alpha) {
                    self.zip(rhs, |a, b| a - b)
                } else {
                    self.zip(rhs, move |a, b| (a - b) * alpha)
                }
            }
        }
    }

    /// `perm ^ ((self - rhs) * alpha)` in one pass.
    pub fn subt_permuted(&self, rhs: &Tile<T>, alpha: T, perm: &Permutation) -> Result<Tile<T>> {
        match (self.is_empty(), rhs.is_empty()) {
            (true, true) => Ok(Tile::default()),
            (false, true) => self.scale_permuted(alpha, perm),
            (true, false) => {
                if is_unit_factor(alpha) {
                    rhs.neg_permuted(perm)
                } else {
                    rhs.map_permuted(perm, move |b| -b * alpha)
                }
            }
            (false, false) => {
                if is_unit_factor(alpha) {
                    self.zip_permuted(rhs, perm, |a, b| a - b)
                } else {
                    self.zip_permuted(rhs, perm, move |a, b| (a - b) * alpha)
                }
            }
        }
    }

    /// `(self -= rhs) *= alpha`.
    pub fn subt_to(&mut self, rhs: &Tile<T>, alpha: T) -> Result<()> {
        if rhs.is_empty() {
            self.scale_to(alpha);
            return Ok(());
        }
        if self.is_empty() {
            *self = if is_unit_factor(alpha) {
                rhs.neg()
            } else {
                rhs.map(move |b| -b * alpha)
            };
            return Ok(());
        }
        if is_unit_factor(alpha) {
            self.zip_to(rhs, |a, b| a - b)
        } else {
            self.zip_to(rhs, move |a, b| (a - b) * alpha)
        }
    }

    /// Hadamard product `(self ⊙ rhs) * alpha`; an empty operand absorbs.
    pub fn mult(&self, rhs: &Tile<T>, alpha: T) -> Result<Tile<T>> {
        if self.is_empty() || rhs.is_empty() {
            return Ok(Tile::default());
        }
        if is_unit_factor(alpha) {
            self.zip(rhs, |a, b| a * b)
        } else {
            self.zip(rhs, move |a, b| a * b * alpha)
        }
    }

    /// `perm ^ ((self ⊙ rhs) * alpha)` in one pass.
    pub fn mult_permuted(&self, rhs: &Tile<T>, alpha: T, perm: &Permutation) -> Result<Tile<T>> {
        if self.is_empty() || rhs.is_empty() {
            return Ok(Tile::default());
        }
        if is_unit_factor(alpha) {
            self.zip_permuted(rhs, perm, |a, b| a * b)
        } else {
            self.zip_permuted(rhs, perm, move |a, b| a * b * alpha)
        }
    }

    /// `(self *= rhs) *= alpha`; an empty operand empties the result.
    pub fn mult_to(&mut self, rhs: &Tile<T>, alpha: T) -> Result<()> {
        if self.is_empty() || rhs.is_empty() {
            *self = Tile::default();
            return Ok(());
        }
        if is_unit_factor(alpha) {
            self.zip_to(rhs, |a, b| a * b)
        } else {
            self.zip_to(rhs, move |a, b| a * b * alpha)
        }
    }
}
