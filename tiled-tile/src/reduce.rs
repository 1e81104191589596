//! Tile-local reductions.
//!
//! All reductions fold left-to-right over the row-major element order and
//! are not assumed associative; cross-process aggregation goes through the
//! world's collective reduction instead of re-folding locally.

use num_traits::Zero;
use tiled_traits::Scalar;

use crate::tile::Tile;
use crate::Result;

impl<T: Scalar> Tile<T> {
    /// Sum of all elements; zero for an empty tile.
    pub fn sum(&self) -> T {
        self.data()
            .iter()
            .fold(T::zero(), |acc, &x| acc + x)
    }

    /// Product of all elements; one (the neutral element) for an empty tile.
    pub fn product(&self) -> T {
        self.data().iter().fold(T::one(), |acc, &x| acc * x)
    }

    /// Hyper-diagonal sum: elements at `lobound + (d, d, …, d)` for
    /// `d` below the smallest extent.
    pub fn trace(&self) -> T {
        if self.is_empty() {
            return T::zero();
        }
        let lo = self.range().lobound().to_vec();
        let steps = (0..self.range().rank())
            .map(|d| self.range().extent(d))
            .min()
            .unwrap_or(0);
        let mut acc = T::zero();
        let mut index = lo.clone();
        for d in 0..steps {
            for (i, &l) in index.iter_mut().zip(&lo) {
                *i = l + d;
            }
            acc = acc + self.get(&index);
        }
        acc
    }

    /// Smallest element under the real-part ordering; `None` for an empty
    /// tile. For complex data prefer [`Tile::abs_min`].
    pub fn min_elem(&self) -> Option<T> {
        self.data()
            .iter()
            .copied()
            .reduce(|m, x| if x.re() < m.re() { x } else { m })
    }

    /// Largest element under the real-part ordering; `None` for an empty
    /// tile. For complex data prefer [`Tile::abs_max`].
    pub fn max_elem(&self) -> Option<T> {
        self.data()
            .iter()
            .copied()
            .reduce(|m, x| if x.re() > m.re() { x } else { m })
    }

    /// Smallest element modulus.
    pub fn abs_min(&self) -> Option<T::Real> {
        self.data()
            .iter()
            .map(|x| x.abs())
            .reduce(|m, x| if x < m { x } else { m })
    }

    /// Largest element modulus.
    pub fn abs_max(&self) -> Option<T::Real> {
        self.data()
            .iter()
            .map(|x| x.abs())
            .reduce(|m, x| if x > m { x } else { m })
    }

    /// `sum_i |x_i|^2`.
    pub fn squared_norm(&self) -> T::Real {
        self.data()
            .iter()
            .fold(T::Real::zero(), |acc, &x| acc + (x * x.conj()).re())
    }

    /// Vector 2-norm.
    pub fn norm(&self) -> T::Real {
        num_traits::Float::sqrt(self.squared_norm())
    }

    /// `sum_i self_i * rhs_i` over congruent tiles.
    pub fn dot(&self, rhs: &Tile<T>) -> Result<T> {
        self.check_congruent(rhs)?;
        Ok(self
            .data()
            .iter()
            .zip(rhs.data())
            .fold(T::zero(), |acc, (&a, &b)| acc + a * b))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;
    use tiled_range::BlockRange;

    use crate::tile::Tile;

    fn tile(extents: &[usize], f: impl FnMut(&[usize]) -> f64) -> Tile<f64> {
        Tile::from_fn(BlockRange::from_extents(extents), f)
    }

    #[test]
    fn sum_product() {
        let t = tile(&[2, 2], |i| (i[0] * 2 + i[1] + 1) as f64);
        assert_eq!(t.sum(), 10.0);
        assert_eq!(t.product(), 24.0);
    }

    #[test]
    fn trace_square_and_rect() {
        let t = tile(&[3, 3], |i| if i[0] == i[1] { (i[0] + 1) as f64 } else { 9.0 });
        assert_eq!(t.trace(), 6.0);
        // Rectangular: diagonal runs to the smallest extent.
        let r = tile(&[2, 3], |i| (i[0] * 3 + i[1]) as f64);
        assert_eq!(r.trace(), 0.0 + 4.0);
    }

    #[test]
    fn trace_respects_lobound() {
        let range = BlockRange::new(vec![2, 5], vec![4, 7]).unwrap();
        let t = Tile::from_fn(range, |i| (i[0] * 10 + i[1]) as f64);
        // Diagonal elements are (2,5) and (3,6).
        assert_eq!(t.trace(), 25.0 + 36.0);
    }

    #[test]
    fn extrema() {
        let t = tile(&[4], |i| [3.0, -1.0, 7.0, 0.5][i[0]]);
        assert_eq!(t.min_elem(), Some(-1.0));
        assert_eq!(t.max_elem(), Some(7.0));
        assert_eq!(t.abs_min(), Some(0.5));
        assert_eq!(t.abs_max(), Some(7.0));
        assert_eq!(Tile::<f64>::default().min_elem(), None);
    }

    #[test]
    fn norms() {
        let t = tile(&[2], |i| [3.0, 4.0][i[0]]);
        assert_abs_diff_eq!(t.squared_norm(), 25.0);
        assert_abs_diff_eq!(t.norm(), 5.0);
    }

    #[test]
    fn complex_norm_uses_modulus() {
        let range = BlockRange::from_extents(&[2]);
        let t = Tile::from_vec(
            range,
            vec![Complex64::new(3.0, 4.0), Complex64::new(0.0, 1.0)],
        )
        .unwrap();
        assert_abs_diff_eq!(t.squared_norm(), 26.0);
        assert_eq!(t.abs_max(), Some(5.0));
    }

    #[test]
    fn dot_product() {
        let a = tile(&[3], |i| (i[0] + 1) as f64);
        let b = tile(&[3], |i| (i[0] + 4) as f64);
        assert_eq!(a.dot(&b).unwrap(), 1.0 * 4.0 + 2.0 * 5.0 + 3.0 * 6.0);
        let c = tile(&[2], |_| 1.0);
        assert!(a.dot(&c).is_err());
    }

    #[test]
    fn empty_reductions() {
        let e = Tile::<f64>::default();
        assert_eq!(e.sum(), 0.0);
        assert_eq!(e.product(), 1.0);
        assert_eq!(e.trace(), 0.0);
        assert_eq!(e.squared_norm(), 0.0);
    }
}
