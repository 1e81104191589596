//! Scalar type bounds for tiled tensor operations.

use std::fmt;

use num_complex::ComplexFloat;
use num_traits::Float;

/// Element types usable in tiles and tile expressions.
///
/// `ComplexFloat` supplies the numeric surface (arithmetic, `conj`, `abs`,
/// the associated real type), so `f32`, `f64`, `Complex32` and `Complex64`
/// all qualify. The remaining bounds make elements safe to move through the
/// task runtime.
pub trait Scalar:
    ComplexFloat<Real: Float + Send + Sync + fmt::Debug + 'static> + Send + Sync + fmt::Debug + 'static
{
}

impl<T> Scalar for T
where
    T: ComplexFloat + Send + Sync + fmt::Debug + 'static,
    T::Real: Float + Send + Sync + fmt::Debug + 'static,
{
}

/// Returns `true` if `alpha` is an identity prefactor.
///
/// A factor within 1e-15 of one (and with no imaginary part beyond the same
/// tolerance) lets operators skip the scaling pass entirely.
pub fn is_unit_factor<T: Scalar>(alpha: T) -> bool {
    let tol = match <T::Real as num_traits::NumCast>::from(1e-15) {
        Some(t) => t,
        None => return false,
    };
    (alpha - T::one()).abs() <= tol
}
