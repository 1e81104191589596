//! Index permutations.
//!
//! A [`Permutation`] is a bijection on `{0 … D-1}` applied to coordinate
//! tuples, shapes and tile payloads with the image-in-position convention:
//! applying `p` to `x` places `x[i]` at position `p[i]` of the result.

/// Errors raised by permutation construction and application.
#[derive(Debug, thiserror::Error)]
pub enum PermError {
    #[error("invalid permutation {0:?}: images must be a bijection on 0..{1}")]
    Invalid(Vec<usize>, usize),

    #[error("rank mismatch: permutation has rank {perm}, operand has rank {operand}")]
    RankMismatch { perm: usize, operand: usize },
}

/// Convenience alias for `Result<T, PermError>`.
pub type Result<T> = std::result::Result<T, PermError>;

/// A validated bijection on `{0 … D-1}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Permutation {
    images: Vec<usize>,
}

impl Permutation {
    /// Build a permutation from its image vector.
    ///
    /// `images[i]` is the position that component `i` moves to. Out-of-range
    /// or repeated images are rejected.
    pub fn new(images: Vec<usize>) -> Result<Self> {
        let rank = images.len();
        let mut seen = vec![false; rank];
        for &p in &images {
            if p >= rank || seen[p] {
                return Err(PermError::Invalid(images.clone(), rank));
            }
            seen[p] = true;
        }
        Ok(Self { images })
    }

    /// The identity permutation of the given rank.
    pub fn identity(rank: usize) -> Self {
        Self {
            images: (0..rank).collect(),
        }
    }

    pub fn rank(&self) -> usize {
        self.images.len()
    }

    /// Image of position `i`.
    pub fn image(&self, i: usize) -> usize {
        self.images[i]
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.images
    }

    /// Returns `true` if this is the identity map.
    pub fn is_identity(&self) -> bool {
        self.images.iter().enumerate().all(|(i, &p)| i == p)
    }

    /// Apply to an ordered tuple: `out[p[i]] = x[i]`.
    pub fn apply<T: Clone>(&self, x: &[T]) -> Result<Vec<T>> {
        if x.len() != self.rank() {
            return Err(PermError::RankMismatch {
                perm: self.rank(),
                operand: x.len(),
            });
        }
        let mut out = x.to_vec();
        for (i, v) in x.iter().enumerate() {
            out[self.images[i]] = v.clone();
        }
        Ok(out)
    }

    /// Composition `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &Permutation) -> Result<Permutation> {
        if other.rank() != self.rank() {
            return Err(PermError::RankMismatch {
                perm: self.rank(),
                operand: other.rank(),
            });
        }
        let images = other.images.iter().map(|&q| self.images[q]).collect();
        Ok(Permutation { images })
    }

    /// The inverse permutation: `p.compose(&p.inverse()) == identity`.
    pub fn inverse(&self) -> Permutation {
        let mut images = vec![0; self.rank()];
        for (i, &p) in self.images.iter().enumerate() {
            images[p] = i;
        }
        Permutation { images }
    }
}

impl std::ops::Mul for &Permutation {
    type Output = Permutation;

    fn mul(self, rhs: &Permutation) -> Permutation {
        self.compose(rhs).expect("composing permutations of unequal rank")
    }
}

impl std::fmt::Display for Permutation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, p) in self.images.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ")")
    }
}
