//! Two-level range model for tiled tensors.
//!
//! A [`TiledRange1`] partitions a dense 1-d integer range into tiles by a
//! strictly increasing boundary vector. A [`TiledRange`] is the Cartesian
//! product of per-dimension tilings; its outer level enumerates tiles, its
//! inner level elements. [`BlockRange`] is the dense rectangular element box
//! of a single tile, and [`Shape`] classifies tiles as structurally zero or
//! non-zero.
//!
//! All ordinal ↔ multi-index conversions in this crate use row-major
//! weights (last index varies fastest).

pub mod block;
pub mod shape;
pub mod tiling;
pub mod trange;

pub use block::{row_major_weights, BlockRange};
pub use shape::{Shape, TileSet};
pub use tiling::TiledRange1;
pub use trange::TiledRange;

use tiled_perm::PermError;

/// Errors raised by range and shape construction.
#[derive(Debug, thiserror::Error)]
pub enum RangeError {
    #[error("tiling needs at least two boundary points, got {0}")]
    TooFewBoundaries(usize),

    #[error("tile boundaries must be strictly increasing (violated at position {0})")]
    NonIncreasingBoundary(usize),

    #[error("tiled range must have at least one dimension")]
    ZeroRank,

    #[error("invalid bounds in dimension {dim}: [{lo}, {up})")]
    BadBounds { dim: usize, lo: usize, up: usize },

    #[error("rank mismatch: {left} vs {right}")]
    RankMismatch { left: usize, right: usize },

    #[error("tile ordinal {ordinal} out of range (tile count {count})")]
    OrdinalOutOfRange { ordinal: usize, count: usize },

    #[error("shape covers {shape} tiles but the range has {range}")]
    ShapeSizeMismatch { shape: usize, range: usize },

    #[error("shift underflows dimension {0}")]
    ShiftUnderflow(usize),

    #[error(transparent)]
    Perm(#[from] PermError),
}

/// Convenience alias for `Result<T, RangeError>`.
pub type Result<T> = std::result::Result<T, RangeError>;
