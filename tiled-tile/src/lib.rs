//! Dense tiles and tile-local operations.
//!
//! A [`Tile`] is a dense rectangular block of scalars, the unit of
//! distribution of a tiled array. Tiles are shallow-copy values: `Clone`
//! shares the underlying buffer, in-place operators copy-on-write, and
//! [`Tile::deep_clone`] produces an independent buffer.
//!
//! The operator suite follows a uniform naming grid: `op` builds a new
//! tile, `op_permuted` fuses a layout permutation into the same pass,
//! `op_to` mutates in place. Binary operators carry a scalar prefactor;
//! a prefactor of one skips the scaling pass.

pub mod gemm;
pub mod reduce;
pub mod tile;

mod ops;

pub use gemm::{gemm_kernel, GemmHelper, Trans};
pub use tile::Tile;

use tiled_perm::PermError;
use tiled_range::RangeError;

/// Errors raised by tile-local operations.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error("tile extent mismatch: {left:?} vs {right:?}")]
    ExtentMismatch { left: Vec<usize>, right: Vec<usize> },

    #[error("contraction rank mismatch: result {result}, left {left}, right {right}")]
    ContractionRanks {
        result: usize,
        left: usize,
        right: usize,
    },

    #[error("buffer length {len} does not match range volume {volume}")]
    BadBuffer { len: usize, volume: usize },

    #[error("operation requires a non-empty tile")]
    EmptyTile,

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Perm(#[from] PermError),
}

/// Convenience alias for `Result<T, TileError>`.
pub type Result<T> = std::result::Result<T, TileError>;
