//! Distributed tiled arrays.
//!
//! A [`DistArray`] pairs a [`TiledRange`](tiled_range::TiledRange) with a
//! process-mapped [`TileStore`]: every tile ordinal has exactly one owner
//! rank, owners hold the tile buffers, and non-owners reach tiles through
//! futures resolved by the owner's communication thread.

pub mod array;
pub mod pmap;
pub mod store;

pub use array::DistArray;
pub use pmap::{CyclicMap, ProcessMap};
pub use store::TileStore;

use tiled_range::RangeError;
use tiled_runtime::RuntimeError;
use tiled_tile::TileError;

/// Errors raised by distributed array operations.
#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    #[error("tile {0} is structurally zero in this shape")]
    StructuralZero(usize),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Convenience alias for `Result<T, ArrayError>`.
pub type Result<T> = std::result::Result<T, ArrayError>;
