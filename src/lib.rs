//! Distributed block-sparse tensor algebra.
//!
//! `tiled-rs` represents large multi-dimensional arrays as grids of dense
//! rectangular tiles, distributes tile ownership over the ranks of a
//! process group, and evaluates composite tensor arithmetic written in an
//! annotated-index notation:
//!
//! ```
//! use tiled_rs::{Annotate, DistArray, TiledRange, TiledRange1, WorldGroup};
//!
//! WorldGroup::run_single(|world| {
//!     let dim = TiledRange1::with_uniform(0, 4, 2).unwrap();
//!     let trange = TiledRange::cubic(&dim, 2).unwrap();
//!     let a: DistArray<f64> = DistArray::new(&world, trange.clone());
//!     let b: DistArray<f64> = DistArray::new(&world, trange.clone());
//!     let c: DistArray<f64> = DistArray::new(&world, trange);
//!     a.set_all_local(1.0);
//!     b.set_all_local(1.0);
//!     world.fence();
//!
//!     c.annotate("m,n")
//!         .unwrap()
//!         .assign(a.annotate("m,i").unwrap() * b.annotate("i,n").unwrap())
//!         .unwrap();
//!
//!     let tile = c.find(0).unwrap().wait().unwrap();
//!     assert_eq!(tile.get(&[0, 0]), 8.0);
//! });
//! ```
//!
//! The facade re-exports the member crates: tile ranges and shapes
//! (`tiled-range`), permutations (`tiled-perm`), the tile operator suite
//! (`tiled-tile`), the task/future runtime (`tiled-runtime`), distributed
//! arrays (`tiled-array`) and the expression engine (`tiled-expr`).

pub use tiled_array::{ArrayError, CyclicMap, DistArray, ProcessMap, TileStore};
pub use tiled_expr::{Annotate, Annotated, ContractPlan, Expr, ExprError, VariableList};
pub use tiled_perm::{PermError, Permutation};
pub use tiled_range::{BlockRange, RangeError, Shape, TileSet, TiledRange, TiledRange1};
pub use tiled_runtime::{join_all, RuntimeError, TaskFuture, World, WorldGroup};
pub use tiled_tile::{gemm_kernel, GemmHelper, Tile, TileError, Trans};
pub use tiled_traits::{is_unit_factor, Scalar};
