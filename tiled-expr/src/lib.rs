//! Annotated-index tensor expressions.
//!
//! Annotating a [`DistArray`](tiled_array::DistArray) with a
//! comma-separated index string produces a leaf; operators on annotated
//! values build an expression tree; assigning the tree to an annotated
//! destination evaluates it through pipelined per-tile tasks:
//!
//! ```ignore
//! c.annotate("m,n")?.assign(a.annotate("m,i")? * b.annotate("i,n")?)?;
//! ```

pub mod eval;
pub mod expr;
pub mod plan;
pub mod vars;

pub use expr::{Annotate, Annotated, Expr};
pub use plan::ContractPlan;
pub use vars::VariableList;

use tiled_array::ArrayError;
use tiled_perm::PermError;
use tiled_range::RangeError;
use tiled_runtime::RuntimeError;
use tiled_tile::TileError;

/// Errors raised while building or evaluating expressions.
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    #[error("bad variable list: {0}")]
    BadVariableList(String),

    #[error("incompatible variable lists `{left}` and `{right}`")]
    IncompatibleVariables { left: String, right: String },

    #[error("tiled ranges of expression operands do not match")]
    TrangeMismatch,

    #[error("contracted tilings do not agree between the operands")]
    ContractionMismatch,

    #[error(transparent)]
    Perm(#[from] PermError),

    #[error(transparent)]
    Range(#[from] RangeError),

    #[error(transparent)]
    Tile(#[from] TileError),

    #[error(transparent)]
    Array(#[from] ArrayError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Convenience alias for `Result<T, ExprError>`.
pub type Result<T> = std::result::Result<T, ExprError>;
