//! Pairwise contraction planning.

use tiled_tile::{GemmHelper, Trans};

use crate::vars::VariableList;
use crate::{ExprError, Result};

/// Axis classification of a pairwise contraction.
///
/// Indices shared by both operands are contracted; the free indices keep
/// their operand order and the natural result order is `free_left ++
/// free_right`. The child target orders arrange each operand so the
/// contraction folds into a plain GEMM: left as `[free_left…, sum…]`,
/// right as `[sum…, free_right…]`.
#[derive(Debug, Clone)]
pub struct ContractPlan {
    pub sum: Vec<String>,
    pub free_left: Vec<String>,
    pub free_right: Vec<String>,
    pub left_target: VariableList,
    pub right_target: VariableList,
    pub result: VariableList,
}

impl ContractPlan {
    pub fn new(left: &VariableList, right: &VariableList) -> Result<Self> {
        let sum = left.common(right);
        let free_left = left.difference(right);
        let free_right = right.difference(left);
        if free_left.is_empty() && free_right.is_empty() {
            // Everything shared is a Hadamard product, not a contraction.
            return Err(ExprError::IncompatibleVariables {
                left: left.to_string(),
                right: right.to_string(),
            });
        }

        let mut left_target = free_left.clone();
        left_target.extend(sum.iter().cloned());
        let mut right_target = sum.clone();
        right_target.extend(free_right.iter().cloned());
        let mut result = free_left.clone();
        result.extend(free_right.iter().cloned());

        Ok(Self {
            left_target: VariableList::from_parts(left_target)?,
            right_target: VariableList::from_parts(right_target)?,
            result: VariableList::from_parts(result)?,
            sum,
            free_left,
            free_right,
        })
    }

    /// The tile-level GEMM partition for operands in target order.
    pub fn helper(&self) -> GemmHelper {
        GemmHelper::new(
            Trans::NoTrans,
            Trans::NoTrans,
            self.free_left.len() + self.free_right.len(),
            self.free_left.len() + self.sum.len(),
            self.sum.len() + self.free_right.len(),
        )
        .expect("plan ranks always partition")
    }
}
