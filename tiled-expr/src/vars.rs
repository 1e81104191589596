//! Annotation variable lists.

use tiled_perm::Permutation;

use crate::{ExprError, Result};

/// An ordered list of distinct index identifiers, parsed from a
/// comma-separated annotation such as `"m, n, i"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableList {
    vars: Vec<String>,
}

impl VariableList {
    /// Parse an annotation string; whitespace around identifiers is
    /// trimmed, empty identifiers and duplicates are rejected.
    pub fn parse(annotation: &str) -> Result<Self> {
        let vars: Vec<String> = annotation
            .split(',')
            .map(|v| v.trim().to_string())
            .collect();
        Self::from_parts(vars)
    }

    /// Build from pre-split identifiers with the same validation.
    pub fn from_parts(vars: Vec<String>) -> Result<Self> {
        for (i, v) in vars.iter().enumerate() {
            if v.is_empty() {
                return Err(ExprError::BadVariableList("empty identifier".into()));
            }
            if !v.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(ExprError::BadVariableList(format!(
                    "invalid identifier `{v}`"
                )));
            }
            if vars[..i].contains(v) {
                return Err(ExprError::BadVariableList(format!(
                    "duplicate identifier `{v}`"
                )));
            }
        }
        Ok(Self { vars })
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn get(&self, i: usize) -> &str {
        &self.vars[i]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(String::as_str)
    }

    pub fn position(&self, var: &str) -> Option<usize> {
        self.vars.iter().position(|v| v == var)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.position(var).is_some()
    }

    /// Same identifiers regardless of order.
    pub fn same_set(&self, other: &VariableList) -> bool {
        self.len() == other.len() && self.iter().all(|v| other.contains(v))
    }

    /// Identifiers of `self` also present in `other`, in `self` order.
    pub fn common(&self, other: &VariableList) -> Vec<String> {
        self.vars
            .iter()
            .filter(|v| other.contains(v))
            .cloned()
            .collect()
    }

    /// Identifiers of `self` absent from `other`, in `self` order.
    pub fn difference(&self, other: &VariableList) -> Vec<String> {
        self.vars
            .iter()
            .filter(|v| !other.contains(v))
            .cloned()
            .collect()
    }

    /// The permutation `p` with `other[p[i]] == self[i]`: applying it to a
    /// tuple in `self` order yields `other` order.
    pub fn permutation_to(&self, other: &VariableList) -> Result<Permutation> {
        if !self.same_set(other) {
            return Err(ExprError::IncompatibleVariables {
                left: self.to_string(),
                right: other.to_string(),
            });
        }
        let images = self
            .vars
            .iter()
            .map(|v| other.position(v).expect("checked same set"))
            .collect();
        Ok(Permutation::new(images)?)
    }
}

impl std::fmt::Display for VariableList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.vars.join(","))
    }
}
