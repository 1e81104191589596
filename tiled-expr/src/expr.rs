//! The expression tree and its operator surface.

use tiled_array::DistArray;
use tiled_runtime::World;
use tiled_traits::Scalar;

use crate::plan::ContractPlan;
use crate::vars::VariableList;
use crate::Result;

/// The closed node variants of an expression tree. Scaling folds into the
/// per-node prefactor at construction; permutation is implicit in the
/// difference between a node's variables and its consumer's target order.
pub(crate) enum Node<T: Scalar> {
    Leaf {
        array: DistArray<T>,
        vars: VariableList,
        factor: T,
    },
    Add {
        left: Box<Node<T>>,
        right: Box<Node<T>>,
        factor: T,
    },
    Subt {
        left: Box<Node<T>>,
        right: Box<Node<T>>,
        factor: T,
    },
    Mult {
        left: Box<Node<T>>,
        right: Box<Node<T>>,
        factor: T,
    },
    Contract {
        left: Box<Node<T>>,
        right: Box<Node<T>>,
        factor: T,
    },
}

impl<T: Scalar> Node<T> {
    /// The node's declared output variable order.
    pub(crate) fn vars(&self) -> Result<VariableList> {
        match self {
            Node::Leaf { vars, .. } => Ok(vars.clone()),
            Node::Add { left, .. } | Node::Subt { left, .. } | Node::Mult { left, .. } => {
                left.vars()
            }
            Node::Contract { left, right, .. } => {
                Ok(ContractPlan::new(&left.vars()?, &right.vars()?)?.result)
            }
        }
    }

    pub(crate) fn world(&self) -> &World {
        match self {
            Node::Leaf { array, .. } => array.world(),
            Node::Add { left, .. }
            | Node::Subt { left, .. }
            | Node::Mult { left, .. }
            | Node::Contract { left, .. } => left.world(),
        }
    }

    fn scale_in_place(&mut self, alpha: T) {
        let factor = match self {
            Node::Leaf { factor, .. }
            | Node::Add { factor, .. }
            | Node::Subt { factor, .. }
            | Node::Mult { factor, .. }
            | Node::Contract { factor, .. } => factor,
        };
        *factor = *factor * alpha;
    }

    pub(crate) fn factor(&self) -> T {
        match self {
            Node::Leaf { factor, .. }
            | Node::Add { factor, .. }
            | Node::Subt { factor, .. }
            | Node::Mult { factor, .. }
            | Node::Contract { factor, .. } => *factor,
        }
    }
}

/// A tensor expression awaiting assignment to an annotated destination.
pub struct Expr<T: Scalar> {
    pub(crate) node: Node<T>,
}

impl<T: Scalar> Expr<T> {
    /// The expression's natural output variable order.
    pub fn vars(&self) -> Result<VariableList> {
        self.node.vars()
    }

    /// Fold a scalar prefactor into the root node.
    pub fn scale(mut self, alpha: T) -> Self {
        self.node.scale_in_place(alpha);
        self
    }

    fn add_node(self, rhs: Expr<T>) -> Expr<T> {
        Expr {
            node: Node::Add {
                left: Box::new(self.node),
                right: Box::new(rhs.node),
                factor: T::one(),
            },
        }
    }

    fn subt_node(self, rhs: Expr<T>) -> Expr<T> {
        Expr {
            node: Node::Subt {
                left: Box::new(self.node),
                right: Box::new(rhs.node),
                factor: T::one(),
            },
        }
    }

    /// `*` is a Hadamard product when both sides carry the same index set
    /// and a pairwise contraction otherwise.
    fn mul_node(self, rhs: Expr<T>) -> Expr<T> {
        let hadamard = match (self.node.vars(), rhs.node.vars()) {
            (Ok(a), Ok(b)) => a.same_set(&b),
            _ => false,
        };
        let (left, right) = (Box::new(self.node), Box::new(rhs.node));
        let factor = T::one();
        Expr {
            node: if hadamard {
                Node::Mult {
                    left,
                    right,
                    factor,
                }
            } else {
                Node::Contract {
                    left,
                    right,
                    factor,
                }
            },
        }
    }
}

/// A distributed array annotated with an index list: an expression leaf
/// and the assignment destination. Holds a shared handle to the array's
/// tile store plus its own copy of the variable list.
pub struct Annotated<T: Scalar> {
    pub(crate) array: DistArray<T>,
    pub(crate) vars: VariableList,
}

impl<T: Scalar> Clone for Annotated<T> {
    fn clone(&self) -> Self {
        Self {
            array: self.array.clone(),
            vars: self.vars.clone(),
        }
    }
}

impl<T: Scalar> Annotated<T> {
    pub fn vars(&self) -> &VariableList {
        &self.vars
    }

    pub fn array(&self) -> &DistArray<T> {
        &self.array
    }
}

impl<T: Scalar> From<Annotated<T>> for Expr<T> {
    fn from(annotated: Annotated<T>) -> Self {
        Expr {
            node: Node::Leaf {
                array: annotated.array,
                vars: annotated.vars,
                factor: T::one(),
            },
        }
    }
}

/// Entry point of the expression surface: annotate an array with an index
/// string.
pub trait Annotate<T: Scalar> {
    fn annotate(&self, annotation: &str) -> Result<Annotated<T>>;
}

impl<T: Scalar> Annotate<T> for DistArray<T> {
    fn annotate(&self, annotation: &str) -> Result<Annotated<T>> {
        let vars = VariableList::parse(annotation)?;
        if vars.len() != self.trange().rank() {
            return Err(crate::ExprError::BadVariableList(format!(
                "annotation `{vars}` has {} indices for a rank-{} array",
                vars.len(),
                self.trange().rank()
            )));
        }
        Ok(Annotated {
            array: self.clone(),
            vars,
        })
    }
}

macro_rules! binary_operators {
    ($op:ident, $method:ident, $node:ident) => {
        impl<T: Scalar> std::ops::$op<Expr<T>> for Expr<T> {
            type Output = Expr<T>;
            fn $method(self, rhs: Expr<T>) -> Expr<T> {
                self.$node(rhs)
            }
        }

        impl<T: Scalar> std::ops::$op<Annotated<T>> for Expr<T> {
            type Output = Expr<T>;
            fn $method(self, rhs: Annotated<T>) -> Expr<T> {
                self.$node(Expr::from(rhs))
            }
        }

        impl<T: Scalar> std::ops::$op<Expr<T>> for Annotated<T> {
            type Output = Expr<T>;
            fn $method(self, rhs: Expr<T>) -> Expr<T> {
                Expr::from(self).$node(rhs)
            }
        }

        impl<T: Scalar> std::ops::$op<Annotated<T>> for Annotated<T> {
            type Output = Expr<T>;
            fn $method(self, rhs: Annotated<T>) -> Expr<T> {
                Expr::from(self).$node(Expr::from(rhs))
            }
        }
    };
}

binary_operators!(Add, add, add_node);
binary_operators!(Sub, sub, subt_node);
binary_operators!(Mul, mul, mul_node);

impl<T: Scalar> std::ops::Neg for Expr<T> {
    type Output = Expr<T>;
    fn neg(self) -> Expr<T> {
        self.scale(-T::one())
    }
}

impl<T: Scalar> std::ops::Neg for Annotated<T> {
    type Output = Expr<T>;
    fn neg(self) -> Expr<T> {
        -Expr::from(self)
    }
}

// Right-hand scalar prefactors: `expr * alpha`.
impl<T: Scalar> std::ops::Mul<T> for Expr<T> {
    type Output = Expr<T>;
    fn mul(self, alpha: T) -> Expr<T> {
        self.scale(alpha)
    }
}

impl<T: Scalar> std::ops::Mul<T> for Annotated<T> {
    type Output = Expr<T>;
    fn mul(self, alpha: T) -> Expr<T> {
        Expr::from(self).scale(alpha)
    }
}

// Left-hand scalar prefactors per concrete scalar type: `2.0 * a("i,j")`.
macro_rules! scalar_prefactor {
    ($($t:ty),*) => {$(
        impl std::ops::Mul<Expr<$t>> for $t {
            type Output = Expr<$t>;
            fn mul(self, rhs: Expr<$t>) -> Expr<$t> {
                rhs.scale(self)
            }
        }

        impl std::ops::Mul<Annotated<$t>> for $t {
            type Output = Expr<$t>;
            fn mul(self, rhs: Annotated<$t>) -> Expr<$t> {
                Expr::from(rhs).scale(self)
            }
        }
    )*};
}

scalar_prefactor!(f32, f64, num_complex::Complex32, num_complex::Complex64);

#[cfg(test)]
mod tests {
    use super::*;
    use tiled_range::{TiledRange, TiledRange1};
    use tiled_runtime::WorldGroup;

    fn matrix(world: &World) -> DistArray<f64> {
        let dim = TiledRange1::new(vec![0, 2, 4]).unwrap();
        DistArray::new(world, TiledRange::cubic(&dim, 2).unwrap())
    }

    #[test]
    fn annotate_checks_rank() {
        WorldGroup::run_single(|world| {
            let a = matrix(&world);
            assert!(a.annotate("i,j").is_ok());
            assert!(a.annotate("i").is_err());
            assert!(a.annotate("i,j,k").is_err());
        });
    }

    #[test]
    fn mul_dispatches_on_index_sets() {
        WorldGroup::run_single(|world| {
            let a = matrix(&world);
            let b = matrix(&world);

            let had = a.annotate("i,j").unwrap() * b.annotate("j,i").unwrap();
            assert!(matches!(had.node, Node::Mult { .. }));
            assert_eq!(had.vars().unwrap().to_string(), "i,j");

            let con = a.annotate("i,j").unwrap() * b.annotate("j,k").unwrap();
            assert!(matches!(con.node, Node::Contract { .. }));
            assert_eq!(con.vars().unwrap().to_string(), "i,k");
        });
    }

    #[test]
    fn prefactors_fold_into_the_node() {
        WorldGroup::run_single(|world| {
            let a = matrix(&world);
            let expr = 2.0 * a.annotate("i,j").unwrap();
            assert_eq!(expr.node.factor(), 2.0);
            let expr = (expr * 3.0).scale(0.5);
            assert_eq!(expr.node.factor(), 3.0);
            let neg = -(matrix(&world).annotate("i,j").unwrap());
            assert_eq!(neg.node.factor(), -1.0);
        });
    }

    #[test]
    fn sum_keeps_left_order() {
        WorldGroup::run_single(|world| {
            let a = matrix(&world);
            let b = matrix(&world);
            let expr = a.annotate("p,q").unwrap() + b.annotate("q,p").unwrap();
            assert_eq!(expr.vars().unwrap().to_string(), "p,q");
        });
    }
}
