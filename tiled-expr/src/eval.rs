//! The distributed expression evaluator.
//!
//! Evaluation is a synchronous recursion over the tree that wires up
//! asynchronous per-tile tasks: children are evaluated first (returning
//! once their tile streams exist), each node then computes its replicated
//! output shape, and finally spawns one task per locally owned non-zero
//! output ordinal. A node thus moves one-way through children-ready,
//! shape-ready and tiles-emitting before the final fence marks it done.
//! Task bodies never block: inputs are future lists resolved by owners'
//! inserts, possibly across ranks.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use tiled_array::{CyclicMap, DistArray, ProcessMap, TileStore};
use tiled_range::{Shape, TiledRange};
use tiled_runtime::{RuntimeError, TaskFuture, World};
use tiled_tile::Tile;
use tiled_traits::{is_unit_factor, Scalar};

use crate::expr::{Annotated, Expr, Node};
use crate::plan::ContractPlan;
use crate::vars::VariableList;
use crate::{ExprError, Result};

/// Shared evaluation context: the world plus the first task error seen,
/// re-raised at the assignment site after the fence.
#[derive(Clone)]
struct EvalCx {
    world: World,
    first_error: Arc<Mutex<Option<String>>>,
}

impl EvalCx {
    fn new(world: World) -> Self {
        Self {
            world,
            first_error: Arc::new(Mutex::new(None)),
        }
    }

    fn record(&self, message: String) {
        let mut slot = self.first_error.lock();
        if slot.is_none() {
            *slot = Some(message);
        }
    }

    fn finish(&self) -> Result<()> {
        match self.first_error.lock().take() {
            Some(message) => Err(ExprError::Runtime(RuntimeError::Task(message))),
            None => Ok(()),
        }
    }
}

/// An evaluated node: a distributed array in the node's target variable
/// order, its tiles materialized lazily by in-flight tasks.
struct EvalNode<T: Scalar> {
    trange: TiledRange,
    shape: Shape,
    store: TileStore<T>,
}

impl<T: Scalar> EvalNode<T> {
    fn get(&self, ordinal: usize) -> TaskFuture<Tile<T>> {
        if self.shape.is_zero(ordinal) {
            TaskFuture::ready(Tile::default())
        } else {
            self.store.find(ordinal)
        }
    }

    fn pmap(&self) -> Arc<dyn ProcessMap> {
        Arc::clone(self.store.pmap())
    }
}

/// Spawn the task producing one output tile: wait on the inputs, compute,
/// insert into the node's store. Tile-level failures fail the task future
/// and are recorded for the assignment site.
fn spawn_tile_task<T, F>(
    cx: &EvalCx,
    deps: Vec<TaskFuture<Tile<T>>>,
    store: TileStore<T>,
    ordinal: usize,
    compute: F,
) where
    T: Scalar,
    F: FnOnce(Vec<Tile<T>>) -> tiled_tile::Result<Tile<T>> + Send + 'static,
{
    let cx = cx.clone();
    cx.world.clone().spawn_when(deps, move |tiles| {
        match compute(tiles) {
            Ok(tile) => {
                store.insert(ordinal, tile);
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                cx.record(message.clone());
                Err(RuntimeError::Task(message))
            }
        }
    });
}

fn eval<T: Scalar>(
    cx: &EvalCx,
    node: &Node<T>,
    target: &VariableList,
    placement: Option<Arc<dyn ProcessMap>>,
) -> Result<EvalNode<T>> {
    match node {
        Node::Leaf {
            array,
            vars,
            factor,
        } => eval_leaf(cx, array, vars, *factor, target, placement),
        Node::Add {
            left,
            right,
            factor,
        } => eval_elementwise(cx, left, right, *factor, target, placement, Elem::Add),
        Node::Subt {
            left,
            right,
            factor,
        } => eval_elementwise(cx, left, right, *factor, target, placement, Elem::Subt),
        Node::Mult {
            left,
            right,
            factor,
        } => eval_elementwise(cx, left, right, *factor, target, placement, Elem::Mult),
        Node::Contract {
            left,
            right,
            factor,
        } => eval_contract(cx, left, right, *factor, target, placement),
    }
}

/// A leaf in the consumer's variable order. The identity case passes the
/// array's own store through; otherwise every owned non-zero tile is
/// re-emitted through the fused scale+permute tile operation.
fn eval_leaf<T: Scalar>(
    cx: &EvalCx,
    array: &DistArray<T>,
    vars: &VariableList,
    factor: T,
    target: &VariableList,
    placement: Option<Arc<dyn ProcessMap>>,
) -> Result<EvalNode<T>> {
    let perm = vars.permutation_to(target)?;
    if perm.is_identity() && is_unit_factor(factor) {
        return Ok(EvalNode {
            trange: array.trange().clone(),
            shape: array.shape(),
            store: array.store().clone(),
        });
    }

    let src_trange = array.trange();
    let trange = src_trange.permuted(&perm)?;
    let shape = array.shape().permuted(&perm, &src_trange.tile_counts())?;
    let pmap = placement.unwrap_or_else(|| Arc::clone(array.pmap()));
    let store = TileStore::new(&cx.world, trange.tile_volume(), Arc::clone(&pmap));
    let inverse = perm.inverse();

    let mut emitted = 0usize;
    for ordinal in pmap.local_ordinals(cx.world.rank(), trange.tile_volume()) {
        if shape.is_zero(ordinal) {
            continue;
        }
        let out_index = trange.tile_index(ordinal)?;
        let src_index = inverse.apply(&out_index)?;
        let src_ordinal = src_trange.tile_ordinal(&src_index)?;
        let dep = array.find(src_ordinal)?;
        let perm = perm.clone();
        spawn_tile_task(cx, vec![dep], store.clone(), ordinal, move |mut tiles| {
            let tile = tiles.pop().expect("one dependency");
            tile.scale_permuted(factor, &perm)
        });
        emitted += 1;
    }
    debug!("leaf pass emits {emitted} tiles on rank {}", cx.world.rank());

    Ok(EvalNode {
        trange,
        shape,
        store,
    })
}

#[derive(Clone, Copy)]
enum Elem {
    Add,
    Subt,
    Mult,
}

/// Element-wise binary nodes: both children are brought to the common
/// target order, shapes combine by union (add/subt) or intersection
/// (Hadamard), and an absent addend degrades to a scaled or negated copy
/// of the present side.
fn eval_elementwise<T: Scalar>(
    cx: &EvalCx,
    left: &Node<T>,
    right: &Node<T>,
    factor: T,
    target: &VariableList,
    placement: Option<Arc<dyn ProcessMap>>,
    kind: Elem,
) -> Result<EvalNode<T>> {
    let lnode = eval(cx, left, target, placement.clone())?;
    let rnode = eval(cx, right, target, Some(lnode.pmap()))?;
    if lnode.trange != rnode.trange {
        return Err(ExprError::TrangeMismatch);
    }

    let shape = match kind {
        Elem::Add | Elem::Subt => lnode.shape.union(&rnode.shape),
        Elem::Mult => lnode.shape.intersect(&rnode.shape),
    };
    let trange = lnode.trange.clone();
    let pmap = placement.unwrap_or_else(|| lnode.pmap());
    let store = TileStore::new(&cx.world, trange.tile_volume(), Arc::clone(&pmap));

    for ordinal in pmap.local_ordinals(cx.world.rank(), trange.tile_volume()) {
        if shape.is_zero(ordinal) {
            continue;
        }
        let left_zero = lnode.shape.is_zero(ordinal);
        let right_zero = rnode.shape.is_zero(ordinal);
        match kind {
            Elem::Mult => {
                let deps = vec![lnode.get(ordinal), rnode.get(ordinal)];
                spawn_tile_task(cx, deps, store.clone(), ordinal, move |mut tiles| {
                    let r = tiles.pop().expect("two dependencies");
                    let l = tiles.pop().expect("two dependencies");
                    l.mult(&r, factor)
                });
            }
            Elem::Add | Elem::Subt => {
                let subtract = matches!(kind, Elem::Subt);
                match (left_zero, right_zero) {
                    (false, false) => {
                        let deps = vec![lnode.get(ordinal), rnode.get(ordinal)];
                        spawn_tile_task(cx, deps, store.clone(), ordinal, move |mut tiles| {
                            let r = tiles.pop().expect("two dependencies");
                            let l = tiles.pop().expect("two dependencies");
                            if subtract {
                                l.subt(&r, factor)
                            } else {
                                l.add(&r, factor)
                            }
                        });
                    }
                    (false, true) => {
                        let deps = vec![lnode.get(ordinal)];
                        spawn_tile_task(cx, deps, store.clone(), ordinal, move |mut tiles| {
                            Ok(tiles.pop().expect("one dependency").scale(factor))
                        });
                    }
                    (true, false) => {
                        let deps = vec![rnode.get(ordinal)];
                        spawn_tile_task(cx, deps, store.clone(), ordinal, move |mut tiles| {
                            let tile = tiles.pop().expect("one dependency");
                            Ok(if subtract {
                                tile.scale(-factor)
                            } else {
                                tile.scale(factor)
                            })
                        });
                    }
                    (true, true) => unreachable!("union shape marked a zero tile non-zero"),
                }
            }
        }
    }

    Ok(EvalNode {
        trange,
        shape,
        store,
    })
}

/// Pairwise contraction. Children are evaluated into the canonical
/// `[free_left…, sum…]` / `[sum…, free_right…]` orders, the output shape
/// is the boolean matrix product over fused tile-index groups, and each
/// owned output tile accumulates its contributions through `gemm_to` in
/// contracted-ordinal order (the deterministic tie-break for
/// floating-point accumulation).
fn eval_contract<T: Scalar>(
    cx: &EvalCx,
    left: &Node<T>,
    right: &Node<T>,
    factor: T,
    target: &VariableList,
    placement: Option<Arc<dyn ProcessMap>>,
) -> Result<EvalNode<T>> {
    let plan = ContractPlan::new(&left.vars()?, &right.vars()?)?;
    let lnode = eval(cx, left, &plan.left_target, None)?;
    let rnode = eval(cx, right, &plan.right_target, None)?;

    let nfl = plan.free_left.len();
    let nsum = plan.sum.len();
    let nfr = plan.free_right.len();

    for s in 0..nsum {
        if lnode.trange.dim(nfl + s) != rnode.trange.dim(s) {
            return Err(ExprError::ContractionMismatch);
        }
    }

    let mut dims = Vec::with_capacity(nfl + nfr);
    for d in 0..nfl {
        dims.push(lnode.trange.dim(d).clone());
    }
    for d in 0..nfr {
        dims.push(rnode.trange.dim(nsum + d).clone());
    }
    let natural = TiledRange::new(dims)?;

    let m: usize = (0..nfl).map(|d| lnode.trange.dim(d).tile_count()).product();
    let k: usize = (0..nsum)
        .map(|s| lnode.trange.dim(nfl + s).tile_count())
        .product();
    let n: usize = (0..nfr)
        .map(|d| rnode.trange.dim(nsum + d).tile_count())
        .product();

    let natural_shape = Shape::contract(&lnode.shape, &rnode.shape, m, k, n);
    let out_perm = plan.result.permutation_to(target)?;
    let trange = natural.permuted(&out_perm)?;
    let shape = natural_shape.permuted(&out_perm, &natural.tile_counts())?;

    let pmap = placement
        .unwrap_or_else(|| Arc::new(CyclicMap::new(cx.world.size())) as Arc<dyn ProcessMap>);
    let store = TileStore::new(&cx.world, trange.tile_volume(), Arc::clone(&pmap));
    let helper = plan.helper();
    let rank = cx.world.rank();

    for i in 0..m {
        for j in 0..n {
            let natural_ordinal = i * n + j;
            let out_ordinal = if out_perm.is_identity() {
                natural_ordinal
            } else {
                let index = natural.tile_index(natural_ordinal)?;
                trange.tile_ordinal(&out_perm.apply(&index)?)?
            };
            if pmap.owner(out_ordinal) != rank || shape.is_zero(out_ordinal) {
                continue;
            }

            // Both operand tiles of every non-zero k-contribution, in
            // contracted-ordinal order.
            let mut deps = Vec::new();
            for kk in 0..k {
                let l_ordinal = i * k + kk;
                let r_ordinal = kk * n + j;
                if lnode.shape.is_zero(l_ordinal) || rnode.shape.is_zero(r_ordinal) {
                    continue;
                }
                deps.push(lnode.get(l_ordinal));
                deps.push(rnode.get(r_ordinal));
            }
            debug_assert!(!deps.is_empty(), "non-zero output tile without contributions");

            let helper = helper.clone();
            let perm = out_perm.clone();
            spawn_tile_task(cx, deps, store.clone(), out_ordinal, move |tiles| {
                let mut acc = Tile::default();
                for pair in tiles.chunks(2) {
                    acc.gemm_to(&pair[0], &pair[1], factor, &helper)?;
                }
                if perm.is_identity() {
                    Ok(acc)
                } else {
                    acc.permuted(&perm)
                }
            });
        }
    }

    Ok(EvalNode {
        trange,
        shape,
        store,
    })
}

impl<T: Scalar> Annotated<T> {
    /// Evaluate `rhs` into this annotated destination.
    ///
    /// The destination adopts the expression's shape, its previous tiles
    /// are dropped, and evaluated tiles are routed in through the store
    /// (re-distributing when process maps differ). Collective: every rank
    /// must perform the same assignment. The first task error is re-raised
    /// here after the closing fence.
    pub fn assign(&self, rhs: impl Into<Expr<T>>) -> Result<()> {
        let expr: Expr<T> = rhs.into();
        let world = self.array.world().clone();
        let cx = EvalCx::new(world.clone());
        debug!("assignment into `{}` on rank {}", self.vars, world.rank());

        let node = eval(&cx, &expr.node, &self.vars, Some(Arc::clone(self.array.pmap())))?;
        if node.trange != *self.array.trange() {
            return Err(ExprError::TrangeMismatch);
        }

        // Let the root publish all owned tiles before touching the
        // destination: reads of the destination's current contents (for
        // example `c = c + a`) resolve during this fence.
        world.fence();

        let dest = self.array.store().clone();
        if node.store.same_store(&dest) {
            // Identity assignment: nothing moves.
            return cx.finish();
        }

        self.array.clear();
        self.array.set_shape(node.shape.clone())?;
        // Every rank must finish resetting its local destination bucket
        // before any re-routed tile may arrive there.
        world.fence();
        for ordinal in node
            .store
            .pmap()
            .local_ordinals(world.rank(), node.trange.tile_volume())
        {
            if node.shape.is_zero(ordinal) {
                continue;
            }
            let dep = node.get(ordinal);
            let dest = dest.clone();
            world.spawn_when(vec![dep], move |mut tiles| {
                dest.insert(ordinal, tiles.pop().expect("one dependency"));
                Ok(())
            });
        }
        world.fence();
        cx.finish()
    }
}
