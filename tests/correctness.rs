//! End-to-end expression-engine scenarios, single- and multi-rank.

use std::sync::Arc;

use approx::assert_abs_diff_eq;
use num_complex::Complex64;

use tiled_rs::{
    Annotate, CyclicMap, DistArray, ProcessMap, Shape, TiledRange, TiledRange1, World, WorldGroup,
};

fn square_trange(boundaries: &[usize], rank: usize) -> TiledRange {
    let dim = TiledRange1::new(boundaries.to_vec()).unwrap();
    TiledRange::cubic(&dim, rank).unwrap()
}

/// Read the full matrix out of a rank-2 distributed array, through remote
/// finds where needed.
fn gather_matrix(a: &DistArray<f64>, n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for ordinal in 0..a.trange().tile_volume() {
        let tile = a.find(ordinal).unwrap().wait().unwrap();
        if tile.is_empty() {
            continue;
        }
        let range = tile.range().clone();
        for offset in 0..range.volume() {
            let idx = range.index_of(offset);
            out[idx[0] * n + idx[1]] = tile.data()[offset];
        }
    }
    out
}

#[test]
fn dense_block_gemm_all_ones() {
    // 64x64 all-ones matrices tiled 8x8: every output element equals 64,
    // all 64 output tiles dense.
    for ranks in [1, 3] {
        WorldGroup::run(ranks, |world| {
            let trange = square_trange(
                &(0..=8).map(|i| i * 8).collect::<Vec<_>>(),
                2,
            );
            let a: DistArray<f64> = DistArray::new(&world, trange.clone());
            let b: DistArray<f64> = DistArray::new(&world, trange.clone());
            let c: DistArray<f64> = DistArray::new(&world, trange);
            a.set_all_local(1.0);
            b.set_all_local(1.0);
            world.fence();

            c.annotate("m,n")
                .unwrap()
                .assign(a.annotate("m,i").unwrap() * b.annotate("i,n").unwrap())
                .unwrap();

            assert!(c.shape().is_dense());
            assert_eq!(c.trange().tile_volume(), 64);
            let result = gather_matrix(&c, 64);
            for &v in &result {
                assert_eq!(v, 64.0);
            }
            world.fence();
        });
    }
}

#[test]
fn hadamard_with_permutation() {
    // c("j,i") = a("i,j") * b("i,j") with a = identity, b = all ones:
    // the transpose of the identity is the identity.
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 2, 4], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let b: DistArray<f64> = DistArray::new(&world, trange.clone());
        let c: DistArray<f64> = DistArray::new(&world, trange);
        a.fill_local_with(|idx| if idx[0] == idx[1] { 1.0 } else { 0.0 });
        b.set_all_local(1.0);
        world.fence();

        c.annotate("j,i")
            .unwrap()
            .assign(a.annotate("i,j").unwrap() * b.annotate("i,j").unwrap())
            .unwrap();

        let result = gather_matrix(&c, 4);
        for i in 0..4 {
            for j in 0..4 {
                assert_eq!(result[i * 4 + j], if i == j { 1.0 } else { 0.0 });
            }
        }
    });
}

#[test]
fn sparse_diagonal_contraction_multi_rank() {
    WorldGroup::run(2, |world| {
        let trange = square_trange(&[0, 1, 2, 3, 4, 5], 2);
        let diag = Shape::from_nonzeros(25, (0..5).map(|i| i * 5 + i));
        let a: DistArray<f64> = DistArray::with_shape(&world, trange.clone(), diag.clone()).unwrap();
        let b: DistArray<f64> = DistArray::with_shape(&world, trange.clone(), diag).unwrap();
        let c: DistArray<f64> = DistArray::new(&world, trange);
        a.fill_local_with(|idx| (idx[0] + 1) as f64);
        b.fill_local_with(|idx| ((idx[0] + 1) * 10) as f64);
        world.fence();

        c.annotate("i,k")
            .unwrap()
            .assign(a.annotate("i,j").unwrap() * b.annotate("j,k").unwrap())
            .unwrap();

        // Output shape stays diagonal, values are products of the
        // operand diagonals.
        let shape = c.shape();
        for i in 0..5 {
            for k in 0..5 {
                assert_eq!(shape.is_zero(i * 5 + k), i != k);
            }
        }
        for i in 0..5 {
            let tile = c.find(i * 5 + i).unwrap().wait().unwrap();
            let expected = (i + 1) as f64 * ((i + 1) * 10) as f64;
            assert_eq!(tile.get(&[i, i]), expected);
        }
        world.fence();
    });
}

#[test]
fn sparse_addition_shape_union() {
    // a non-zero {(0,0),(1,1)}, b non-zero {(0,1),(1,1)}; the sum covers
    // the union and adds where both are present.
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 2, 4], 2);
        let a: DistArray<f64> =
            DistArray::with_shape(&world, trange.clone(), Shape::from_nonzeros(4, [0, 3])).unwrap();
        let b: DistArray<f64> =
            DistArray::with_shape(&world, trange.clone(), Shape::from_nonzeros(4, [1, 3])).unwrap();
        let c: DistArray<f64> = DistArray::new(&world, trange);
        a.set_all_local(1.0);
        b.set_all_local(2.0);
        world.fence();

        c.annotate("i,j")
            .unwrap()
            .assign(a.annotate("i,j").unwrap() + b.annotate("i,j").unwrap())
            .unwrap();

        let shape = c.shape();
        assert!(!shape.is_zero(0));
        assert!(!shape.is_zero(1));
        assert!(shape.is_zero(2));
        assert!(!shape.is_zero(3));

        assert_eq!(c.find(0).unwrap().wait().unwrap().get(&[0, 0]), 1.0);
        assert_eq!(c.find(1).unwrap().wait().unwrap().get(&[0, 2]), 2.0);
        assert_eq!(c.find(3).unwrap().wait().unwrap().get(&[2, 2]), 3.0);
    });
}

#[test]
fn permute_then_scale() {
    // c("i,j") = 2 * a("j,i") over a 3x3 grid tiled 1x1.
    WorldGroup::run(2, |world| {
        let trange = square_trange(&[0, 1, 2, 3], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let c: DistArray<f64> = DistArray::new(&world, trange);
        a.fill_local_with(|idx| (idx[0] * 10 + idx[1]) as f64);
        world.fence();

        c.annotate("i,j")
            .unwrap()
            .assign(2.0 * a.annotate("j,i").unwrap())
            .unwrap();

        let result = gather_matrix(&c, 3);
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(result[i * 3 + j], 2.0 * (j * 10 + i) as f64);
            }
        }
        world.fence();
    });
}

/// Ownership reversed relative to the default cyclic map.
struct ReverseMap {
    size: usize,
}

impl ProcessMap for ReverseMap {
    fn owner(&self, ordinal: usize) -> usize {
        self.size - 1 - (ordinal % self.size)
    }
}

#[test]
fn distribution_round_trip() {
    // b(idx) = a(idx) where b lives under a different process map: every
    // tile of a appears in b with identical content, owned per b's map.
    WorldGroup::run(2, |world| {
        let trange = square_trange(&[0, 2, 4, 6], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let p2: Arc<dyn ProcessMap> = Arc::new(ReverseMap { size: world.size() });
        let b: DistArray<f64> =
            DistArray::with_parts(&world, trange, Shape::Dense, Arc::clone(&p2)).unwrap();
        a.fill_local_with(|idx| (idx[0] * 7 + idx[1]) as f64);
        world.fence();

        b.annotate("i,j")
            .unwrap()
            .assign(a.annotate("i,j").unwrap())
            .unwrap();

        for ordinal in 0..b.trange().tile_volume() {
            assert_eq!(b.owner(ordinal), p2.owner(ordinal));
            let ta = a.find(ordinal).unwrap().wait().unwrap();
            let tb = b.find(ordinal).unwrap().wait().unwrap();
            assert_eq!(ta, tb);
            // The owner under the new map holds the buffer locally.
            if b.is_local(ordinal) {
                assert!(b.store().probe(ordinal).wait().unwrap());
            }
        }
        world.fence();
    });
}

#[test]
fn evaluator_is_deterministic() {
    // Same inputs, same process map: two evaluations produce
    // bit-identical tiles.
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 3, 5, 9], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let b: DistArray<f64> = DistArray::new(&world, trange.clone());
        a.fill_local_with(|idx| 1.0 / (1.0 + (idx[0] * 9 + idx[1]) as f64));
        b.fill_local_with(|idx| ((idx[0] * 3) as f64).sin() + idx[1] as f64);
        world.fence();

        let run = |world: &World| -> Vec<f64> {
            let c: DistArray<f64> = DistArray::new(world, square_trange(&[0, 3, 5, 9], 2));
            c.annotate("m,n")
                .unwrap()
                .assign(a.annotate("m,i").unwrap() * b.annotate("i,n").unwrap())
                .unwrap();
            gather_matrix(&c, 9)
        };

        let first = run(&world);
        let second = run(&world);
        assert!(first
            .iter()
            .zip(&second)
            .all(|(x, y)| x.to_bits() == y.to_bits()));
    });
}

#[test]
fn composite_expression() {
    // c("i,j") = a("i,j") * 2 + b("j,i") - a("i,j")
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 2, 4], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let b: DistArray<f64> = DistArray::new(&world, trange.clone());
        let c: DistArray<f64> = DistArray::new(&world, trange);
        a.fill_local_with(|idx| (idx[0] * 4 + idx[1]) as f64);
        b.fill_local_with(|idx| (idx[0] * 100 + idx[1]) as f64);
        world.fence();

        let expr = a.annotate("i,j").unwrap() * 2.0 + b.annotate("j,i").unwrap()
            - a.annotate("i,j").unwrap();
        c.annotate("i,j").unwrap().assign(expr).unwrap();

        let result = gather_matrix(&c, 4);
        for i in 0..4 {
            for j in 0..4 {
                let expected =
                    2.0 * (i * 4 + j) as f64 + (j * 100 + i) as f64 - (i * 4 + j) as f64;
                assert_abs_diff_eq!(result[i * 4 + j], expected);
            }
        }
    });
}

#[test]
fn complex_contraction_with_prefactor() {
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 2, 4], 2);
        let a: DistArray<Complex64> = DistArray::new(&world, trange.clone());
        let b: DistArray<Complex64> = DistArray::new(&world, trange.clone());
        let c: DistArray<Complex64> = DistArray::new(&world, trange);
        // a = i on the diagonal, b = all ones.
        a.fill_local_with(|idx| {
            if idx[0] == idx[1] {
                Complex64::new(0.0, 1.0)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });
        b.fill_local_with(|_| Complex64::new(1.0, 0.0));
        world.fence();

        let alpha = Complex64::new(0.0, 1.0);
        c.annotate("m,n")
            .unwrap()
            .assign(alpha * (a.annotate("m,i").unwrap() * b.annotate("i,n").unwrap()))
            .unwrap();

        // i * (i * ones) = -ones.
        for ordinal in 0..4 {
            let tile = c.find(ordinal).unwrap().wait().unwrap();
            for &v in tile.data() {
                assert_abs_diff_eq!(v.re, -1.0);
                assert_abs_diff_eq!(v.im, 0.0);
            }
        }
    });
}

#[test]
fn norms_reduce_across_ranks() {
    // Per-rank partial squared norms folded through the collective
    // reduction match a single-rank evaluation.
    let totals = WorldGroup::run(3, |world| {
        let trange = square_trange(&[0, 2, 4, 6], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange);
        a.fill_local_with(|idx| (idx[0] + 2 * idx[1]) as f64);
        world.fence();

        let mut local = 0.0;
        a.store().for_each_local(|_, tile| {
            local += tile.squared_norm();
        });
        let total = world.all_reduce(local, |x, y| x + y);
        world.fence();
        total
    });

    let mut expected = 0.0;
    for i in 0..6 {
        for j in 0..6 {
            let v = (i + 2 * j) as f64;
            expected += v * v;
        }
    }
    for total in totals {
        assert_abs_diff_eq!(total, expected);
    }
}

#[test]
fn single_tile_arrays_contract() {
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 1], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let b: DistArray<f64> = DistArray::new(&world, trange.clone());
        let c: DistArray<f64> = DistArray::new(&world, trange);
        a.set_all_local(3.0);
        b.set_all_local(4.0);
        world.fence();

        c.annotate("i,k")
            .unwrap()
            .assign(a.annotate("i,j").unwrap() * b.annotate("j,k").unwrap())
            .unwrap();

        assert_eq!(c.find(0).unwrap().wait().unwrap().get(&[0, 0]), 12.0);
    });
}

#[test]
fn zero_rank_tiled_range_is_rejected() {
    assert!(TiledRange::new(vec![]).is_err());
}

#[test]
fn round_trip_permutation_recovers_input() {
    // a(idx) = b(idx'), then b(idx') = a(idx) recovers b.
    WorldGroup::run_single(|world| {
        let trange = square_trange(&[0, 2, 4], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange.clone());
        let b: DistArray<f64> = DistArray::new(&world, trange.clone());
        let b2: DistArray<f64> = DistArray::new(&world, trange);
        b.fill_local_with(|idx| (idx[0] * 13 + idx[1]) as f64);
        world.fence();

        a.annotate("i,j")
            .unwrap()
            .assign(b.annotate("j,i").unwrap())
            .unwrap();
        b2.annotate("j,i")
            .unwrap()
            .assign(a.annotate("i,j").unwrap())
            .unwrap();

        let orig = gather_matrix(&b, 4);
        let round = gather_matrix(&b2, 4);
        assert_eq!(orig, round);
    });
}

#[test]
fn random_sparse_contraction_matches_dense_reference() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    // Seeded generation keeps every rank's view of the inputs identical.
    let mut rng = StdRng::seed_from_u64(7);
    let nz_a: Vec<usize> = (0..9).filter(|_| rng.gen_bool(0.6)).collect();
    let nz_b: Vec<usize> = (0..9).filter(|_| rng.gen_bool(0.6)).collect();
    let va: Vec<f64> = (0..36).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let vb: Vec<f64> = (0..36).map(|_| rng.gen_range(-1.0..1.0)).collect();

    // Dense reference with structurally zero tiles blanked out.
    let tile_of = |i: usize, j: usize| (i / 2) * 3 + j / 2;
    let da = |i: usize, j: usize| {
        if nz_a.contains(&tile_of(i, j)) {
            va[i * 6 + j]
        } else {
            0.0
        }
    };
    let db = |i: usize, j: usize| {
        if nz_b.contains(&tile_of(i, j)) {
            vb[i * 6 + j]
        } else {
            0.0
        }
    };

    for ranks in [1, 2] {
        let nz_a = nz_a.clone();
        let nz_b = nz_b.clone();
        let va = va.clone();
        let vb = vb.clone();
        WorldGroup::run(ranks, move |world| {
            let trange = square_trange(&[0, 2, 4, 6], 2);
            let a: DistArray<f64> = DistArray::with_shape(
                &world,
                trange.clone(),
                Shape::from_nonzeros(9, nz_a.iter().copied()),
            )
            .unwrap();
            let b: DistArray<f64> = DistArray::with_shape(
                &world,
                trange.clone(),
                Shape::from_nonzeros(9, nz_b.iter().copied()),
            )
            .unwrap();
            let c: DistArray<f64> = DistArray::new(&world, trange);
            a.fill_local_with(|idx| va[idx[0] * 6 + idx[1]]);
            b.fill_local_with(|idx| vb[idx[0] * 6 + idx[1]]);
            world.fence();

            c.annotate("i,k")
                .unwrap()
                .assign(a.annotate("i,j").unwrap() * b.annotate("j,k").unwrap())
                .unwrap();

            let result = gather_matrix(&c, 6);
            for i in 0..6 {
                for k in 0..6 {
                    let expected: f64 = (0..6).map(|j| da(i, j) * db(j, k)).sum();
                    assert_abs_diff_eq!(result[i * 6 + k], expected, epsilon = 1e-12);
                }
            }
            world.fence();
        });
    }
}

#[test]
fn cyclic_is_the_default_distribution() {
    WorldGroup::run(2, |world| {
        let trange = square_trange(&[0, 2, 4], 2);
        let a: DistArray<f64> = DistArray::new(&world, trange);
        let cyclic = CyclicMap::new(world.size());
        for ordinal in 0..4 {
            assert_eq!(a.owner(ordinal), cyclic.owner(ordinal));
        }
        world.fence();
    });
}
