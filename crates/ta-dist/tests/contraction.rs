//! Multi-process contraction scenarios run on an in-process group.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ta_dist::{
    ArrayEval, ContractionEval, ContractionMetadata, ContractionStats, DistArray, DistError,
    DistEval, ErrorKind, EvalStatus, Pmap, ProcGrid, Shape, SparseShape, TiledRange, TiledRange1,
};
use ta_runtime::{Cluster, RuntimeConfig, RuntimeError, World};
use ta_tensor::{GemmHelper, Permutation, Range, Tensor, TensorError, Tile};

fn config(nprocs: usize) -> RuntimeConfig {
    RuntimeConfig::with_nprocs(nprocs).wait_timeout(Duration::from_secs(30))
}

fn tiling(bounds: &[usize]) -> TiledRange1 {
    TiledRange1::new(bounds.to_vec()).unwrap()
}

fn matrix_tiling(rows: &[usize], cols: &[usize]) -> TiledRange {
    TiledRange::new(vec![tiling(rows), tiling(cols)])
}

/// A blocked array filled from a seeded generator, plus its full element
/// data in row-major order with zero tiles zeroed.
fn random_array(
    world: &World,
    trange: TiledRange,
    mask: Option<&[bool]>,
    seed: u64,
) -> (DistArray<Tensor<i32>>, Vec<i32>) {
    let elements = trange.elements_range().clone();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut values: Vec<i32> = (0..elements.volume()).map(|_| rng.gen_range(0..27)).collect();

    let tiles = trange.tiles_range().clone();
    let shape = match mask {
        Some(mask) => Shape::from(SparseShape::from_mask(tiles, mask).unwrap()),
        None => Shape::dense(tiles),
    };
    for (ord, c) in elements.coords().enumerate() {
        let tile = trange.element_to_tile(&c).unwrap();
        if shape.is_zero(tile) {
            values[ord] = 0;
        }
    }

    let pmap = Pmap::blocked(world.rank(), world.size(), trange.volume()).unwrap();
    let array = DistArray::new(world, trange, shape, pmap).unwrap();
    array
        .init_tiles(|_, range| Tensor::from_fn(range, |c| values[elements.ordinal(c)]))
        .unwrap();
    (array, values)
}

fn matmul(a: &[i32], b: &[i32], m: usize, k: usize, n: usize) -> Vec<i32> {
    let mut c = vec![0; m * n];
    for i in 0..m {
        for p in 0..k {
            for j in 0..n {
                c[i * n + j] += a[i * k + p] * b[p * n + j];
            }
        }
    }
    c
}

/// Every local nonzero tile is resolved and matches `expected` element-wise.
fn tiles_match(eval: &DistEval<Tensor<i32>>, expected: impl Fn(&[usize]) -> i32) -> bool {
    eval.local_tiles().into_iter().all(|i| {
        let Some(tile) = eval.get(i).unwrap().try_get() else {
            return false;
        };
        tile.range() == &eval.range(i)
            && tile
                .range()
                .coords()
                .all(|c| tile.at(&c).unwrap() == expected(&c))
    })
}

fn gemm2() -> ContractionMetadata<i32> {
    ContractionMetadata::new(GemmHelper::new(2, 2, 2).unwrap())
}

fn sum_stats(stats: &[ContractionStats]) -> ContractionStats {
    stats.iter().fold(ContractionStats::default(), |acc, s| ContractionStats {
        contract_tasks: acc.contract_tasks + s.contract_tasks,
        skipped_phases: acc.skipped_phases + s.skipped_phases,
        left_fetches: acc.left_fetches + s.left_fetches,
        right_fetches: acc.right_fetches + s.right_fetches,
        forwarded_tiles: acc.forwarded_tiles + s.forwarded_tiles,
    })
}

/// Integer tile whose accumulation always fails.
#[derive(Debug, Clone)]
struct RefusingTile(Tensor<i32>);

impl Tile for RefusingTile {
    type Scalar = i32;

    fn range(&self) -> &Range {
        self.0.range()
    }

    fn zeros(range: Range) -> Self {
        RefusingTile(Tensor::zeros(range))
    }

    fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    fn norm(&self) -> f64 {
        self.0.norm()
    }

    fn contract(
        &self,
        right: &Self,
        helper: &GemmHelper,
        factor: i32,
    ) -> Result<Self, TensorError> {
        Ok(RefusingTile(self.0.contract(&right.0, helper, factor)?))
    }

    fn accumulate(&mut self, _partial: &Self) -> Result<(), TensorError> {
        Err(TensorError::Other("accumulate refused".to_string()))
    }

    fn scale(&self, factor: i32) -> Self {
        RefusingTile(self.0.scale(factor))
    }

    fn permute(&self, perm: &Permutation) -> Result<Self, TensorError> {
        Ok(RefusingTile(self.0.permute(perm)?))
    }
}

#[test]
fn dense_contraction_matches_reference() {
    for nprocs in 1..=4 {
        let out = Cluster::run(config(nprocs), |w| {
            let rows = [0, 2, 5, 7];
            let inner = [0, 1, 4, 5, 8];
            let cols = [0, 3, 4, 6];
            let (a, av) = random_array(w, matrix_tiling(&rows, &inner), None, 11);
            let (b, bv) = random_array(w, matrix_tiling(&inner, &cols), None, 12);
            let reference = matmul(&av, &bv, 7, 8, 6);

            let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, gemm2()).unwrap().into();
            assert!(c.shape().is_dense());
            assert_eq!(c.trange(), &matrix_tiling(&rows, &cols));
            c.eval().unwrap();
            c.wait().unwrap();
            assert_eq!(c.status(), EvalStatus::Complete);
            assert_eq!(c.pending(), 0);
            tiles_match(&c, |e| reference[e[0] * 6 + e[1]])
        })
        .unwrap();
        assert!(out.iter().all(|&ok| ok), "nprocs = {}", nprocs);
    }
}

#[test]
fn rank3_operands_contract_two_modes() {
    let out = Cluster::run(config(3), |w| {
        let (d0, d1, d2) = (tiling(&[0, 2, 5]), tiling(&[0, 3, 4]), tiling(&[0, 1, 3]));
        let left = TiledRange::new(vec![d0.clone(), d1.clone(), d2.clone()]);
        let right = TiledRange::new(vec![d1, d2, d0]);
        let (a, av) = random_array(w, left, None, 3);
        let (b, bv) = random_array(w, right, None, 4);
        // Element matrices: 5 x (4 * 3) and (4 * 3) x 5.
        let reference = matmul(&av, &bv, 5, 12, 5);

        let meta = ContractionMetadata::new(GemmHelper::new(2, 3, 3).unwrap());
        let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, meta).unwrap().into();
        c.eval().unwrap();
        c.wait().unwrap();
        tiles_match(&c, |e| reference[e[0] * 5 + e[1]])
    })
    .unwrap();
    assert_eq!(out, vec![true; 3]);
}

#[test]
fn task_count_equals_nonzero_phase_pairs() {
    let (m, k, n) = (4, 5, 3);
    let mut rng = StdRng::seed_from_u64(7);
    let left_mask: Vec<bool> = (0..m * k).map(|_| rng.gen_bool(0.6)).collect();
    let right_mask: Vec<bool> = (0..k * n).map(|_| rng.gen_bool(0.6)).collect();
    let mut pairs = 0;
    for i in 0..m {
        for p in 0..k {
            for j in 0..n {
                if left_mask[i * k + p] && right_mask[p * n + j] {
                    pairs += 1;
                }
            }
        }
    }

    let out = Cluster::run(config(4), |w| {
        let rows = [0, 1, 3, 4, 6];
        let inner = [0, 2, 3, 5, 6, 8];
        let cols = [0, 2, 3, 5];
        let (a, av) = random_array(w, matrix_tiling(&rows, &inner), Some(left_mask.as_slice()), 21);
        let (b, bv) = random_array(w, matrix_tiling(&inner, &cols), Some(right_mask.as_slice()), 22);
        let reference = matmul(&av, &bv, 6, 8, 5);

        let c = DistEval::from(ContractionEval::from_arrays(&a, &b, gemm2()).unwrap());
        c.eval().unwrap();
        c.wait().unwrap();
        let ok = tiles_match(&c, |e| reference[e[0] * 5 + e[1]]);
        let DistEval::Contraction(inner) = &c else {
            unreachable!()
        };
        (inner.stats(), ok)
    })
    .unwrap();

    let stats: Vec<ContractionStats> = out.iter().map(|(s, _)| *s).collect();
    assert!(out.iter().all(|(_, ok)| *ok));
    assert_eq!(sum_stats(&stats).contract_tasks, pairs);
}

#[test]
fn owner_is_deterministic_across_processes() {
    let out = Cluster::run(config(4), |w| {
        let grid = ProcGrid::new(w.rank(), w.size(), 5, 7, 50, 70).unwrap();
        let maps = [
            grid.make_pmap().unwrap(),
            grid.make_row_phase_pmap(3).unwrap(),
            grid.make_col_phase_pmap(3).unwrap(),
            Pmap::blocked(w.rank(), w.size(), 35).unwrap(),
        ];
        let owners: Vec<Vec<usize>> = maps
            .iter()
            .map(|p| (0..p.size()).map(|i| p.owner(i)).collect())
            .collect();
        let again: Vec<Vec<usize>> = maps
            .iter()
            .map(|p| (0..p.size()).map(|i| p.owner(i)).collect())
            .collect();
        assert_eq!(owners, again);
        // Local tiles agree with the owner function.
        for p in &maps {
            assert!(p.local_tiles().all(|&i| p.owner(i) == w.rank()));
        }
        owners
    })
    .unwrap();
    assert!(out.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn identity_array_eval_is_bit_identical() {
    let out = Cluster::run(config(2), |w| {
        let trange = matrix_tiling(&[0, 3, 4, 7], &[0, 2, 5]);
        let a = DistArray::<Tensor<f64>>::dense(w, trange).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        a.init_tiles(|_, range| Tensor::from_fn(range, |_| rng.gen::<f64>() * 1e3 - 5e2))
            .unwrap();
        let e: DistEval<_> = ArrayEval::identity(a.clone()).unwrap().into();
        e.eval().unwrap();
        e.wait().unwrap();
        e.local_tiles().into_iter().all(|i| {
            let got = e.get(i).unwrap().get(w).unwrap();
            let stored = a.find(i).unwrap().get(w).unwrap();
            got.range() == stored.range()
                && got
                    .data()
                    .iter()
                    .zip(stored.data())
                    .all(|(x, y)| x.to_bits() == y.to_bits())
        })
    })
    .unwrap();
    assert_eq!(out, vec![true, true]);
}

#[test]
fn two_by_two_times_identity_gives_left() {
    let out = Cluster::run(config(2), |w| {
        let trange = matrix_tiling(&[0, 2, 4], &[0, 2, 4]);
        let block = [1, 2, 3, 4];
        let left = DistArray::<Tensor<i32>>::dense(w, trange.clone()).unwrap();
        left.init_tiles(|_, range| Tensor::new(range, block.to_vec()))
            .unwrap();

        // Identity: diagonal tiles are identity blocks, the rest are zero.
        let mask = [true, false, false, true];
        let shape = SparseShape::from_mask(trange.tiles_range().clone(), &mask).unwrap();
        let pmap = Pmap::blocked(w.rank(), w.size(), 4).unwrap();
        let right = DistArray::new(w, trange, shape.into(), pmap).unwrap();
        right
            .init_tiles(|_, range| {
                let lo = range.lobound().to_vec();
                Tensor::from_fn(range, |c| i32::from(c[0] - lo[0] == c[1] - lo[1]))
            })
            .unwrap();

        let c: DistEval<_> = ContractionEval::from_arrays(&left, &right, gemm2())
            .unwrap()
            .into();
        c.eval().unwrap();
        c.wait().unwrap();
        assert_eq!(c.shape().nonzero_count(), 4);
        c.local_tiles()
            .into_iter()
            .all(|i| c.get(i).unwrap().try_get().map(|t| t.data().to_vec()) == Some(block.to_vec()))
    })
    .unwrap();
    assert_eq!(out, vec![true, true]);
}

#[test]
fn zero_row_panel_schedules_no_tasks_for_its_row() {
    let (m, k, n) = (3, 3, 3);
    // Row panel 1 of the left operand is structurally zero.
    let left_mask: Vec<bool> = (0..m * k).map(|i| i / k != 1).collect();

    let out = Cluster::run(config(3), |w| {
        let rows = [0, 2, 4, 6];
        let (a, av) = random_array(w, matrix_tiling(&rows, &rows), Some(left_mask.as_slice()), 31);
        let (b, bv) = random_array(w, matrix_tiling(&rows, &rows), None, 32);
        let reference = matmul(&av, &bv, 6, 6, 6);

        let c = ContractionEval::from_arrays(&a, &b, gemm2()).unwrap();
        let c = DistEval::from(c);
        assert!((0..n).all(|j| c.is_zero(n + j)));
        assert!((0..n).all(|j| !c.is_zero(j) && !c.is_zero(2 * n + j)));
        assert_eq!(c.shape().nonzero_count(), 6);
        assert_eq!(
            c.get(n).unwrap_err(),
            if c.pmap().is_local(n) {
                DistError::ZeroTile(n)
            } else {
                DistError::NonLocalTile {
                    index: n,
                    rank: w.rank(),
                }
            }
        );
        c.eval().unwrap();
        c.wait().unwrap();
        let ok = tiles_match(&c, |e| reference[e[0] * 6 + e[1]]);
        let DistEval::Contraction(inner) = &c else {
            unreachable!()
        };
        (inner.stats(), ok)
    })
    .unwrap();

    let stats: Vec<ContractionStats> = out.iter().map(|(s, _)| *s).collect();
    assert!(out.iter().all(|(_, ok)| *ok));
    let total = sum_stats(&stats);
    // Rows 0 and 2 each need every phase for every column.
    assert_eq!(total.contract_tasks, 2 * k * n);
    assert_eq!(total.skipped_phases, 0);
}

#[test]
fn permuted_result_is_transpose() {
    let out = Cluster::run(config(3), |w| {
        let rows = [0, 2, 5];
        let inner = [0, 3, 4];
        let cols = [0, 1, 3, 6];
        let (a, av) = random_array(w, matrix_tiling(&rows, &inner), None, 41);
        let (b, bv) = random_array(w, matrix_tiling(&inner, &cols), None, 42);
        let reference = matmul(&av, &bv, 5, 4, 6);

        let meta = gemm2().with_perm(Permutation::new(vec![1, 0]).unwrap());
        let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, meta).unwrap().into();
        assert_eq!(c.trange(), &matrix_tiling(&cols, &rows));
        c.eval().unwrap();
        c.wait().unwrap();
        tiles_match(&c, |e| reference[e[1] * 6 + e[0]])
    })
    .unwrap();
    assert_eq!(out, vec![true; 3]);
}

#[test]
fn inner_mismatch_is_a_configuration_error() {
    Cluster::run(config(2), |w| {
        let a = DistArray::<Tensor<i32>>::dense(w, matrix_tiling(&[0, 2, 4], &[0, 1, 4])).unwrap();
        let b = DistArray::<Tensor<i32>>::dense(w, matrix_tiling(&[0, 2, 4], &[0, 3])).unwrap();
        let err = ContractionEval::from_arrays(&a, &b, gemm2()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(matches!(err, DistError::InnerExtentMismatch { dim: 0, .. }));

        let meta = ContractionMetadata::new(GemmHelper::new(2, 3, 1).unwrap());
        let err = ContractionEval::from_arrays(&a, &b, meta).unwrap_err();
        assert_eq!(err, DistError::RankMismatch { expected: 3, got: 2 });
    })
    .unwrap();
}

#[test]
fn precondition_violations_are_reported() {
    Cluster::run(config(2), |w| {
        let tr = matrix_tiling(&[0, 2, 4], &[0, 2, 4]);
        let (a, _) = random_array(w, tr.clone(), None, 51);
        let (b, _) = random_array(w, tr, None, 52);
        let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, gemm2()).unwrap().into();

        let err = c.wait().unwrap_err();
        assert_eq!(err, DistError::NotEvaluated);
        assert_eq!(err.kind(), ErrorKind::Precondition);

        let remote = (0..c.size()).find(|&i| !c.pmap().is_local(i)).unwrap();
        let err = c.get(remote).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);

        c.eval().unwrap();
        assert_eq!(c.eval().unwrap_err(), DistError::AlreadyEvaluated);
        c.wait().unwrap();
        // A completed evaluator may be waited on again.
        c.wait().unwrap();
    })
    .unwrap();
}

#[test]
fn blocked_result_pmap_forwards_tiles() {
    let out = Cluster::run(config(4), |w| {
        let rows = [0, 2, 3, 5, 6];
        let inner = [0, 2, 4];
        let cols = [0, 1, 3, 4, 6, 7];
        let (a, av) = random_array(w, matrix_tiling(&rows, &inner), None, 61);
        let (b, bv) = random_array(w, matrix_tiling(&inner, &cols), None, 62);
        let reference = matmul(&av, &bv, 6, 4, 7);

        let grid = ProcGrid::new(w.rank(), w.size(), 4, 5, 6, 7).unwrap();
        let left = ArrayEval::new(a, grid.make_row_phase_pmap(2).unwrap(), Permutation::identity(2))
            .unwrap();
        let right =
            ArrayEval::new(b, grid.make_col_phase_pmap(2).unwrap(), Permutation::identity(2))
                .unwrap();
        let result = matrix_tiling(&rows, &cols);
        let shape = Shape::dense(result.tiles_range().clone());
        let pmap = Pmap::blocked(w.rank(), w.size(), 20).unwrap();

        let mut expected_forwards = 0;
        for m in 0..4 {
            for n in 0..5 {
                let computed_on = grid.rank_of(m % grid.proc_rows(), n % grid.proc_cols());
                if pmap.owner(m * 5 + n) != computed_on {
                    expected_forwards += 1;
                }
            }
        }

        let c = ContractionEval::new(
            DistEval::Array(left),
            DistEval::Array(right),
            grid,
            gemm2(),
            shape,
            pmap,
        )
        .unwrap();
        let c = DistEval::from(c);
        c.eval().unwrap();
        c.wait().unwrap();
        let ok = tiles_match(&c, |e| reference[e[0] * 7 + e[1]]);
        let DistEval::Contraction(inner) = &c else {
            unreachable!()
        };
        (inner.stats(), expected_forwards, ok)
    })
    .unwrap();

    let stats: Vec<ContractionStats> = out.iter().map(|(s, _, _)| *s).collect();
    assert!(out.iter().all(|(_, _, ok)| *ok));
    assert_eq!(sum_stats(&stats).forwarded_tiles, out[0].1);
}

#[test]
fn nested_contraction_feeds_outer_grid() {
    let out = Cluster::run(config(4), |w| {
        let (r, p, q, s) = ([0, 2, 4, 5], [0, 3, 4], [0, 1, 3, 4], [0, 2, 6]);
        let (a, av) = random_array(w, matrix_tiling(&r, &p), None, 71);
        let (b, bv) = random_array(w, matrix_tiling(&p, &q), None, 72);
        let (c, cv) = random_array(w, matrix_tiling(&q, &s), None, 73);
        let ab = matmul(&av, &bv, 5, 4, 4);
        let reference = matmul(&ab, &cv, 5, 4, 6);

        // The inner product is distributed as the outer row-phase operand.
        let outer = ProcGrid::new(w.rank(), w.size(), 3, 2, 5, 6).unwrap();
        let inner_grid = ProcGrid::new(w.rank(), w.size(), 3, 3, 5, 4).unwrap();
        let left = ArrayEval::new(
            a,
            inner_grid.make_row_phase_pmap(2).unwrap(),
            Permutation::identity(2),
        )
        .unwrap();
        let right = ArrayEval::new(
            b,
            inner_grid.make_col_phase_pmap(2).unwrap(),
            Permutation::identity(2),
        )
        .unwrap();
        let ab_trange = matrix_tiling(&r, &q);
        let inner = ContractionEval::new(
            DistEval::Array(left),
            DistEval::Array(right),
            inner_grid,
            gemm2(),
            Shape::dense(ab_trange.tiles_range().clone()),
            outer.make_row_phase_pmap(3).unwrap(),
        )
        .unwrap();

        let c_eval = ArrayEval::new(
            c,
            outer.make_col_phase_pmap(3).unwrap(),
            Permutation::identity(2),
        )
        .unwrap();
        let result = matrix_tiling(&r, &s);
        let pmap = outer.make_pmap().unwrap();
        let top = DistEval::Contraction(ContractionEval::new(
            DistEval::Contraction(inner),
            DistEval::Array(c_eval),
            outer,
            gemm2(),
            Shape::dense(result.tiles_range().clone()),
            pmap,
        )
        .unwrap());
        top.eval().unwrap();
        top.wait().unwrap();
        let ok = tiles_match(&top, |e| reference[e[0] * 6 + e[1]]);

        let DistEval::Contraction(contraction) = &top else {
            unreachable!()
        };
        let (top_id, inner_id) = match contraction.left() {
            DistEval::Contraction(inner) => (contraction.id(), inner.id()),
            DistEval::Array(_) => unreachable!(),
        };
        assert_eq!(contraction.left().status(), EvalStatus::Complete);
        drop(top);
        w.fence().unwrap();
        ok && !w.is_registered(top_id) && !w.is_registered(inner_id)
    })
    .unwrap();
    assert_eq!(out, vec![true; 4]);
}

#[test]
fn scaled_float_contraction() {
    Cluster::run(config(3), |w| {
        let rows = [0, 3, 5];
        let inner = [0, 2, 3, 6];
        let cols = [0, 4];
        let mut rng = StdRng::seed_from_u64(81);
        let av: Vec<f64> = (0..5 * 6).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let bv: Vec<f64> = (0..6 * 4).map(|_| rng.gen_range(-1.0..1.0)).collect();

        let a = DistArray::<Tensor<f64>>::dense(w, matrix_tiling(&rows, &inner)).unwrap();
        a.init_tiles(|_, range| Tensor::from_fn(range, |c| av[c[0] * 6 + c[1]]))
            .unwrap();
        let b = DistArray::<Tensor<f64>>::dense(w, matrix_tiling(&inner, &cols)).unwrap();
        b.init_tiles(|_, range| Tensor::from_fn(range, |c| bv[c[0] * 4 + c[1]]))
            .unwrap();

        let meta = ContractionMetadata::new(GemmHelper::new(2, 2, 2).unwrap()).with_factor(-0.5);
        let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, meta).unwrap().into();
        c.eval().unwrap();
        c.wait().unwrap();
        for i in c.local_tiles() {
            let tile = c.get(i).unwrap().get(w).unwrap();
            for e in tile.range().coords() {
                let expected: f64 = (0..6).map(|p| av[e[0] * 6 + p] * bv[p * 4 + e[1]]).sum();
                approx::assert_relative_eq!(
                    tile.at(&e).unwrap(),
                    -0.5 * expected,
                    epsilon = 1e-12,
                    max_relative = 1e-12
                );
            }
        }
    })
    .unwrap();
}

#[test]
fn stalled_evaluation_times_out_and_aborts_the_group() {
    let config = RuntimeConfig::with_nprocs(3).wait_timeout(Duration::from_millis(200));
    let result = Cluster::run(config, |w| {
        let tr = matrix_tiling(&[0, 2, 4], &[0, 2, 4]);
        // Rank 0 never stores its tiles of `a`.
        let a = DistArray::<Tensor<i32>>::dense(w, tr.clone()).unwrap();
        if w.rank() != 0 {
            a.init_tiles(|_, range| Tensor::zeros(range)).unwrap();
        }
        let (b, _) = random_array(w, tr, None, 91);
        let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, gemm2()).unwrap().into();
        c.eval().unwrap();
        c.wait().map_err(|e| e.kind())
    });
    assert!(matches!(result, Err(RuntimeError::Aborted { .. })));
}

#[test]
fn unused_panel_tiles_are_never_fetched() {
    let (m, k, n) = (3, 3, 3);
    // Row 1 of the right operand is zero, so phase 1 never contributes.
    let right_mask: Vec<bool> = (0..k * n).map(|i| i / n != 1).collect();

    let out = Cluster::run(config(4), |w| {
        let bounds = [0, 2, 3, 5];
        let (a, av) = random_array(w, matrix_tiling(&bounds, &bounds), None, 101);
        let (b, bv) = random_array(
            w,
            matrix_tiling(&bounds, &bounds),
            Some(right_mask.as_slice()),
            102,
        );
        let reference = matmul(&av, &bv, 5, 5, 5);

        let c = DistEval::Contraction(ContractionEval::from_arrays(&a, &b, gemm2()).unwrap());
        c.eval().unwrap();
        c.wait().unwrap();
        let ok = tiles_match(&c, |e| reference[e[0] * 5 + e[1]]);
        let DistEval::Contraction(contraction) = &c else {
            unreachable!()
        };
        let DistEval::Array(left) = contraction.left() else {
            unreachable!()
        };
        (ok, left.requested_tiles(), contraction.stats())
    })
    .unwrap();

    assert!(out.iter().all(|(ok, _, _)| *ok));
    // Left tiles of column 1 stay in storage; the rest are read once, on
    // their phase home.
    let mut requested: Vec<usize> = out.iter().flat_map(|(_, r, _)| r.clone()).collect();
    requested.sort_unstable();
    let expected: Vec<usize> = (0..m * k).filter(|i| i % k != 1).collect();
    assert_eq!(requested, expected);

    let stats: Vec<ContractionStats> = out.iter().map(|(_, _, s)| *s).collect();
    let total = sum_stats(&stats);
    assert_eq!(total.contract_tasks, 2 * m * n);
    assert_eq!(total.skipped_phases, m * n);
    // Panels still travel along grid rows and columns.
    assert!(total.left_fetches > 0 && total.right_fetches > 0);
}

#[test]
fn failing_accumulation_aborts_the_group() {
    let kinds = Mutex::new(Vec::new());
    let result = Cluster::run(config(2), |w| {
        let tr = matrix_tiling(&[0, 2, 4], &[0, 2, 4]);
        let a = DistArray::<RefusingTile>::dense(w, tr.clone()).unwrap();
        let b = DistArray::<RefusingTile>::dense(w, tr).unwrap();
        for array in [&a, &b] {
            array
                .init_tiles(|_, range| RefusingTile(Tensor::from_fn(range, |_| 1)))
                .unwrap();
        }
        let c: DistEval<_> = ContractionEval::from_arrays(&a, &b, gemm2()).unwrap().into();
        c.eval().unwrap();
        if let Err(e) = c.wait() {
            kinds.lock().unwrap().push(e.kind());
        }
    });
    match result {
        Err(RuntimeError::Aborted { reason, .. }) => {
            assert!(reason.contains("accumulate refused"), "{}", reason)
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(
        kinds.into_inner().unwrap(),
        vec![ErrorKind::RuntimeTask; 2]
    );
}
