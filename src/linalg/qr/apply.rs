use crate::{
    desc::{Tile, TileDesc},
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut, FlatRef},
    linalg::{
        admit, check_flat_arg, illegal_argument, qr::compute::factor_shape_is_valid,
        HouseholderFactor,
    },
    sched::{Access, Region},
    sequence::{Request, Sequence},
    tree::{qr_replays_in_reverse, TreeOp, TreePlan},
    Context, Side, Trans,
};

/// Tile `(k, l)` of the operand as seen by the reflectors of row tile `k` of the factorized
/// matrix: `b(k, l)` on the left, `b(l, k)` on the right.
pub(crate) fn operand_tile<E>(side: Side, b: &TileDesc<E>, k: usize, l: usize) -> Tile<E> {
    match side {
        Side::Left => b.tile(k, l),
        Side::Right => b.tile(l, k),
    }
}

/// Number of tiles touched by one elimination in the operand.
pub(crate) fn operand_width<E>(side: Side, b: &TileDesc<E>) -> usize {
    match side {
        Side::Left => b.nt(),
        Side::Right => b.mt(),
    }
}

/// Overwrites `b` with $QB$, $Q^\top B$, $BQ$ or $BQ^\top$, where $Q$ is the orthogonal factor
/// of the QR factorization stored in `a` and `t`, computed with `plan`.
///
/// The operand is conformant with $Q$: on the left, `b` must have as many rows as `a` with the
/// same row tiling. On the right, its columns must match the rows of `a` instead.
pub fn unmqr_tree<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    side: Side,
    trans: Trans,
    plan: &TreePlan,
    a: &TileDesc<E>,
    t: &TileDesc<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let conformant = b.check().is_ok()
        && match side {
            Side::Left => b.m() == a.m() && b.mb() == a.mb(),
            Side::Right => b.n() == a.m() && b.nb() == a.mb(),
        };
    if !admit(
        sequence,
        request,
        factor_shape_is_valid(a, t) && conformant,
        Error::IllegalValue,
        "unmqr: incompatible descriptors",
    ) {
        return;
    }
    if let Err(err) = plan.validate(a.mt(), a.nt()) {
        sequence.fail(request, err);
        return;
    }

    let kernels = ctx.kernels();
    let ib = t.mb();
    let nt = a.nt();
    let width = operand_width(side, b);

    for op in plan.replay(qr_replays_in_reverse(side, trans)) {
        log::trace!("unmqr: {op:?}");
        match *op {
            TreeOp::Ge { j, k } => {
                let akj = a.tile(k, j);
                let tkj = t.tile(k, j);
                for l in 0..width {
                    let bk = operand_tile(side, b, k, l);
                    let (akj, tkj) = (akj.clone(), tkj.clone());
                    region.submit(
                        "unmqr",
                        &[
                            Access::read(akj.key()),
                            Access::read(tkj.key()),
                            Access::read_write(bk.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.unmqr(side, trans, ib, akj.as_ref(), tkj.as_ref(), bk.as_mut())
                        },
                    );
                }
            }
            TreeOp::Tt { j, k, kpiv } | TreeOp::Ts { j, k, kpiv } => {
                let triangle = matches!(op, TreeOp::Tt { .. });
                let akj = a.tile(k, j);
                let tkj = t.tile(k, j + nt);
                for l in 0..width {
                    let bp = operand_tile(side, b, kpiv, l);
                    let bk = operand_tile(side, b, k, l);
                    let (akj, tkj) = (akj.clone(), tkj.clone());
                    region.submit(
                        if triangle { "ttmqr" } else { "tsmqr" },
                        &[
                            Access::read_write(bp.key()),
                            Access::read_write(bk.key()),
                            Access::read(akj.key()),
                            Access::read(tkj.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            let (b1, b2, v, t) = (bp.as_mut(), bk.as_mut(), akj.as_ref(), tkj.as_ref());
                            if triangle {
                                kernels.ttmqr(side, trans, ib, b1, b2, v, t)
                            } else {
                                kernels.tsmqr(side, trans, ib, b1, b2, v, t)
                            }
                        },
                    );
                }
            }
        }
    }
}

/// Applies the orthogonal factor of a QR factorization computed by
/// [`geqrf_tile`](super::compute::geqrf_tile).
///
/// See [`unmqr_tree`].
#[inline]
pub fn unmqr_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    side: Side,
    trans: Trans,
    a: &TileDesc<E>,
    factor: &HouseholderFactor<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    unmqr_tree(ctx, region, side, trans, factor.plan(), a, factor.t(), b, sequence, request)
}

/// Overwrites the `m×n` matrix stored in `b` with $\text{op}(Q)B$ or $B\text{op}(Q)$, where $Q$
/// is the orthogonal factor returned by [`geqrf`](super::compute::geqrf) for the `nq×k` matrix
/// stored in `a`, with `nq = m` on the left and `nq = n` on the right. `factor` must have been
/// computed for a matrix of that shape.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with the position of the first invalid argument, counting `side`
/// as `1` and `ldb` as `10`.
pub fn unmqr<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    side: Side,
    trans: Trans,
    m: usize,
    n: usize,
    k: usize,
    a: &[E],
    lda: usize,
    factor: &HouseholderFactor<E>,
    b: &mut [E],
    ldb: usize,
) -> Result<()> {
    let nq = match side {
        Side::Left => m,
        Side::Right => n,
    };
    check_flat_arg(a, nq, k, lda, 6, 7)?;
    if factor.shape() != (nq, k) {
        return Err(illegal_argument(8, "factor"));
    }
    check_flat_arg(b, m, n, ldb, 9, 10)?;
    if Ord::min(Ord::min(m, n), k) == 0 {
        return Ok(());
    }

    let nb = factor.nb();
    let a_desc = TileDesc::general(nb, nb, nq, k)?;
    let b_desc = TileDesc::general(nb, nb, m, n)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatRef::new(a, nq, k, lda)?;
        let b = FlatMut::new(b, m, n, ldb)?;
        ctx.region(|region| {
            ge2desc(region, a, &a_desc, &sequence, &request);
            ge2desc(region, b.as_ref(), &b_desc, &sequence, &request);
            unmqr_tile(ctx, region, side, trans, &a_desc, factor, &b_desc, &sequence, &request);
            desc2ge(region, &b_desc, &b, &sequence, &request);
        });
    }
    sequence.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        kernel::NativeKernels,
        linalg::{qr::compute::geqrf, test_utils::*},
        mat::{TileMut, TileRef},
        Parallelism,
    };
    use assert_approx_eq::assert_approx_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx(nb: usize, ib: usize, parallelism: Parallelism) -> Context {
        Context::builder()
            .tile_size(nb)
            .inner_block_size(ib)
            .parallelism(parallelism)
            .build()
            .unwrap()
    }

    #[test]
    fn application_and_transpose_cancel_out() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let ctx = ctx(3, 2, parallelism);
            let (m, k) = (11, 7);
            let mut a = random(m, k);
            let factor = geqrf(&ctx, m, k, &mut a, m).unwrap();

            for side in [Side::Left, Side::Right] {
                let (bm, bn) = match side {
                    Side::Left => (m, 5),
                    Side::Right => (4, m),
                };
                let b0 = random(bm, bn);
                let mut b = b0.clone();
                unmqr(&ctx, side, Trans::NoTrans, bm, bn, k, &a, m, &factor, &mut b, bm).unwrap();
                let changed = b.iter().zip(&b0).any(|(x, y)| (x - y).abs() > 1e-6);
                assert!(changed);
                unmqr(&ctx, side, Trans::ConjTrans, bm, bn, k, &a, m, &factor, &mut b, bm).unwrap();
                for (x, y) in b.iter().zip(&b0) {
                    assert_approx_eq!(x, y, 1e-10);
                }
            }
        }
    }

    #[test]
    fn right_application_matches_left_application_of_the_transpose() {
        let ctx = ctx(4, 2, Parallelism::Rayon(0));
        let (m, k) = (13, 5);
        let mut a = random(m, k);
        let factor = geqrf(&ctx, m, k, &mut a, m).unwrap();

        let nr = 3;
        let c = random(nr, m);
        let mut ct = vec![0.0; m * nr];
        for j in 0..m {
            for i in 0..nr {
                ct[j + i * m] = c[i + j * nr];
            }
        }

        // c q = (q^T c^T)^T
        let mut right = c.clone();
        unmqr(&ctx, Side::Right, Trans::NoTrans, nr, m, k, &a, m, &factor, &mut right, nr).unwrap();
        unmqr(&ctx, Side::Left, Trans::ConjTrans, m, nr, k, &a, m, &factor, &mut ct, m).unwrap();
        for j in 0..m {
            for i in 0..nr {
                assert_approx_eq!(right[i + j * nr], ct[j + i * m], 1e-10);
            }
        }
    }

    #[test]
    fn tall_single_column_of_tiles() {
        // four row tiles in one panel: one factorization and three eliminations
        let ctx = ctx(4, 4, Parallelism::Rayon(0));
        let (m, n) = (16, 4);
        let a0 = random(m, n);
        let mut a = a0.clone();
        let factor = geqrf(&ctx, m, n, &mut a, m).unwrap();
        assert_eq!(factor.plan().len(), 4);

        // q^T a0 = r
        let mut b = a0.clone();
        unmqr(&ctx, Side::Left, Trans::ConjTrans, m, n, n, &a, m, &factor, &mut b, m).unwrap();
        for j in 0..n {
            for i in 0..m {
                let expected = if i <= j { a[i + j * m] } else { 0.0 };
                assert_approx_eq!(b[i + j * m], expected, 1e-10);
            }
        }
    }

    /// Fails the `fail_at`-th application kernel it receives, reporting `info`.
    struct FailingKernels {
        calls: AtomicUsize,
        fail_at: usize,
        info: usize,
    }

    impl FailingKernels {
        fn tick(&self) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
                Err(Error::Kernel { info: self.info })
            } else {
                Ok(())
            }
        }
    }

    impl TileKernels<f64> for FailingKernels {
        fn unmqr(
            &self,
            side: Side,
            trans: Trans,
            ib: usize,
            v: TileRef<'_, f64>,
            t: TileRef<'_, f64>,
            c: TileMut<'_, f64>,
        ) -> Result<()> {
            self.tick()?;
            NativeKernels.unmqr(side, trans, ib, v, t, c)
        }

        fn tsmqr(
            &self,
            side: Side,
            trans: Trans,
            ib: usize,
            a1: TileMut<'_, f64>,
            a2: TileMut<'_, f64>,
            v: TileRef<'_, f64>,
            t: TileRef<'_, f64>,
        ) -> Result<()> {
            self.tick()?;
            NativeKernels.tsmqr(side, trans, ib, a1, a2, v, t)
        }
    }

    #[test]
    fn kernel_failure_poisons_the_sequence() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let (m, n) = (16, 4);
            let native = ctx(4, 4, parallelism);
            let mut a = random(m, n);
            let factor = geqrf(&native, m, n, &mut a, m).unwrap();

            let ctx = Context::builder()
                .tile_size(4)
                .inner_block_size(4)
                .parallelism(parallelism)
                .kernels(FailingKernels {
                    calls: AtomicUsize::new(0),
                    fail_at: 2,
                    info: 42,
                })
                .build()
                .unwrap();

            // a single column of tiles: the four application tasks form a chain
            let mut b = random(m, 1);
            let err = unmqr(&ctx, Side::Left, Trans::ConjTrans, m, 1, n, &a, m, &factor, &mut b, m)
                .unwrap_err();
            assert_eq!(err, Error::Kernel { info: 42 });
            assert_eq!(ctx.kernels().calls.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn kernel_failure_without_index_is_not_lost() {
        let (m, n) = (8, 4);
        let native = ctx(4, 4, Parallelism::None);
        let mut a = random(m, n);
        let factor = geqrf(&native, m, n, &mut a, m).unwrap();

        let ctx = Context::builder()
            .tile_size(4)
            .inner_block_size(4)
            .parallelism(Parallelism::None)
            .kernels(FailingKernels {
                calls: AtomicUsize::new(0),
                fail_at: 1,
                info: 0,
            })
            .build()
            .unwrap();

        let mut b = random(m, 2);
        let err = unmqr(&ctx, Side::Left, Trans::ConjTrans, m, 2, n, &a, m, &factor, &mut b, m)
            .unwrap_err();
        assert_eq!(err, Error::Kernel { info: 0 });
    }

    #[test]
    fn factor_is_applied_with_its_own_blocking() {
        let (m, n) = (16, 8);
        let a0 = random(m, n);
        let mut a = a0.clone();
        let factor = geqrf(&ctx(8, 8, Parallelism::None), m, n, &mut a, m).unwrap();
        assert_eq!((factor.nb(), factor.ib()), (8, 8));

        // q^T a0 = r, whatever the blocking of the applying context
        for (nb, ib) in [(8, 2), (4, 2), (16, 3)] {
            let ctx = ctx(nb, ib, Parallelism::Rayon(0));
            let mut b = a0.clone();
            unmqr(&ctx, Side::Left, Trans::ConjTrans, m, n, n, &a, m, &factor, &mut b, m).unwrap();
            for j in 0..n {
                for i in 0..m {
                    let expected = if i <= j { a[i + j * m] } else { 0.0 };
                    assert_approx_eq!(b[i + j * m], expected, 1e-10);
                }
            }
        }
    }

    #[test]
    fn retiled_operand_is_rejected() {
        let (m, n) = (16, 8);
        let ctx = ctx(8, 4, Parallelism::None);
        let mut a = random(m, n);
        let factor = geqrf(&ctx, m, n, &mut a, m).unwrap();

        let a_desc = TileDesc::<f64>::general(4, 4, m, n).unwrap();
        let b_desc = TileDesc::<f64>::general(4, 4, m, 2).unwrap();
        let sequence = Sequence::new();
        let request = Request::new();
        ctx.region(|region| {
            unmqr_tile(
                &ctx,
                region,
                Side::Left,
                Trans::NoTrans,
                &a_desc,
                &factor,
                &b_desc,
                &sequence,
                &request,
            );
            assert_eq!(region.submitted(), 0);
        });
        assert_eq!(sequence.status(), Err(Error::IllegalValue));
    }

    #[test]
    fn argument_errors() {
        let ctx = ctx(4, 2, Parallelism::None);
        let mut a = random(6, 3);
        let factor = geqrf(&ctx, 6, 3, &mut a, 6).unwrap();
        let mut b = random(6, 2);
        let mut check = |side, m, n, k, ldb, index| {
            assert_eq!(
                unmqr(&ctx, side, Trans::NoTrans, m, n, k, &a, 6, &factor, &mut b, ldb).unwrap_err(),
                Error::IllegalArgument { index }
            );
        };
        check(Side::Left, 6, 2, 7, 6, 6);
        check(Side::Left, 6, 2, 2, 6, 8);
        check(Side::Left, 6, 2, 3, 5, 10);
        check(Side::Left, 6, 3, 3, 6, 9);
        check(Side::Right, 2, 5, 3, 2, 8);
    }
}
