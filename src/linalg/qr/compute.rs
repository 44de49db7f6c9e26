use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut},
    linalg::{admit, check_flat_arg, HouseholderFactor},
    sched::{Access, Region},
    sequence::{Request, Sequence},
    tree::{TreeOp, TreePlan},
    Context, Side, Trans,
};

/// The tile height of `t` is the inner block size the factorization was computed with, so the
/// factor is always applied with the blocking it was built with.
pub(crate) fn factor_shape_is_valid<E>(a: &TileDesc<E>, t: &TileDesc<E>) -> bool {
    a.check().is_ok()
        && t.check().is_ok()
        && a.mb() == a.nb()
        && t.nb() == a.nb()
        && t.mt() >= a.mt()
        && t.nt() >= 2 * a.nt()
}

/// Computes the QR factorization of `a` by replaying `plan` forward.
///
/// On completion, the upper triangle of the diagonal tiles and the tiles above them hold $R$;
/// the remaining elements of `a`, together with `t`, represent $Q$.
///
/// `a` must have square tiles, and `t` must have been allocated for `a` (see
/// [`HouseholderFactor::qr`]). A plan that is not a valid elimination of the tile grid of `a`
/// fails the sequence with [`Error::IllegalKernel`] before anything is submitted.
pub fn geqrf_tree<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    plan: &TreePlan,
    a: &TileDesc<E>,
    t: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if !admit(
        sequence,
        request,
        factor_shape_is_valid(a, t),
        Error::IllegalValue,
        "geqrf: incompatible descriptors",
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

    for op in plan.replay(false) {
        log::trace!("geqrf: {op:?}");
        match *op {
            TreeOp::Ge { j, k } => {
                let akj = a.tile(k, j);
                let tkj = t.tile(k, j);
                {
                    let (akj, tkj) = (akj.clone(), tkj.clone());
                    region.submit(
                        "geqrt",
                        &[Access::read_write(akj.key()), Access::write(tkj.key())],
                        sequence,
                        request,
                        move || unsafe { kernels.geqrt(ib, akj.as_mut(), tkj.as_mut()) },
                    );
                }
                for n in j + 1..nt {
                    let akn = a.tile(k, n);
                    let (akj, tkj) = (akj.clone(), tkj.clone());
                    region.submit(
                        "unmqr",
                        &[
                            Access::read(akj.key()),
                            Access::read(tkj.key()),
                            Access::read_write(akn.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.unmqr(
                                Side::Left,
                                Trans::ConjTrans,
                                ib,
                                akj.as_ref(),
                                tkj.as_ref(),
                                akn.as_mut(),
                            )
                        },
                    );
                }
            }
            TreeOp::Tt { j, k, kpiv } | TreeOp::Ts { j, k, kpiv } => {
                let triangle = matches!(op, TreeOp::Tt { .. });
                let apj = a.tile(kpiv, j);
                let akj = a.tile(k, j);
                let tkj = t.tile(k, j + nt);
                {
                    let (apj, akj, tkj) = (apj.clone(), akj.clone(), tkj.clone());
                    region.submit(
                        if triangle { "ttqrt" } else { "tsqrt" },
                        &[
                            Access::read_write(apj.key()),
                            Access::read_write(akj.key()),
                            Access::write(tkj.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            if triangle {
                                kernels.ttqrt(ib, apj.as_mut(), akj.as_mut(), tkj.as_mut())
                            } else {
                                kernels.tsqrt(ib, apj.as_mut(), akj.as_mut(), tkj.as_mut())
                            }
                        },
                    );
                }
                for n in j + 1..nt {
                    let apn = a.tile(kpiv, n);
                    let akn = a.tile(k, n);
                    let (akj, tkj) = (akj.clone(), tkj.clone());
                    region.submit(
                        if triangle { "ttmqr" } else { "tsmqr" },
                        &[
                            Access::read_write(apn.key()),
                            Access::read_write(akn.key()),
                            Access::read(akj.key()),
                            Access::read(tkj.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            let (a1, a2, v, t) =
                                (apn.as_mut(), akn.as_mut(), akj.as_ref(), tkj.as_ref());
                            if triangle {
                                kernels.ttmqr(Side::Left, Trans::ConjTrans, ib, a1, a2, v, t)
                            } else {
                                kernels.tsmqr(Side::Left, Trans::ConjTrans, ib, a1, a2, v, t)
                            }
                        },
                    );
                }
            }
        }
    }
}

/// Computes the QR factorization of `a` with the reduction tree of the context.
///
/// See [`geqrf_tree`].
#[inline]
pub fn geqrf_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    a: &TileDesc<E>,
    factor: &HouseholderFactor<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    geqrf_tree(ctx, region, factor.plan(), a, factor.t(), sequence, request)
}

/// Computes the QR factorization of the `m×n` matrix stored in `a` with leading dimension `lda`.
///
/// On exit, the upper trapezoid of `a` holds $R$ and its strictly lower part, together with the
/// returned factor, represents $Q$.
///
/// # Errors
///
/// - [`Error::IllegalArgument`] with index `3` if `a` is too short, or `4` if
/// `lda < max(1, m)`.
/// - Errors of descriptor allocation, and the status of the factorization.
pub fn geqrf<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    m: usize,
    n: usize,
    a: &mut [E],
    lda: usize,
) -> Result<HouseholderFactor<E>> {
    check_flat_arg(a, m, n, lda, 3, 4)?;

    let nb = ctx.nb();
    let a_desc = TileDesc::general(nb, nb, m, n)?;
    let factor = HouseholderFactor::qr(ctx, &a_desc)?;
    if Ord::min(m, n) == 0 {
        return Ok(factor);
    }

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatMut::new(a, m, n, lda)?;
        ctx.region(|region| {
            ge2desc(region, a.as_ref(), &a_desc, &sequence, &request);
            geqrf_tile(ctx, region, &a_desc, &factor, &sequence, &request);
            desc2ge(region, &a_desc, &a, &sequence, &request);
        });
    }
    sequence.status()?;
    Ok(factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        linalg::{qr::apply::unmqr_tile, test_utils::*},
        Parallelism,
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn factorization_reconstructs_the_input() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            for (m, n, nb, ib, domain) in [
                (12, 12, 4, 2, 4),
                (17, 6, 4, 2, 2),
                (9, 9, 3, 3, 1),
                (20, 7, 3, 2, 3),
                (5, 11, 4, 2, 4),
            ] {
                let ctx = Context::builder()
                    .tile_size(nb)
                    .inner_block_size(ib)
                    .tree_domain(domain)
                    .parallelism(parallelism)
                    .build()
                    .unwrap();
                let a0 = random(m, n);
                let mut a = a0.clone();
                let factor = geqrf(&ctx, m, n, &mut a, m).unwrap();

                // rebuild q r from the tiled factors
                let a_desc = TileDesc::general(nb, nb, m, n).unwrap();
                let r_desc = TileDesc::general(nb, nb, m, n).unwrap();
                let mut r = vec![0.0; m * n];
                for j in 0..n {
                    for i in 0..Ord::min(j + 1, m) {
                        r[i + j * m] = a[i + j * m];
                    }
                }
                let sequence = Sequence::new();
                let request = Request::new();
                {
                    let a = FlatMut::new(&mut a, m, n, m).unwrap();
                    let r = FlatMut::new(&mut r, m, n, m).unwrap();
                    ctx.region(|region| {
                        ge2desc(region, a.as_ref(), &a_desc, &sequence, &request);
                        ge2desc(region, r.as_ref(), &r_desc, &sequence, &request);
                        unmqr_tile(
                            &ctx,
                            region,
                            Side::Left,
                            Trans::NoTrans,
                            &a_desc,
                            &factor,
                            &r_desc,
                            &sequence,
                            &request,
                        );
                        desc2ge(region, &r_desc, &r, &sequence, &request);
                    });
                }
                sequence.status().unwrap();
                for (x, y) in r.iter().zip(&a0) {
                    assert_approx_eq!(x, y, 1e-10);
                }
            }
        }
    }

    #[test]
    fn invalid_plan_fails_the_sequence() {
        let ctx = Context::builder()
            .tile_size(2)
            .inner_block_size(2)
            .parallelism(Parallelism::None)
            .build()
            .unwrap();
        let a = TileDesc::<f64>::general(2, 2, 6, 2).unwrap();
        let factor = HouseholderFactor::qr(&ctx, &a).unwrap();
        let plan = TreePlan::from_ops(vec![
            TreeOp::Ge { j: 0, k: 0 },
            TreeOp::Tt { j: 0, k: 1, kpiv: 0 },
        ]);
        let sequence = Sequence::new();
        let request = Request::new();
        ctx.region(|region| {
            geqrf_tree(&ctx, region, &plan, &a, factor.t(), &sequence, &request);
            assert_eq!(region.submitted(), 0);
        });
        assert_eq!(sequence.status(), Err(Error::IllegalKernel));
    }

    #[test]
    fn argument_errors() {
        let ctx = Context::builder().build().unwrap();
        let mut a = vec![0.0f64; 10];
        assert_eq!(
            geqrf(&ctx, 4, 3, &mut a, 3).unwrap_err(),
            Error::IllegalArgument { index: 4 }
        );
        assert_eq!(
            geqrf(&ctx, 4, 3, &mut a, 4).unwrap_err(),
            Error::IllegalArgument { index: 3 }
        );
    }
}
