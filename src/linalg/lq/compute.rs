use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut},
    linalg::{admit, check_flat_arg, qr::compute::factor_shape_is_valid, HouseholderFactor},
    sched::{Access, Region},
    sequence::{Request, Sequence},
    tree::{TreeOp, TreePlan},
    Context, Side, Trans,
};

/// Computes the LQ factorization of `a` by replaying `plan` forward.
///
/// The plan eliminates the transposed grid: its panels are the row tiles of `a`, and its rows
/// are the column tiles of `a`.
///
/// On completion, the lower triangle of the diagonal tiles and the tiles to their left hold $L$;
/// the remaining elements of `a`, together with `t`, represent $Q$.
pub fn gelqf_tree<'scope, E: RealField, K: TileKernels<E>>(
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
        "gelqf: incompatible descriptors",
    ) {
        return;
    }
    if let Err(err) = plan.validate(a.nt(), a.mt()) {
        sequence.fail(request, err);
        return;
    }

    let kernels = ctx.kernels();
    let ib = t.mb();
    let (mt, nt) = (a.mt(), a.nt());

    for op in plan.replay(false) {
        log::trace!("gelqf: {op:?}");
        match *op {
            TreeOp::Ge { j, k } => {
                let ajk = a.tile(j, k);
                let tjk = t.tile(j, k);
                {
                    let (ajk, tjk) = (ajk.clone(), tjk.clone());
                    region.submit(
                        "gelqt",
                        &[Access::read_write(ajk.key()), Access::write(tjk.key())],
                        sequence,
                        request,
                        move || unsafe { kernels.gelqt(ib, ajk.as_mut(), tjk.as_mut()) },
                    );
                }
                for m in j + 1..mt {
                    let amk = a.tile(m, k);
                    let (ajk, tjk) = (ajk.clone(), tjk.clone());
                    region.submit(
                        "unmlq",
                        &[
                            Access::read(ajk.key()),
                            Access::read(tjk.key()),
                            Access::read_write(amk.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.unmlq(
                                Side::Right,
                                Trans::ConjTrans,
                                ib,
                                ajk.as_ref(),
                                tjk.as_ref(),
                                amk.as_mut(),
                            )
                        },
                    );
                }
            }
            TreeOp::Tt { j, k, kpiv } | TreeOp::Ts { j, k, kpiv } => {
                let triangle = matches!(op, TreeOp::Tt { .. });
                let ajp = a.tile(j, kpiv);
                let ajk = a.tile(j, k);
                let tjk = t.tile(j, k + nt);
                {
                    let (ajp, ajk, tjk) = (ajp.clone(), ajk.clone(), tjk.clone());
                    region.submit(
                        if triangle { "ttlqt" } else { "tslqt" },
                        &[
                            Access::read_write(ajp.key()),
                            Access::read_write(ajk.key()),
                            Access::write(tjk.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            if triangle {
                                kernels.ttlqt(ib, ajp.as_mut(), ajk.as_mut(), tjk.as_mut())
                            } else {
                                kernels.tslqt(ib, ajp.as_mut(), ajk.as_mut(), tjk.as_mut())
                            }
                        },
                    );
                }
                for m in j + 1..mt {
                    let amp = a.tile(m, kpiv);
                    let amk = a.tile(m, k);
                    let (ajk, tjk) = (ajk.clone(), tjk.clone());
                    region.submit(
                        if triangle { "ttmlq" } else { "tsmlq" },
                        &[
                            Access::read_write(amp.key()),
                            Access::read_write(amk.key()),
                            Access::read(ajk.key()),
                            Access::read(tjk.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            let (a1, a2, v, t) =
                                (amp.as_mut(), amk.as_mut(), ajk.as_ref(), tjk.as_ref());
                            if triangle {
                                kernels.ttmlq(Side::Right, Trans::ConjTrans, ib, a1, a2, v, t)
                            } else {
                                kernels.tsmlq(Side::Right, Trans::ConjTrans, ib, a1, a2, v, t)
                            }
                        },
                    );
                }
            }
        }
    }
}

/// Computes the LQ factorization of `a` with the reduction tree of the context.
///
/// See [`gelqf_tree`].
#[inline]
pub fn gelqf_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    a: &TileDesc<E>,
    factor: &HouseholderFactor<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    gelqf_tree(ctx, region, factor.plan(), a, factor.t(), sequence, request)
}

/// Computes the LQ factorization of the `m×n` matrix stored in `a` with leading dimension `lda`.
///
/// On exit, the lower trapezoid of `a` holds $L$ and its strictly upper part, together with the
/// returned factor, represents $Q$.
///
/// # Errors
///
/// - [`Error::IllegalArgument`] with index `3` if `a` is too short, or `4` if
/// `lda < max(1, m)`.
/// - Errors of descriptor allocation, and the status of the factorization.
pub fn gelqf<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    m: usize,
    n: usize,
    a: &mut [E],
    lda: usize,
) -> Result<HouseholderFactor<E>> {
    check_flat_arg(a, m, n, lda, 3, 4)?;

    let nb = ctx.nb();
    let a_desc = TileDesc::general(nb, nb, m, n)?;
    let factor = HouseholderFactor::lq(ctx, &a_desc)?;
    if Ord::min(m, n) == 0 {
        return Ok(factor);
    }

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatMut::new(a, m, n, lda)?;
        ctx.region(|region| {
            ge2desc(region, a.as_ref(), &a_desc, &sequence, &request);
            gelqf_tile(ctx, region, &a_desc, &factor, &sequence, &request);
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
        linalg::{lq::apply::unmlq, test_utils::*},
        Parallelism,
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn factorization_reconstructs_the_input() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            for (m, n, nb, ib, domain) in [
                (12, 12, 4, 2, 4),
                (6, 17, 4, 2, 2),
                (7, 20, 3, 2, 3),
                (11, 5, 4, 4, 1),
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
                let factor = gelqf(&ctx, m, n, &mut a, m).unwrap();
                let k = Ord::min(m, n);

                // l q, with l the lower trapezoid of the factorized matrix
                let mut l = vec![0.0; m * n];
                for j in 0..k {
                    for i in j..m {
                        l[i + j * m] = a[i + j * m];
                    }
                }
                unmlq(&ctx, Side::Right, Trans::NoTrans, m, n, m, &a, m, &factor, &mut l, m)
                    .unwrap();
                for (x, y) in l.iter().zip(&a0) {
                    assert_approx_eq!(x, y, 1e-10);
                }
            }
        }
    }

    #[test]
    fn lower_triangle_only() {
        let ctx = Context::builder()
            .tile_size(3)
            .inner_block_size(3)
            .parallelism(Parallelism::None)
            .build()
            .unwrap();
        let (m, n) = (4, 9);
        let mut a = random(m, n);
        let a0 = a.clone();
        gelqf(&ctx, m, n, &mut a, m).unwrap();

        // |l| has the row norms of a, since q is orthogonal
        for i in 0..m {
            let norm = |x: &[f64]| (0..n).map(|j| x[i + j * m] * x[i + j * m]).sum::<f64>();
            let l_norm: f64 = (0..=i).map(|j| a[i + j * m] * a[i + j * m]).sum();
            assert_approx_eq!(l_norm, norm(&a0), 1e-10);
        }
    }
}
