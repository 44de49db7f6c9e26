use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut, FlatRef},
    linalg::{
        admit, check_flat_arg, illegal_argument,
        qr::{
            apply::{operand_tile, operand_width},
            compute::factor_shape_is_valid,
        },
        HouseholderFactor,
    },
    sched::{Access, Region},
    sequence::{Request, Sequence},
    tree::{lq_replays_in_reverse, TreeOp, TreePlan},
    Context, Side, Trans,
};

/// Overwrites `b` with $QB$, $Q^\top B$, $BQ$ or $BQ^\top$, where $Q$ is the orthogonal factor
/// of the LQ factorization stored in `a` and `t`, computed with `plan`.
///
/// On the left, `b` must have as many rows as `a` has columns, with the same tiling. On the
/// right, the columns of `b` must match the columns of `a`.
pub fn unmlq_tree<'scope, E: RealField, K: TileKernels<E>>(
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
            Side::Left => b.m() == a.n() && b.mb() == a.nb(),
            Side::Right => b.n() == a.n() && b.nb() == a.nb(),
        };
    if !admit(
        sequence,
        request,
        factor_shape_is_valid(a, t) && conformant,
        Error::IllegalValue,
        "unmlq: incompatible descriptors",
    ) {
        return;
    }
    if let Err(err) = plan.validate(a.nt(), a.mt()) {
        sequence.fail(request, err);
        return;
    }

    let kernels = ctx.kernels();
    let ib = t.mb();
    let nt = a.nt();
    let width = operand_width(side, b);

    for op in plan.replay(lq_replays_in_reverse(side, trans)) {
        log::trace!("unmlq: {op:?}");
        match *op {
            TreeOp::Ge { j, k } => {
                let ajk = a.tile(j, k);
                let tjk = t.tile(j, k);
                for l in 0..width {
                    let bk = operand_tile(side, b, k, l);
                    let (ajk, tjk) = (ajk.clone(), tjk.clone());
                    region.submit(
                        "unmlq",
                        &[
                            Access::read(ajk.key()),
                            Access::read(tjk.key()),
                            Access::read_write(bk.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.unmlq(side, trans, ib, ajk.as_ref(), tjk.as_ref(), bk.as_mut())
                        },
                    );
                }
            }
            TreeOp::Tt { j, k, kpiv } | TreeOp::Ts { j, k, kpiv } => {
                let triangle = matches!(op, TreeOp::Tt { .. });
                let ajk = a.tile(j, k);
                let tjk = t.tile(j, k + nt);
                for l in 0..width {
                    let bp = operand_tile(side, b, kpiv, l);
                    let bk = operand_tile(side, b, k, l);
                    let (ajk, tjk) = (ajk.clone(), tjk.clone());
                    region.submit(
                        if triangle { "ttmlq" } else { "tsmlq" },
                        &[
                            Access::read_write(bp.key()),
                            Access::read_write(bk.key()),
                            Access::read(ajk.key()),
                            Access::read(tjk.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            let (b1, b2, v, t) =
                                (bp.as_mut(), bk.as_mut(), ajk.as_ref(), tjk.as_ref());
                            if triangle {
                                kernels.ttmlq(side, trans, ib, b1, b2, v, t)
                            } else {
                                kernels.tsmlq(side, trans, ib, b1, b2, v, t)
                            }
                        },
                    );
                }
            }
        }
    }
}

/// Applies the orthogonal factor of an LQ factorization computed by
/// [`gelqf_tile`](super::compute::gelqf_tile).
///
/// See [`unmlq_tree`].
#[inline]
pub fn unmlq_tile<'scope, E: RealField, K: TileKernels<E>>(
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
    unmlq_tree(ctx, region, side, trans, factor.plan(), a, factor.t(), b, sequence, request)
}

/// Overwrites the `m×n` matrix stored in `b` with $\text{op}(Q)B$ or $B\text{op}(Q)$, where $Q$
/// is the orthogonal factor returned by [`gelqf`](super::compute::gelqf) for the `k×nq` matrix
/// stored in `a`, with `nq = m` on the left and `nq = n` on the right.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with the position of the first invalid argument, counting `side`
/// as `1` and `ldb` as `10`.
pub fn unmlq<E: RealField, K: TileKernels<E>>(
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
    check_flat_arg(a, k, nq, lda, 6, 7)?;
    if factor.shape() != (k, nq) {
        return Err(illegal_argument(8, "factor"));
    }
    check_flat_arg(b, m, n, ldb, 9, 10)?;
    if Ord::min(Ord::min(m, n), k) == 0 {
        return Ok(());
    }

    let nb = factor.nb();
    let a_desc = TileDesc::general(nb, nb, k, nq)?;
    let b_desc = TileDesc::general(nb, nb, m, n)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatRef::new(a, k, nq, lda)?;
        let b = FlatMut::new(b, m, n, ldb)?;
        ctx.region(|region| {
            ge2desc(region, a, &a_desc, &sequence, &request);
            ge2desc(region, b.as_ref(), &b_desc, &sequence, &request);
            unmlq_tile(ctx, region, side, trans, &a_desc, factor, &b_desc, &sequence, &request);
            desc2ge(region, &b_desc, &b, &sequence, &request);
        });
    }
    sequence.status()
}
