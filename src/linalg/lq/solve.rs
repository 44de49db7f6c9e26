use crate::{
    desc::{MatrixType, TileDesc},
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut, FlatRef},
    linalg::{
        admit, check_flat_arg, illegal_argument, lq::apply::unmlq_tile, mat_ops::laset_tile,
        qr::compute::factor_shape_is_valid, triangular_solve::trsm_tile, HouseholderFactor,
    },
    sched::Region,
    sequence::{Request, Sequence},
    Context, Diag, Side, Trans, Uplo,
};

/// Leading triangle of `a`, with the rows of `b` it solves for and the padding rows below them.
fn split<E>(a: &TileDesc<E>, b: &TileDesc<E>) -> Result<(TileDesc<E>, TileDesc<E>, TileDesc<E>)> {
    let (m, n, nrhs) = (a.m(), a.n(), b.n());
    Ok((
        a.submatrix(0, 0, m, m)?,
        b.submatrix(0, 0, m, nrhs)?,
        b.submatrix(m, 0, n - m, nrhs)?,
    ))
}

/// Computes the minimum norm solution of the underdetermined system $AX = B$, given the LQ
/// factorization of the `m×n` matrix $A$, with `m <= n`.
///
/// `b` has `n` rows, of which the first `m` hold $B$. The remaining rows are overwritten with
/// zeros before $Q^\top$ is applied, so their initial content is irrelevant. On completion, `b`
/// holds $X$.
pub fn gelqs_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    a: &TileDesc<E>,
    factor: &HouseholderFactor<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let (m, n) = (a.m(), a.n());
    if !admit(
        sequence,
        request,
        m <= n && b.m() == n && factor_shape_is_valid(a, factor.t()),
        Error::IllegalValue,
        "gelqs: incompatible descriptors",
    ) {
        return;
    }

    let (l, y, pad) = match split(a, b) {
        Ok(views) => views,
        Err(err) => {
            sequence.fail(request, err);
            return;
        }
    };

    laset_tile(ctx, region, MatrixType::General, E::zero(), E::zero(), &pad, sequence, request);
    trsm_tile(
        ctx,
        region,
        Side::Left,
        Uplo::Lower,
        Trans::NoTrans,
        Diag::NonUnit,
        E::one(),
        &l,
        &y,
        sequence,
        request,
    );
    unmlq_tile(ctx, region, Side::Left, Trans::ConjTrans, a, factor, b, sequence, request);
}

/// Computes the minimum norm solution of $AX = B$, given the LQ factorization of the `m×n`
/// matrix $A$ computed by [`gelqf`](super::compute::gelqf), where `m <= n`.
///
/// `b` holds the `m×nrhs` matrix $B$ in its first `m` rows, and has leading dimension
/// `ldb >= max(1, n)`. On exit, its first `n` rows hold $X$.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with the position of the first invalid argument, counting `m` as
/// `1` and `ldb` as `8`.
pub fn gelqs<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    m: usize,
    n: usize,
    nrhs: usize,
    a: &[E],
    lda: usize,
    factor: &HouseholderFactor<E>,
    b: &mut [E],
    ldb: usize,
) -> Result<()> {
    if m > n {
        return Err(illegal_argument(1, "m"));
    }
    check_flat_arg(a, m, n, lda, 4, 5)?;
    if factor.shape() != (m, n) {
        return Err(illegal_argument(6, "factor"));
    }
    check_flat_arg(b, n, nrhs, ldb, 7, 8)?;
    if Ord::min(m, nrhs) == 0 {
        return Ok(());
    }

    let nb = factor.nb();
    let a_desc = TileDesc::general(nb, nb, m, n)?;
    let b_desc = TileDesc::general(nb, nb, n, nrhs)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatRef::new(a, m, n, lda)?;
        let b = FlatMut::new(b, n, nrhs, ldb)?;
        ctx.region(|region| {
            ge2desc(region, a, &a_desc, &sequence, &request);
            ge2desc(region, b.as_ref(), &b_desc, &sequence, &request);
            gelqs_tile(ctx, region, &a_desc, factor, &b_desc, &sequence, &request);
            desc2ge(region, &b_desc, &b, &sequence, &request);
        });
    }
    sequence.status()
}
