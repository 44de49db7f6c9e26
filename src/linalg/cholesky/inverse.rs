use crate::{
    desc::TileDesc,
    error::Result,
    field::RealField,
    kernel::TileKernels,
    layout::{desc2tr, tr2desc, FlatMut},
    linalg::{
        check_flat_arg,
        cholesky::{compute::potrf_tile, triangle_desc},
        triangular_inverse::{lauum_tile, trtri_tile},
    },
    sched::Region,
    sequence::{Request, Sequence},
    Context, Diag, Uplo,
};

/// Computes the `uplo` triangle of $A^{-1}$, given the Cholesky factor of $A$ stored in that
/// triangle of `a`.
///
/// $A^{-1} = L^{-\top} L^{-1}$, or $U^{-1} U^{-\top}$: the factor is inverted in place, then
/// multiplied by its transpose.
pub fn potri_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    a: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    trtri_tile(ctx, region, uplo, Diag::NonUnit, a, sequence, request);
    lauum_tile(ctx, region, uplo, a, sequence, request);
}

/// Computes the `uplo` triangle of the inverse of the symmetric positive definite matrix stored
/// in the `uplo` triangle of `a`.
pub fn poinv_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    a: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    potrf_tile(ctx, region, uplo, a, sequence, request);
    potri_tile(ctx, region, uplo, a, sequence, request);
}

fn run<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    n: usize,
    a: &mut [E],
    lda: usize,
    factorize: bool,
) -> Result<()> {
    check_flat_arg(a, n, n, lda, 3, 4)?;
    if n == 0 {
        return Ok(());
    }

    let a_desc = triangle_desc(uplo, ctx.nb(), n)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatMut::new(a, n, n, lda)?;
        ctx.region(|region| {
            tr2desc(region, uplo, a.as_ref(), &a_desc, &sequence, &request);
            if factorize {
                poinv_tile(ctx, region, uplo, &a_desc, &sequence, &request);
            } else {
                potri_tile(ctx, region, uplo, &a_desc, &sequence, &request);
            }
            desc2tr(region, uplo, &a_desc, &a, &sequence, &request);
        });
    }
    sequence.status()
}

/// Overwrites the `uplo` triangle of `a`, holding the Cholesky factor computed by
/// [`potrf`](super::compute::potrf) of an `n×n` matrix $A$, with that triangle of $A^{-1}$.
///
/// # Errors
///
/// - [`Error::IllegalArgument`](crate::Error) with index `3` if `a` is too short, or `4` if
/// `lda < max(1, n)`.
/// - [`Error::Kernel`](crate::Error) if the factor has a zero diagonal element.
pub fn potri<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    n: usize,
    a: &mut [E],
    lda: usize,
) -> Result<()> {
    run(ctx, uplo, n, a, lda, false)
}

/// Overwrites the `uplo` triangle of the `n×n` symmetric positive definite matrix $A$ stored in
/// `a` with that triangle of $A^{-1}$.
///
/// # Errors
///
/// - [`Error::IllegalArgument`](crate::Error) with index `3` if `a` is too short, or `4` if
/// `lda < max(1, n)`.
/// - [`Error::Kernel`](crate::Error) with the order of the first leading minor that is not
/// positive definite. The inversion is then skipped.
pub fn poinv<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    n: usize,
    a: &mut [E],
    lda: usize,
) -> Result<()> {
    run(ctx, uplo, n, a, lda, true)
}
