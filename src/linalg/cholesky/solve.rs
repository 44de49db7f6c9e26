use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, desc2tr, ge2desc, tr2desc, FlatMut, FlatRef},
    linalg::{
        admit, check_flat_arg,
        cholesky::{compute::potrf_tile, is_square, triangle_desc},
        triangular_solve::trsm_tile,
    },
    sched::Region,
    sequence::{Request, Sequence},
    Context, Diag, Side, Trans, Uplo,
};

/// Solves $AX = B$ given the Cholesky factor of $A$ stored in the `uplo` triangle of `a`,
/// overwriting `b` with $X$.
pub fn potrs_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    a: &TileDesc<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if !admit(
        sequence,
        request,
        is_square(a) && b.m() == a.n(),
        Error::IllegalValue,
        "potrs: incompatible descriptors",
    ) {
        return;
    }

    // l l^T x = b, or u^T u x = b
    let (first, second) = match uplo {
        Uplo::Lower => (Trans::NoTrans, Trans::Trans),
        Uplo::Upper => (Trans::Trans, Trans::NoTrans),
    };
    for trans in [first, second] {
        trsm_tile(
            ctx,
            region,
            Side::Left,
            uplo,
            trans,
            Diag::NonUnit,
            E::one(),
            a,
            b,
            sequence,
            request,
        );
    }
}

/// Solves $AX = B$ for the symmetric positive definite matrix $A$, overwriting the `uplo`
/// triangle of `a` with its Cholesky factor and `b` with $X$.
pub fn posv_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    a: &TileDesc<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    potrf_tile(ctx, region, uplo, a, sequence, request);
    potrs_tile(ctx, region, uplo, a, b, sequence, request);
}

/// Solves $AX = B$ given the Cholesky factor computed by [`potrf`](super::compute::potrf),
/// stored in the `uplo` triangle of the `n×n` matrix `a`. `b` holds the `n×nrhs` matrix $B$ and
/// is overwritten with $X$.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with the position of the first invalid argument, counting `uplo`
/// as `1` and `ldb` as `7`.
pub fn potrs<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    n: usize,
    nrhs: usize,
    a: &[E],
    lda: usize,
    b: &mut [E],
    ldb: usize,
) -> Result<()> {
    check_flat_arg(a, n, n, lda, 4, 5)?;
    check_flat_arg(b, n, nrhs, ldb, 6, 7)?;
    if Ord::min(n, nrhs) == 0 {
        return Ok(());
    }

    let nb = ctx.nb();
    let a_desc = triangle_desc(uplo, nb, n)?;
    let b_desc = TileDesc::general(nb, nb, n, nrhs)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatRef::new(a, n, n, lda)?;
        let b = FlatMut::new(b, n, nrhs, ldb)?;
        ctx.region(|region| {
            tr2desc(region, uplo, a, &a_desc, &sequence, &request);
            ge2desc(region, b.as_ref(), &b_desc, &sequence, &request);
            potrs_tile(ctx, region, uplo, &a_desc, &b_desc, &sequence, &request);
            desc2ge(region, &b_desc, &b, &sequence, &request);
        });
    }
    sequence.status()
}

/// Solves $AX = B$ for the `n×n` symmetric positive definite matrix stored in the `uplo`
/// triangle of `a`. On exit, that triangle holds the Cholesky factor of $A$, and `b` holds $X$.
///
/// # Errors
///
/// - [`Error::IllegalArgument`] with the position of the first invalid argument, counting `uplo`
/// as `1` and `ldb` as `7`.
/// - [`Error::Kernel`] with the order of the first leading minor that is not positive definite.
pub fn posv<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    n: usize,
    nrhs: usize,
    a: &mut [E],
    lda: usize,
    b: &mut [E],
    ldb: usize,
) -> Result<()> {
    check_flat_arg(a, n, n, lda, 4, 5)?;
    check_flat_arg(b, n, nrhs, ldb, 6, 7)?;
    if n == 0 {
        return Ok(());
    }

    let nb = ctx.nb();
    let a_desc = triangle_desc(uplo, nb, n)?;
    let b_desc = TileDesc::general(nb, nb, n, nrhs)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatMut::new(a, n, n, lda)?;
        let b = FlatMut::new(b, n, nrhs, ldb)?;
        ctx.region(|region| {
            tr2desc(region, uplo, a.as_ref(), &a_desc, &sequence, &request);
            ge2desc(region, b.as_ref(), &b_desc, &sequence, &request);
            posv_tile(ctx, region, uplo, &a_desc, &b_desc, &sequence, &request);
            desc2tr(region, uplo, &a_desc, &a, &sequence, &request);
            desc2ge(region, &b_desc, &b, &sequence, &request);
        });
    }
    sequence.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        linalg::{cholesky::compute::potrf, test_utils::*},
        Parallelism,
    };
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn solution_satisfies_the_system() {
        let ctx = Context::builder()
            .tile_size(4)
            .inner_block_size(2)
            .parallelism(Parallelism::Rayon(0))
            .build()
            .unwrap();
        let (n, nrhs) = (13, 3);
        let a0 = spd(n);
        let b0 = random(n, nrhs);

        for uplo in [Uplo::Lower, Uplo::Upper] {
            let mut a = a0.clone();
            let mut b = b0.clone();
            posv(&ctx, uplo, n, nrhs, &mut a, n, &mut b, n).unwrap();
            let ax = matmul(false, n, n, nrhs, &a0, &b);
            for (x, y) in ax.iter().zip(&b0) {
                assert_approx_eq!(x, y, 1e-10);
            }

            // the factor can be reused
            let mut factor = a0.clone();
            potrf(&ctx, uplo, n, &mut factor, n).unwrap();
            let mut b2 = b0.clone();
            potrs(&ctx, uplo, n, nrhs, &factor, n, &mut b2, n).unwrap();
            for (x, y) in b2.iter().zip(&b) {
                assert_approx_eq!(x, y, 1e-12);
            }
        }
    }

    #[test]
    fn indefinite_matrix_fails() {
        let ctx = Context::builder().tile_size(2).inner_block_size(2).build().unwrap();
        let n = 3;
        let mut a = vec![1.0, 2.0, 0.0, 2.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let mut b = vec![1.0; n];
        assert_eq!(
            posv(&ctx, Uplo::Lower, n, 1, &mut a, n, &mut b, n).unwrap_err(),
            Error::Kernel { info: 2 }
        );
    }
}
