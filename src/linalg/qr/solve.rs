use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2ge, ge2desc, FlatMut, FlatRef},
    linalg::{
        admit, check_flat_arg, illegal_argument,
        lq::{compute::gelqf_tile, solve::gelqs_tile},
        qr::{
            apply::unmqr_tile,
            compute::{factor_shape_is_valid, geqrf_tile},
        },
        triangular_solve::trsm_tile,
        HouseholderFactor,
    },
    mat::TileMut,
    sched::Region,
    sequence::{Request, Sequence},
    Context, Diag, Side, Trans, Uplo,
};

/// Solves the least squares problem $\min_X \|AX - B\|$, given the QR factorization of the
/// `m×n` matrix $A$, with `m >= n`.
///
/// On completion, the first `n` rows of `b` hold $X$.
pub fn geqrs_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    a: &TileDesc<E>,
    factor: &HouseholderFactor<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let n = a.n();
    if !admit(
        sequence,
        request,
        a.m() >= n && b.m() == a.m() && factor_shape_is_valid(a, factor.t()),
        Error::IllegalValue,
        "geqrs: incompatible descriptors",
    ) {
        return;
    }

    unmqr_tile(ctx, region, Side::Left, Trans::ConjTrans, a, factor, b, sequence, request);
    match (a.submatrix(0, 0, n, n), b.submatrix(0, 0, n, b.n())) {
        (Ok(r), Ok(x)) => trsm_tile(
            ctx,
            region,
            Side::Left,
            Uplo::Upper,
            Trans::NoTrans,
            Diag::NonUnit,
            E::one(),
            &r,
            &x,
            sequence,
            request,
        ),
        (Err(err), _) | (_, Err(err)) => sequence.fail(request, err),
    }
}

/// Solves the least squares problem $\min_X \|AX - B\|$ given the QR factorization of the
/// `m×n` matrix $A$ computed by [`geqrf`](super::compute::geqrf), where `m >= n` and $B$ is the
/// `m×nrhs` matrix stored in `b`.
///
/// On exit, the first `n` rows of `b` hold $X$, and the remaining ones the components of $Q^\top
/// B$ orthogonal to the range of $A$.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with the position of the first invalid argument, counting `m` as
/// `1` and `ldb` as `8`.
pub fn geqrs<E: RealField, K: TileKernels<E>>(
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
    if n > m {
        return Err(illegal_argument(2, "n"));
    }
    check_flat_arg(a, m, n, lda, 4, 5)?;
    if factor.shape() != (m, n) {
        return Err(illegal_argument(6, "factor"));
    }
    check_flat_arg(b, m, nrhs, ldb, 7, 8)?;
    if Ord::min(n, nrhs) == 0 {
        return Ok(());
    }

    let nb = factor.nb();
    let a_desc = TileDesc::general(nb, nb, m, n)?;
    let b_desc = TileDesc::general(nb, nb, m, nrhs)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatRef::new(a, m, n, lda)?;
        let b = FlatMut::new(b, m, nrhs, ldb)?;
        ctx.region(|region| {
            ge2desc(region, a, &a_desc, &sequence, &request);
            ge2desc(region, b.as_ref(), &b_desc, &sequence, &request);
            geqrs_tile(ctx, region, &a_desc, factor, &b_desc, &sequence, &request);
            desc2ge(region, &b_desc, &b, &sequence, &request);
        });
    }
    sequence.status()
}

/// Solves the overdetermined or underdetermined linear system $AX = B$ for the full rank `m×n`
/// matrix $A$ stored in `a`, and the right-hand sides stored in `b`.
///
/// - If `m >= n`, computes the least squares solution with a QR factorization of $A$. `b` holds
/// the `m×nrhs` matrix $B$, and on exit its first `n` rows hold $X$.
/// - If `m < n`, computes the minimum norm solution with an LQ factorization of $A$. `b` holds
/// $B$ in its first `m` rows, and on exit its first `n` rows hold $X$.
///
/// On exit, `a` is overwritten by its factorization.
///
/// # Errors
///
/// - [`Error::IllegalArgument`] with the position of the first invalid argument, counting `m` as
/// `1` and `ldb` as `7`. `ldb` must be at least `max(1, m, n)`.
/// - Errors of descriptor allocation, and the status of the computation.
pub fn gels<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    m: usize,
    n: usize,
    nrhs: usize,
    a: &mut [E],
    lda: usize,
    b: &mut [E],
    ldb: usize,
) -> Result<()> {
    let mn = Ord::max(m, n);
    check_flat_arg(a, m, n, lda, 4, 5)?;
    if ldb < Ord::max(1, mn) {
        return Err(illegal_argument(7, "ldb"));
    }
    check_flat_arg(b, mn, nrhs, ldb, 6, 7)?;
    if Ord::min(Ord::min(m, n), nrhs) == 0 {
        // x = 0 when a or b is empty, over every row of b like the full path writes
        TileMut::from_col_major_slice(b, mn, nrhs, ldb).fill(E::zero());
        return Ok(());
    }

    let nb = ctx.nb();
    let a_desc = TileDesc::general(nb, nb, m, n)?;
    let b_desc = TileDesc::general(nb, nb, mn, nrhs)?;
    let factor = if m >= n {
        HouseholderFactor::qr(ctx, &a_desc)?
    } else {
        HouseholderFactor::lq(ctx, &a_desc)?
    };
    let b_top = b_desc.submatrix(0, 0, m, nrhs)?;

    let sequence = Sequence::new();
    let request = Request::new();
    {
        let a = FlatMut::new(a, m, n, lda)?;
        let b_in = FlatRef::new(b, m, nrhs, ldb)?;
        ctx.region(|region| {
            ge2desc(region, a.as_ref(), &a_desc, &sequence, &request);
            ge2desc(region, b_in, &b_top, &sequence, &request);
            if m >= n {
                geqrf_tile(ctx, region, &a_desc, &factor, &sequence, &request);
                geqrs_tile(ctx, region, &a_desc, &factor, &b_desc, &sequence, &request);
            } else {
                gelqf_tile(ctx, region, &a_desc, &factor, &sequence, &request);
                gelqs_tile(ctx, region, &a_desc, &factor, &b_desc, &sequence, &request);
            }
            desc2ge(region, &a_desc, &a, &sequence, &request);
        });
    }
    sequence.status()?;

    let b = FlatMut::new(b, mn, nrhs, ldb)?;
    ctx.region(|region| desc2ge(region, &b_desc, &b, &sequence, &request));
    sequence.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        linalg::{qr::compute::geqrf, test_utils::*},
        Parallelism,
    };
    use assert_approx_eq::assert_approx_eq;

    fn ctx(nb: usize, ib: usize) -> Context {
        Context::builder()
            .tile_size(nb)
            .inner_block_size(ib)
            .parallelism(Parallelism::Rayon(0))
            .build()
            .unwrap()
    }

    #[test]
    fn overdetermined_residual_is_orthogonal_to_the_range() {
        let ctx = ctx(4, 2);
        let (m, n, nrhs) = (23, 9, 3);
        let a0 = random(m, n);
        let b0 = random(m, nrhs);
        let mut a = a0.clone();
        let mut b = b0.clone();
        gels(&ctx, m, n, nrhs, &mut a, m, &mut b, m).unwrap();

        let mut x = vec![0.0; n * nrhs];
        for j in 0..nrhs {
            x[j * n..(j + 1) * n].copy_from_slice(&b[j * m..j * m + n]);
        }
        let ax = matmul(false, m, n, nrhs, &a0, &x);
        let r: Vec<f64> = ax.iter().zip(&b0).map(|(x, y)| x - y).collect();
        // normal equations: a^T (a x - b) = 0
        let atr = matmul(true, n, m, nrhs, &a0, &r);
        for v in atr {
            assert_approx_eq!(v, 0.0, 1e-10);
        }
    }

    #[test]
    fn underdetermined_solution_has_minimum_norm() {
        let ctx = ctx(3, 3);
        let (m, n, nrhs) = (5, 12, 2);
        let a0 = random(m, n);
        let b0 = random(m, nrhs);
        let ldb = n;
        let mut a = a0.clone();
        // rows m..n of b are padding and must not influence the result
        let mut b = vec![f64::NAN; ldb * nrhs];
        for j in 0..nrhs {
            b[j * ldb..j * ldb + m].copy_from_slice(&b0[j * m..(j + 1) * m]);
        }
        gels(&ctx, m, n, nrhs, &mut a, m, &mut b, ldb).unwrap();

        let ax = matmul(false, m, n, nrhs, &a0, &b);
        for (x, y) in ax.iter().zip(&b0) {
            assert_approx_eq!(x, y, 1e-10);
        }
        // the minimum norm solution lies in the range of a^T: x = a^T y with a a^T y = b
        let aat = matmul(false, m, n, m, &a0, &transpose(m, n, &a0));
        let mut y = b0.clone();
        let mut aat_copy = aat.clone();
        solve_dense(m, nrhs, &mut aat_copy, &mut y);
        let x = matmul(true, n, m, nrhs, &a0, &y);
        for (u, v) in b.iter().zip(&x) {
            assert_approx_eq!(u, v, 1e-9);
        }
    }

    fn transpose(m: usize, n: usize, a: &[f64]) -> Vec<f64> {
        let mut t = vec![0.0; m * n];
        for j in 0..n {
            for i in 0..m {
                t[j + i * n] = a[i + j * m];
            }
        }
        t
    }

    // gaussian elimination without pivoting, for a well conditioned spd matrix
    fn solve_dense(n: usize, nrhs: usize, a: &mut [f64], b: &mut [f64]) {
        for k in 0..n {
            for i in k + 1..n {
                let l = a[i + k * n] / a[k + k * n];
                for j in k..n {
                    a[i + j * n] -= l * a[k + j * n];
                }
                for j in 0..nrhs {
                    b[i + j * n] -= l * b[k + j * n];
                }
            }
        }
        for j in 0..nrhs {
            for k in (0..n).rev() {
                let mut s = b[k + j * n];
                for p in k + 1..n {
                    s -= a[k + p * n] * b[p + j * n];
                }
                b[k + j * n] = s / a[k + k * n];
            }
        }
    }

    #[test]
    fn factor_then_solve() {
        let ctx = ctx(4, 4);
        let (m, n) = (10, 10);
        let a0 = random(m, n);
        let x0 = random(n, 1);
        let b0 = matmul(false, m, n, 1, &a0, &x0);
        let mut a = a0.clone();
        let factor = geqrf(&ctx, m, n, &mut a, m).unwrap();
        let mut b = b0.clone();
        geqrs(&ctx, m, n, 1, &a, m, &factor, &mut b, m).unwrap();
        for (x, y) in b.iter().zip(&x0) {
            assert_approx_eq!(x, y, 1e-8);
        }
    }

    #[test]
    fn empty_system_zeroes_every_row_of_b() {
        let ctx = ctx(4, 2);
        let ldb = 9;
        for (m, n) in [(0, 5), (7, 0), (0, 0)] {
            let mn = Ord::max(m, n);
            let mut a = vec![1.0; Ord::max(1, m) * n];
            let mut b = vec![3.0; ldb * 2];
            gels(&ctx, m, n, 2, &mut a, Ord::max(1, m), &mut b, ldb).unwrap();
            for j in 0..2 {
                for i in 0..ldb {
                    let expected = if i < mn { 0.0 } else { 3.0 };
                    assert_eq!(b[i + j * ldb], expected);
                }
            }
        }
    }

    #[test]
    fn argument_errors() {
        let ctx = ctx(4, 2);
        let mut a = vec![0.0f64; 12];
        let mut b = vec![0.0f64; 4];
        assert_eq!(
            gels(&ctx, 3, 4, 1, &mut a, 3, &mut b, 3).unwrap_err(),
            Error::IllegalArgument { index: 7 }
        );
        assert_eq!(
            gels(&ctx, 3, 4, 1, &mut a, 2, &mut b, 4).unwrap_err(),
            Error::IllegalArgument { index: 5 }
        );
        assert_eq!(
            gels(&ctx, 3, 4, 2, &mut a, 3, &mut b, 4).unwrap_err(),
            Error::IllegalArgument { index: 6 }
        );
    }
}
