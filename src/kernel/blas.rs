//! BLAS-like tile kernels.
//!
//! Every product is routed through [`matmul`], which dispatches to the `gemm` crate. Triangular
//! solves and products, rank updates and factorizations split their operands recursively, so that
//! all but a small diagonal base case is computed as a matrix product.

use crate::{
    desc::MatrixType,
    error::{Error, Result},
    field::RealField,
    mat::{TileMut, TileRef},
    Diag, Side, Trans, Uplo,
};
use equator::assert;
use reborrow::*;

/// Size below which the recursive kernels switch to their unblocked base case.
pub(crate) const RECURSION_THRESHOLD: usize = 16;

#[inline]
fn op<E>(a: TileRef<'_, E>, trans: Trans) -> TileRef<'_, E> {
    if trans.is_trans() {
        a.transpose()
    } else {
        a
    }
}

#[inline]
fn scale_or_zero<E: RealField>(beta: E, x: E) -> E {
    if beta == E::zero() {
        E::zero()
    } else {
        beta * x
    }
}

/// Factor applied to the destination of a product: `None` when the destination is overwritten
/// without being read.
#[inline]
pub(crate) fn accumulate<E: RealField>(beta: E) -> Option<E> {
    if beta == E::zero() {
        None
    } else {
        Some(beta)
    }
}

fn scale<E: RealField>(alpha: E, mut a: TileMut<'_, E>) {
    if alpha == E::zero() {
        a.fill(E::zero());
    } else if alpha != E::one() {
        for j in 0..a.ncols() {
            for i in 0..a.nrows() {
                a.write(i, j, alpha * a.read(i, j));
            }
        }
    }
}

/// Computes the matrix product `[alpha * acc] + beta * lhs * rhs` and stores the result in
/// `acc`.
///
/// If `alpha` is `None`, `acc` is overwritten without being read.
///
/// # Panics
///
/// Panics if the dimensions of the operands do not match.
#[track_caller]
pub fn matmul<E: RealField>(
    mut acc: TileMut<'_, E>,
    lhs: TileRef<'_, E>,
    rhs: TileRef<'_, E>,
    alpha: Option<E>,
    beta: E,
) {
    assert!(all(
        acc.nrows() == lhs.nrows(),
        acc.ncols() == rhs.ncols(),
        lhs.ncols() == rhs.nrows()
    ));
    let (m, n, k) = (acc.nrows(), acc.ncols(), lhs.ncols());
    if m == 0 || n == 0 {
        return;
    }
    if k == 0 {
        match alpha {
            Some(alpha) => scale(alpha, acc),
            None => acc.fill(E::zero()),
        }
        return;
    }

    let (dst_rs, dst_cs) = (acc.row_stride(), acc.col_stride());
    // tiles are already distributed over the workers, each product runs on its own thread
    unsafe {
        ::gemm::gemm(
            m,
            n,
            k,
            acc.rb_mut().as_ptr(),
            dst_cs,
            dst_rs,
            alpha.is_some(),
            lhs.as_ptr(),
            lhs.col_stride(),
            lhs.row_stride(),
            rhs.as_ptr(),
            rhs.col_stride(),
            rhs.row_stride(),
            alpha.unwrap_or(E::zero()),
            beta,
            false,
            false,
            false,
            ::gemm::Parallelism::None,
        )
    }
}

/// Computes `c := alpha * op(a) * op(b) + beta * c`.
///
/// If `beta` is zero, `c` is not read.
pub fn gemm<E: RealField>(
    transa: Trans,
    transb: Trans,
    alpha: E,
    a: TileRef<'_, E>,
    b: TileRef<'_, E>,
    beta: E,
    c: TileMut<'_, E>,
) -> Result<()> {
    let a = op(a, transa);
    let b = op(b, transb);
    let (m, n, k) = (c.nrows(), c.ncols(), a.ncols());
    if a.nrows() != m || b.nrows() != k || b.ncols() != n {
        return Err(Error::IllegalValue);
    }
    matmul(c, a, b, accumulate(beta), alpha);
    Ok(())
}

/// Solves `op(a) * x = alpha * b` (left) or `x * op(a) = alpha * b` (right) with `a`
/// triangular, overwriting `b` with `x`.
pub fn trsm<E: RealField>(
    side: Side,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: E,
    a: TileRef<'_, E>,
    b: TileMut<'_, E>,
) -> Result<()> {
    // x op(a) = b  <=>  op(a)^T x^T = b^T
    let (trans, mut b) = match side {
        Side::Left => (trans, b),
        Side::Right => (trans.flip(), b.transpose()),
    };
    let (a, lower) = if trans.is_trans() {
        (a.transpose(), uplo == Uplo::Upper)
    } else {
        (a, uplo == Uplo::Lower)
    };
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(Error::IllegalValue);
    }
    scale(alpha, b.rb_mut());
    solve_triangular_in_place(a, lower, diag, b);
    Ok(())
}

/// Overwrites `b` with `a^-1 b`, where `a` is the `lower` or upper triangle of a square view.
pub(crate) fn solve_triangular_in_place<E: RealField>(
    a: TileRef<'_, E>,
    lower: bool,
    diag: Diag,
    b: TileMut<'_, E>,
) {
    let n = a.nrows();
    if n <= RECURSION_THRESHOLD {
        solve_triangular_unblocked(a, lower, diag, b);
        return;
    }

    let bs = n / 2;
    let a00 = a.submatrix(0, 0, bs, bs);
    let a11 = a.submatrix(bs, bs, n - bs, n - bs);
    let (mut top, mut bottom) = b.split_at_row(bs);
    if lower {
        solve_triangular_in_place(a00, lower, diag, top.rb_mut());
        let a10 = a.submatrix(bs, 0, n - bs, bs);
        matmul(bottom.rb_mut(), a10, top.rb(), Some(E::one()), -E::one());
        solve_triangular_in_place(a11, lower, diag, bottom);
    } else {
        solve_triangular_in_place(a11, lower, diag, bottom.rb_mut());
        let a01 = a.submatrix(0, bs, bs, n - bs);
        matmul(top.rb_mut(), a01, bottom.rb(), Some(E::one()), -E::one());
        solve_triangular_in_place(a00, lower, diag, top);
    }
}

fn solve_triangular_unblocked<E: RealField>(
    a: TileRef<'_, E>,
    lower: bool,
    diag: Diag,
    mut b: TileMut<'_, E>,
) {
    let n = a.nrows();
    for col in 0..b.ncols() {
        if lower {
            for i in 0..n {
                let mut acc = b.read(i, col);
                for p in 0..i {
                    acc = acc - a.read(i, p) * b.read(p, col);
                }
                if diag == Diag::NonUnit {
                    acc = acc / a.read(i, i);
                }
                b.write(i, col, acc);
            }
        } else {
            for i in (0..n).rev() {
                let mut acc = b.read(i, col);
                for p in i + 1..n {
                    acc = acc - a.read(i, p) * b.read(p, col);
                }
                if diag == Diag::NonUnit {
                    acc = acc / a.read(i, i);
                }
                b.write(i, col, acc);
            }
        }
    }
}

/// Computes `b := alpha * op(a) * b` (left) or `b := alpha * b * op(a)` (right) with `a`
/// triangular.
pub fn trmm<E: RealField>(
    side: Side,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: E,
    a: TileRef<'_, E>,
    b: TileMut<'_, E>,
) -> Result<()> {
    // b op(a) = (op(a)^T b^T)^T
    let (trans, mut b) = match side {
        Side::Left => (trans, b),
        Side::Right => (trans.flip(), b.transpose()),
    };
    let (a, lower) = if trans.is_trans() {
        (a.transpose(), uplo == Uplo::Upper)
    } else {
        (a, uplo == Uplo::Lower)
    };
    if a.nrows() != a.ncols() || a.nrows() != b.nrows() {
        return Err(Error::IllegalValue);
    }
    scale(alpha, b.rb_mut());
    mul_triangular_in_place(a, lower, diag, b);
    Ok(())
}

/// Overwrites `b` with `a b`, where `a` is the `lower` or upper triangle of a square view.
pub(crate) fn mul_triangular_in_place<E: RealField>(
    a: TileRef<'_, E>,
    lower: bool,
    diag: Diag,
    b: TileMut<'_, E>,
) {
    let n = a.nrows();
    if n <= RECURSION_THRESHOLD {
        mul_triangular_unblocked(a, lower, diag, b);
        return;
    }

    let bs = n / 2;
    let a00 = a.submatrix(0, 0, bs, bs);
    let a11 = a.submatrix(bs, bs, n - bs, n - bs);
    let (mut top, mut bottom) = b.split_at_row(bs);
    if lower {
        mul_triangular_in_place(a11, lower, diag, bottom.rb_mut());
        let a10 = a.submatrix(bs, 0, n - bs, bs);
        matmul(bottom, a10, top.rb(), Some(E::one()), E::one());
        mul_triangular_in_place(a00, lower, diag, top);
    } else {
        mul_triangular_in_place(a00, lower, diag, top.rb_mut());
        let a01 = a.submatrix(0, bs, bs, n - bs);
        matmul(top, a01, bottom.rb(), Some(E::one()), E::one());
        mul_triangular_in_place(a11, lower, diag, bottom);
    }
}

fn mul_triangular_unblocked<E: RealField>(
    a: TileRef<'_, E>,
    lower: bool,
    diag: Diag,
    mut b: TileMut<'_, E>,
) {
    let n = a.nrows();
    let diagonal = |i: usize| match diag {
        Diag::NonUnit => a.read(i, i),
        Diag::Unit => E::one(),
    };
    for col in 0..b.ncols() {
        // rows are overwritten in the order their inputs stop being needed
        if lower {
            for i in (0..n).rev() {
                let mut acc = diagonal(i) * b.read(i, col);
                for p in 0..i {
                    acc = acc + a.read(i, p) * b.read(p, col);
                }
                b.write(i, col, acc);
            }
        } else {
            for i in 0..n {
                let mut acc = diagonal(i) * b.read(i, col);
                for p in i + 1..n {
                    acc = acc + a.read(i, p) * b.read(p, col);
                }
                b.write(i, col, acc);
            }
        }
    }
}

/// Computes the `uplo` triangle of `c := alpha * op(a) * op(a)^T + beta * c`.
pub fn syrk<E: RealField>(
    uplo: Uplo,
    trans: Trans,
    alpha: E,
    a: TileRef<'_, E>,
    beta: E,
    c: TileMut<'_, E>,
) -> Result<()> {
    let a = op(a, trans);
    let n = c.nrows();
    if c.ncols() != n || a.nrows() != n {
        return Err(Error::IllegalValue);
    }
    // the upper triangle of c is the lower triangle of c^T, and a a^T is symmetric
    let c = match uplo {
        Uplo::Lower => c,
        Uplo::Upper => c.transpose(),
    };
    rank_update_lower(c, a, a, accumulate(beta), alpha);
    Ok(())
}

/// Computes the `uplo` triangle of
/// `c := alpha * op(a) * op(b)^T + alpha * op(b) * op(a)^T + beta * c`.
pub fn syr2k<E: RealField>(
    uplo: Uplo,
    trans: Trans,
    alpha: E,
    a: TileRef<'_, E>,
    b: TileRef<'_, E>,
    beta: E,
    c: TileMut<'_, E>,
) -> Result<()> {
    let a = op(a, trans);
    let b = op(b, trans);
    let n = c.nrows();
    if c.ncols() != n || a.nrows() != n || b.nrows() != n || a.ncols() != b.ncols() {
        return Err(Error::IllegalValue);
    }
    let mut c = match uplo {
        Uplo::Lower => c,
        Uplo::Upper => c.transpose(),
    };
    rank_update_lower(c.rb_mut(), a, b, accumulate(beta), alpha);
    rank_update_lower(c, b, a, Some(E::one()), alpha);
    Ok(())
}

/// Computes the lower triangle of `[alpha * acc] + beta * lhs * rhs^T` and stores it in `acc`.
pub(crate) fn rank_update_lower<E: RealField>(
    acc: TileMut<'_, E>,
    lhs: TileRef<'_, E>,
    rhs: TileRef<'_, E>,
    alpha: Option<E>,
    beta: E,
) {
    let n = acc.nrows();
    if n <= RECURSION_THRESHOLD {
        rank_update_lower_unblocked(acc, lhs, rhs, alpha, beta);
        return;
    }

    let bs = n / 2;
    let k = lhs.ncols();
    let (left, right) = acc.split_at_col(bs);
    let (acc00, acc10) = left.split_at_row(bs);
    let acc11 = right.submatrix(bs, 0, n - bs, n - bs);
    let (lhs0, lhs1) = (lhs.submatrix(0, 0, bs, k), lhs.submatrix(bs, 0, n - bs, k));
    let (rhs0, rhs1) = (rhs.submatrix(0, 0, bs, k), rhs.submatrix(bs, 0, n - bs, k));

    rank_update_lower(acc00, lhs0, rhs0, alpha, beta);
    matmul(acc10, lhs1, rhs0.transpose(), alpha, beta);
    rank_update_lower(acc11, lhs1, rhs1, alpha, beta);
}

fn rank_update_lower_unblocked<E: RealField>(
    mut acc: TileMut<'_, E>,
    lhs: TileRef<'_, E>,
    rhs: TileRef<'_, E>,
    alpha: Option<E>,
    beta: E,
) {
    let (n, k) = (acc.nrows(), lhs.ncols());
    for j in 0..n {
        for i in j..n {
            let mut dot = E::zero();
            for p in 0..k {
                dot = dot + lhs.read(i, p) * rhs.read(j, p);
            }
            let prev = match alpha {
                Some(alpha) => scale_or_zero(alpha, acc.read(i, j)),
                None => E::zero(),
            };
            acc.write(i, j, beta * dot + prev);
        }
    }
}

#[inline]
fn in_triangle(uplo: Option<Uplo>, i: usize, j: usize) -> bool {
    match uplo {
        None => true,
        Some(Uplo::Lower) => i >= j,
        Some(Uplo::Upper) => i <= j,
    }
}

fn add<E: RealField>(
    uplo: Option<Uplo>,
    trans: Trans,
    alpha: E,
    a: TileRef<'_, E>,
    beta: E,
    mut b: TileMut<'_, E>,
) -> Result<()> {
    let a = op(a, trans);
    if a.nrows() != b.nrows() || a.ncols() != b.ncols() {
        return Err(Error::IllegalValue);
    }
    for j in 0..b.ncols() {
        for i in 0..b.nrows() {
            if in_triangle(uplo, i, j) {
                let prev = scale_or_zero(beta, b.read(i, j));
                b.write(i, j, alpha * a.read(i, j) + prev);
            }
        }
    }
    Ok(())
}

/// Computes `b := alpha * op(a) + beta * b`.
pub fn geadd<E: RealField>(
    trans: Trans,
    alpha: E,
    a: TileRef<'_, E>,
    beta: E,
    b: TileMut<'_, E>,
) -> Result<()> {
    add(None, trans, alpha, a, beta, b)
}

/// Computes the `uplo` trapezoid of `b := alpha * op(a) + beta * b`.
pub fn tradd<E: RealField>(
    uplo: Uplo,
    trans: Trans,
    alpha: E,
    a: TileRef<'_, E>,
    beta: E,
    b: TileMut<'_, E>,
) -> Result<()> {
    add(Some(uplo), trans, alpha, a, beta, b)
}

/// Sets the off-diagonal elements of the `kind` part of `a` to `alpha` and its diagonal to `beta`.
pub fn laset<E: RealField>(kind: MatrixType, alpha: E, beta: E, mut a: TileMut<'_, E>) {
    let uplo = match kind {
        MatrixType::General => None,
        MatrixType::Upper => Some(Uplo::Upper),
        MatrixType::Lower => Some(Uplo::Lower),
    };
    for j in 0..a.ncols() {
        for i in 0..a.nrows() {
            if i == j {
                a.write(i, j, beta);
            } else if in_triangle(uplo, i, j) {
                a.write(i, j, alpha);
            }
        }
    }
}

/// Stores in `values[0, j]` the largest absolute value of column `j` of `a`.
///
/// `values` is a `1×n` view; a row-wise reduction is the column-wise reduction of `a^T`.
pub fn amax<E: RealField>(a: TileRef<'_, E>, mut values: TileMut<'_, E>) -> Result<()> {
    if values.nrows() != 1 || values.ncols() != a.ncols() {
        return Err(Error::IllegalValue);
    }
    for j in 0..a.ncols() {
        let mut max = E::zero();
        for i in 0..a.nrows() {
            let x = a.read(i, j).abs();
            if x > max {
                max = x;
            }
        }
        values.write(0, j, max);
    }
    Ok(())
}

/// Copies the `kind` part of `src` into `dst`.
pub fn lacpy<E: RealField>(kind: MatrixType, src: TileRef<'_, E>, mut dst: TileMut<'_, E>) {
    let uplo = match kind {
        MatrixType::General => None,
        MatrixType::Upper => Some(Uplo::Upper),
        MatrixType::Lower => Some(Uplo::Lower),
    };
    for j in 0..dst.ncols() {
        for i in 0..dst.nrows() {
            if in_triangle(uplo, i, j) {
                dst.write(i, j, src.read(i, j));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::assert;

    fn random(m: usize, n: usize) -> Vec<f64> {
        (0..m * n).map(|_| rand::random::<f64>() - 0.5).collect()
    }

    #[test]
    fn gemm_with_transposes() {
        let (m, n, k) = (4, 3, 5);
        let a = random(k, m);
        let b = random(n, k);
        let c0 = random(m, n);
        let mut c = c0.clone();
        gemm(
            Trans::Trans,
            Trans::Trans,
            2.0,
            TileRef::from_col_major_slice(&a, k, m, k),
            TileRef::from_col_major_slice(&b, n, k, n),
            -1.0,
            TileMut::from_col_major_slice(&mut c, m, n, m),
        )
        .unwrap();
        for j in 0..n {
            for i in 0..m {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += a[p + i * k] * b[j + p * n];
                }
                assert_approx_eq!(c[i + j * m], 2.0 * acc - c0[i + j * m]);
            }
        }
    }

    #[test]
    fn trsm_all_sides_and_triangles() {
        // 40 goes through the recursive split
        for (n, nrhs) in [(5, 3), (40, 19)] {
            trsm_case(n, nrhs);
        }
    }

    fn trsm_case(n: usize, nrhs: usize) {
        let mut a = random(n, n);
        for i in 0..n {
            a[i + i * n] += 4.0;
        }
        for side in [Side::Left, Side::Right] {
            for uplo in [Uplo::Lower, Uplo::Upper] {
                for trans in [Trans::NoTrans, Trans::ConjTrans] {
                    for diag in [Diag::NonUnit, Diag::Unit] {
                        let (bm, bn) = match side {
                            Side::Left => (n, nrhs),
                            Side::Right => (nrhs, n),
                        };
                        let b0 = random(bm, bn);
                        let mut x = b0.clone();
                        trsm(
                            side,
                            uplo,
                            trans,
                            diag,
                            0.5,
                            TileRef::from_col_major_slice(&a, n, n, n),
                            TileMut::from_col_major_slice(&mut x, bm, bn, bm),
                        )
                        .unwrap();

                        // rebuild op(tri(a)) explicitly and check the product
                        let tri = |i: usize, j: usize| -> f64 {
                            let (i, j) = if trans.is_trans() { (j, i) } else { (i, j) };
                            if i == j {
                                if diag == Diag::Unit { 1.0 } else { a[i + j * n] }
                            } else if (uplo == Uplo::Lower) == (i > j) {
                                a[i + j * n]
                            } else {
                                0.0
                            }
                        };
                        for j in 0..bn {
                            for i in 0..bm {
                                let mut acc = 0.0;
                                match side {
                                    Side::Left => {
                                        for p in 0..n {
                                            acc += tri(i, p) * x[p + j * bm];
                                        }
                                    }
                                    Side::Right => {
                                        for p in 0..n {
                                            acc += x[i + p * bm] * tri(p, j);
                                        }
                                    }
                                }
                                assert_approx_eq!(acc, 0.5 * b0[i + j * bm], 1e-10);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn syrk_touches_one_triangle() {
        let (n, k) = (4, 3);
        let a = random(n, k);
        let mut c = vec![7.0; n * n];
        syrk(
            Uplo::Lower,
            Trans::NoTrans,
            1.0,
            TileRef::from_col_major_slice(&a, n, k, n),
            0.0,
            TileMut::from_col_major_slice(&mut c, n, n, n),
        )
        .unwrap();
        for j in 0..n {
            for i in 0..n {
                if i < j {
                    assert_eq!(c[i + j * n], 7.0);
                } else {
                    let acc: f64 = (0..k).map(|p| a[i + p * n] * a[j + p * n]).sum();
                    assert_approx_eq!(c[i + j * n], acc);
                }
            }
        }
    }

    #[test]
    fn syrk_on_large_tiles() {
        let (n, k) = (37, 21);
        for uplo in [Uplo::Lower, Uplo::Upper] {
            for trans in [Trans::NoTrans, Trans::Trans] {
                let (am, an) = if trans.is_trans() { (k, n) } else { (n, k) };
                let a = random(am, an);
                let c0 = random(n, n);
                let mut c = c0.clone();
                syrk(
                    uplo,
                    trans,
                    -1.0,
                    TileRef::from_col_major_slice(&a, am, an, am),
                    0.5,
                    TileMut::from_col_major_slice(&mut c, n, n, n),
                )
                .unwrap();
                let op = |i: usize, p: usize| {
                    if trans.is_trans() {
                        a[p + i * am]
                    } else {
                        a[i + p * am]
                    }
                };
                for j in 0..n {
                    for i in 0..n {
                        let stored = match uplo {
                            Uplo::Lower => i >= j,
                            Uplo::Upper => i <= j,
                        };
                        if stored {
                            let acc: f64 = (0..k).map(|p| op(i, p) * op(j, p)).sum();
                            assert_approx_eq!(c[i + j * n], 0.5 * c0[i + j * n] - acc, 1e-10);
                        } else {
                            assert_eq!(c[i + j * n], c0[i + j * n]);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn matmul_on_strided_views() {
        let (m, n, k) = (33, 18, 27);
        let ld = 41;
        let a = random(ld, m);
        let b = random(ld, n);
        let c0 = random(ld, n);
        let mut c = c0.clone();
        // lhs is the transpose of a column-major block, acc is a block inside a larger buffer
        matmul(
            TileMut::from_col_major_slice(&mut c, ld, n, ld).submatrix(3, 0, m, n),
            TileRef::from_col_major_slice(&a, ld, m, ld)
                .submatrix(0, 0, k, m)
                .transpose(),
            TileRef::from_col_major_slice(&b, ld, n, ld).submatrix(5, 0, k, n),
            Some(2.0),
            -1.0,
        );
        for j in 0..n {
            for i in 0..ld {
                if (3..3 + m).contains(&i) {
                    let acc: f64 = (0..k).map(|p| a[p + (i - 3) * ld] * b[5 + p + j * ld]).sum();
                    assert_approx_eq!(c[i + j * ld], 2.0 * c0[i + j * ld] - acc, 1e-10);
                } else {
                    assert_eq!(c[i + j * ld], c0[i + j * ld]);
                }
            }
        }
    }

    #[test]
    fn laset_and_tradd() {
        let n = 4;
        let mut a = vec![9.0; n * n];
        laset(
            MatrixType::Upper,
            1.0,
            2.0,
            TileMut::from_col_major_slice(&mut a, n, n, n),
        );
        for j in 0..n {
            for i in 0..n {
                let expected = if i == j {
                    2.0
                } else if i < j {
                    1.0
                } else {
                    9.0
                };
                assert_eq!(a[i + j * n], expected);
            }
        }

        let mut b = vec![1.0; n * n];
        tradd(
            Uplo::Lower,
            Trans::Trans,
            1.0,
            TileRef::from_col_major_slice(&a, n, n, n),
            3.0,
            TileMut::from_col_major_slice(&mut b, n, n, n),
        )
        .unwrap();
        for j in 0..n {
            for i in 0..n {
                let expected = if i >= j { a[j + i * n] + 3.0 } else { 1.0 };
                assert_eq!(b[i + j * n], expected);
            }
        }
    }
}
