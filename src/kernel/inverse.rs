//! Triangular inversion kernels, the building blocks of the inverse of a Cholesky factorization.
//!
//! Both kernels work on the lower triangle. The upper variants go through the transposed view:
//! $(U^{-1})^\top = (U^\top)^{-1}$ and $U U^\top = L^\top L$ with $L = U^\top$.

use crate::{
    error::{Error, Result},
    field::RealField,
    kernel::blas::{
        mul_triangular_in_place, rank_update_lower, solve_triangular_in_place, RECURSION_THRESHOLD,
    },
    mat::TileMut,
    Diag, Uplo,
};
use reborrow::*;

#[inline]
fn lower_view<E>(uplo: Uplo, a: TileMut<'_, E>) -> TileMut<'_, E> {
    match uplo {
        Uplo::Lower => a,
        Uplo::Upper => a.transpose(),
    }
}

/// Overwrites the `uplo` triangle of `a` with its inverse.
///
/// A zero diagonal element is reported as [`Error::Kernel`] with its 1-based index, and `a` is
/// left untouched.
pub fn trtri<E: RealField>(uplo: Uplo, diag: Diag, a: TileMut<'_, E>) -> Result<()> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(Error::IllegalValue);
    }
    if diag == Diag::NonUnit {
        if let Some(i) = (0..n).find(|&i| a.read(i, i) == E::zero()) {
            return Err(Error::Kernel { info: i + 1 });
        }
    }
    invert_lower_in_place(lower_view(uplo, a), diag);
    Ok(())
}

fn invert_lower_in_place<E: RealField>(a: TileMut<'_, E>, diag: Diag) {
    let n = a.nrows();
    if n <= RECURSION_THRESHOLD {
        invert_lower_unblocked(a, diag);
        return;
    }

    // [l00 0; l10 l11]^-1 = [l00^-1 0; -l11^-1 l10 l00^-1 l11^-1]
    let bs = n / 2;
    let (left, right) = a.split_at_col(bs);
    let (mut a00, mut a10) = left.split_at_row(bs);
    let mut a11 = right.submatrix(bs, 0, n - bs, n - bs);

    invert_lower_in_place(a00.rb_mut(), diag);
    for j in 0..bs {
        for i in 0..n - bs {
            a10.write(i, j, -a10.read(i, j));
        }
    }
    // a10 <- a10 l00^-1, through the transposed product
    mul_triangular_in_place(a00.rb().transpose(), false, diag, a10.rb_mut().transpose());
    solve_triangular_in_place(a11.rb(), true, diag, a10.rb_mut());
    invert_lower_in_place(a11.rb_mut(), diag);
}

fn invert_lower_unblocked<E: RealField>(mut a: TileMut<'_, E>, diag: Diag) {
    let n = a.nrows();
    for j in (0..n).rev() {
        let ajj = match diag {
            Diag::NonUnit => {
                let inv = E::one() / a.read(j, j);
                a.write(j, j, inv);
                -inv
            }
            Diag::Unit => -E::one(),
        };
        // column j below the diagonal <- -ajj^-1 l_inv[j+1.., j+1..] a[j+1.., j]
        for i in (j + 1..n).rev() {
            let mut acc = match diag {
                Diag::NonUnit => a.read(i, i) * a.read(i, j),
                Diag::Unit => a.read(i, j),
            };
            for p in j + 1..i {
                acc = acc + a.read(i, p) * a.read(p, j);
            }
            a.write(i, j, ajj * acc);
        }
    }
}

/// Overwrites the `uplo` triangle of `a` with $L^\top L$ (lower) or $U U^\top$ (upper), where
/// $L$ or $U$ is that triangle.
pub fn lauum<E: RealField>(uplo: Uplo, a: TileMut<'_, E>) -> Result<()> {
    if a.ncols() != a.nrows() {
        return Err(Error::IllegalValue);
    }
    lower_product_in_place(lower_view(uplo, a));
    Ok(())
}

fn lower_product_in_place<E: RealField>(a: TileMut<'_, E>) {
    let n = a.nrows();
    if n <= RECURSION_THRESHOLD {
        lower_product_unblocked(a);
        return;
    }

    // [l00 0; l10 l11]^T [l00 0; l10 l11] = [l00^T l00 + l10^T l10, *; l11^T l10, l11^T l11]
    let bs = n / 2;
    let (left, right) = a.split_at_col(bs);
    let (mut a00, mut a10) = left.split_at_row(bs);
    let mut a11 = right.submatrix(bs, 0, n - bs, n - bs);

    lower_product_in_place(a00.rb_mut());
    rank_update_lower(
        a00,
        a10.rb().transpose(),
        a10.rb().transpose(),
        Some(E::one()),
        E::one(),
    );
    mul_triangular_in_place(a11.rb().transpose(), false, Diag::NonUnit, a10);
    lower_product_in_place(a11.rb_mut());
}

fn lower_product_unblocked<E: RealField>(mut a: TileMut<'_, E>) {
    let n = a.nrows();
    for i in 0..n {
        let aii = a.read(i, i);
        let mut dot = E::zero();
        for p in i..n {
            dot = dot + a.read(p, i) * a.read(p, i);
        }
        a.write(i, i, dot);
        for k in 0..i {
            let mut acc = aii * a.read(i, k);
            for p in i + 1..n {
                acc = acc + a.read(p, i) * a.read(p, k);
            }
            a.write(i, k, acc);
        }
    }
}
