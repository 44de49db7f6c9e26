use crate::{
    error::{Error, Result},
    field::RealField,
    kernel::blas::{rank_update_lower, solve_triangular_in_place, RECURSION_THRESHOLD},
    mat::TileMut,
    Diag, Uplo,
};
use reborrow::*;

/// Computes the Cholesky factor of the `uplo` triangle of `a` in place.
///
/// The other triangle is not accessed.
///
/// # Errors
///
/// Returns [`Error::Kernel`] with the 1-based order of the leading minor that is not positive
/// definite. The columns before it hold the partial factor.
pub fn potrf<E: RealField>(uplo: Uplo, a: TileMut<'_, E>) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(Error::IllegalValue);
    }
    // a = u^T u  <=>  a^T = l l^T with l = u^T
    let a = match uplo {
        Uplo::Lower => a,
        Uplo::Upper => a.transpose(),
    };
    cholesky_in_place(a)
}

// recursive left/right split: factor a00, solve for a10, update and factor a11
fn cholesky_in_place<E: RealField>(a: TileMut<'_, E>) -> Result<()> {
    let n = a.nrows();
    if n <= RECURSION_THRESHOLD {
        return cholesky_in_place_unblocked(a);
    }

    let bs = n / 2;
    let (left, right) = a.split_at_col(bs);
    let (mut a00, mut a10) = left.split_at_row(bs);
    let mut a11 = right.submatrix(bs, 0, n - bs, n - bs);

    cholesky_in_place(a00.rb_mut())?;
    // a10 l00^T = a10  <=>  l00 a10^T = a10^T
    solve_triangular_in_place(a00.rb(), true, Diag::NonUnit, a10.rb_mut().transpose());
    rank_update_lower(a11.rb_mut(), a10.rb(), a10.rb(), Some(E::one()), -E::one());
    cholesky_in_place(a11).map_err(|err| err.offset(bs))
}

fn cholesky_in_place_unblocked<E: RealField>(mut a: TileMut<'_, E>) -> Result<()> {
    let n = a.nrows();
    for j in 0..n {
        let mut d = a.read(j, j);
        for p in 0..j {
            let ljp = a.read(j, p);
            d = d - ljp * ljp;
        }
        if !(d > E::zero()) {
            return Err(Error::Kernel { info: j + 1 });
        }
        let d = d.sqrt();
        a.write(j, j, d);
        let inv = d.recip();

        for i in j + 1..n {
            let mut acc = a.read(i, j);
            for p in 0..j {
                acc = acc - a.read(i, p) * a.read(j, p);
            }
            a.write(i, j, acc * inv);
        }
    }
    Ok(())
}
