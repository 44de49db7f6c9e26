//! The Cholesky decomposition of a symmetric positive definite matrix $A$ is such that:
//! $$A = LL^\top = U^\top U,$$
//! where $L$ is a lower triangular matrix, and $U = L^\top$.
//!
//! Only the triangle selected by [`Uplo`](crate::Uplo) is accessed and overwritten.

use crate::{
    desc::{MatrixType, TileDesc},
    error::Result,
    linalg::Grid,
    Uplo,
};

/// Computing the decomposition.
pub mod compute;
/// Computing the inverse of the matrix from the decomposition.
pub mod inverse;
/// Solving a linear system using the decomposition.
pub mod solve;

pub use compute::{potrf, potrf_tile};
pub use inverse::{poinv, poinv_tile, potri, potri_tile};
pub use solve::{posv, posv_tile, potrs, potrs_tile};

/// Returns `true` if `a` is square, with square tiles aligned on its diagonal.
pub(crate) fn is_square<E>(a: &TileDesc<E>) -> bool {
    let grid = Grid::new(a, false);
    a.check().is_ok() && a.m() == a.n() && grid.row_tiling() == grid.col_tiling()
}

/// `n×n` descriptor holding the `uplo` triangle of a matrix.
pub(crate) fn triangle_desc<E: crate::field::RealField>(uplo: Uplo, nb: usize, n: usize) -> Result<TileDesc<E>> {
    let kind = match uplo {
        Uplo::Lower => MatrixType::Lower,
        Uplo::Upper => MatrixType::Upper,
    };
    TileDesc::new(kind, nb, nb, n, n)
}
