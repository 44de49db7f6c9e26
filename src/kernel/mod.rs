//! Tile kernel backends.
//!
//! The tiled algorithms never compute on matrix elements themselves, they submit calls to a
//! [`TileKernels`] implementation carried by the [`Context`](crate::Context). Every method has a
//! default in-process implementation, so a backend only overrides the kernels it accelerates.
//!
//! Kernels receive their operands as strided views. Transposed views are valid operands, which
//! the default implementations rely on: the right-side variants are expressed through the
//! left-side ones, and every LQ kernel through its QR counterpart.

use crate::{
    desc::MatrixType,
    error::Result,
    field::RealField,
    mat::{TileMut, TileRef},
    Diag, Side, Trans, Uplo,
};

pub mod blas;
pub mod cholesky;
pub mod householder;
pub mod inverse;

use householder::PairShape;

/// Tile kernels used by the tiled algorithms.
///
/// Orthogonal factorization kernels take the inner block size `ib` used to group reflectors.
/// Factor tiles `t` have at least `ib` rows, one column per reflector.
pub trait TileKernels<E: RealField>: Send + Sync {
    /// `c := alpha * op(a) * op(b) + beta * c`.
    fn gemm(
        &self,
        transa: Trans,
        transb: Trans,
        alpha: E,
        a: TileRef<'_, E>,
        b: TileRef<'_, E>,
        beta: E,
        c: TileMut<'_, E>,
    ) -> Result<()> {
        blas::gemm(transa, transb, alpha, a, b, beta, c)
    }

    /// Triangular solve with multiple right-hand sides.
    fn trsm(
        &self,
        side: Side,
        uplo: Uplo,
        trans: Trans,
        diag: Diag,
        alpha: E,
        a: TileRef<'_, E>,
        b: TileMut<'_, E>,
    ) -> Result<()> {
        blas::trsm(side, uplo, trans, diag, alpha, a, b)
    }

    /// Symmetric rank-k update of the `uplo` triangle of `c`.
    fn syrk(
        &self,
        uplo: Uplo,
        trans: Trans,
        alpha: E,
        a: TileRef<'_, E>,
        beta: E,
        c: TileMut<'_, E>,
    ) -> Result<()> {
        blas::syrk(uplo, trans, alpha, a, beta, c)
    }

    /// Triangular matrix product, `b := alpha * op(a) * b` (left) or `b := alpha * b * op(a)`
    /// (right).
    fn trmm(
        &self,
        side: Side,
        uplo: Uplo,
        trans: Trans,
        diag: Diag,
        alpha: E,
        a: TileRef<'_, E>,
        b: TileMut<'_, E>,
    ) -> Result<()> {
        blas::trmm(side, uplo, trans, diag, alpha, a, b)
    }

    /// Symmetric rank-2k update of the `uplo` triangle of `c`.
    fn syr2k(
        &self,
        uplo: Uplo,
        trans: Trans,
        alpha: E,
        a: TileRef<'_, E>,
        b: TileRef<'_, E>,
        beta: E,
        c: TileMut<'_, E>,
    ) -> Result<()> {
        blas::syr2k(uplo, trans, alpha, a, b, beta, c)
    }

    /// Largest absolute value of every column of `a`, stored in the `1×n` view `values`.
    fn amax(&self, a: TileRef<'_, E>, values: TileMut<'_, E>) -> Result<()> {
        blas::amax(a, values)
    }

    /// `b := alpha * op(a) + beta * b`.
    fn geadd(
        &self,
        trans: Trans,
        alpha: E,
        a: TileRef<'_, E>,
        beta: E,
        b: TileMut<'_, E>,
    ) -> Result<()> {
        blas::geadd(trans, alpha, a, beta, b)
    }

    /// `b := alpha * op(a) + beta * b` on the `uplo` trapezoid of `b`.
    fn tradd(
        &self,
        uplo: Uplo,
        trans: Trans,
        alpha: E,
        a: TileRef<'_, E>,
        beta: E,
        b: TileMut<'_, E>,
    ) -> Result<()> {
        blas::tradd(uplo, trans, alpha, a, beta, b)
    }

    /// Sets the off-diagonal elements of the `kind` part of `a` to `alpha`, and the diagonal to
    /// `beta`.
    fn laset(&self, kind: MatrixType, alpha: E, beta: E, a: TileMut<'_, E>) -> Result<()> {
        blas::laset(kind, alpha, beta, a);
        Ok(())
    }

    /// Cholesky factorization of the `uplo` triangle of `a`.
    ///
    /// A matrix that is not positive definite is reported as [`Error::Kernel`](crate::Error)
    /// with the tile-local, 1-based order of the failing minor.
    fn potrf(&self, uplo: Uplo, a: TileMut<'_, E>) -> Result<()> {
        cholesky::potrf(uplo, a)
    }

    /// Inverse of the `uplo` triangle of `a`, in place.
    ///
    /// A zero diagonal element is reported as [`Error::Kernel`](crate::Error) with its tile-local,
    /// 1-based index.
    fn trtri(&self, uplo: Uplo, diag: Diag, a: TileMut<'_, E>) -> Result<()> {
        inverse::trtri(uplo, diag, a)
    }

    /// Product of the `uplo` triangle of `a` with its transpose, $L^\top L$ or $U U^\top$, in
    /// place.
    fn lauum(&self, uplo: Uplo, a: TileMut<'_, E>) -> Result<()> {
        inverse::lauum(uplo, a)
    }

    /// QR factorization of a tile.
    fn geqrt(&self, ib: usize, a: TileMut<'_, E>, t: TileMut<'_, E>) -> Result<()> {
        householder::geqrt(ib, a, t)
    }

    /// Applies the orthogonal factor of a [`geqrt`](TileKernels::geqrt) factorization to `c`.
    fn unmqr(
        &self,
        side: Side,
        trans: Trans,
        ib: usize,
        v: TileRef<'_, E>,
        t: TileRef<'_, E>,
        c: TileMut<'_, E>,
    ) -> Result<()> {
        match side {
            Side::Left => householder::unmqr(trans, ib, v, t, c),
            // c op(q) = (op(q)^T c^T)^T
            Side::Right => householder::unmqr(trans.flip(), ib, v, t, c.transpose()),
        }
    }

    /// QR factorization of an upper triangular tile stacked on top of a full tile.
    fn tsqrt(
        &self,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        t: TileMut<'_, E>,
    ) -> Result<()> {
        householder::pair_qrt(PairShape::Square, ib, a1, a2, t)
    }

    /// Applies the orthogonal factor of a [`tsqrt`](TileKernels::tsqrt) factorization to the
    /// pair `(a1, a2)`, stacked vertically (left) or side by side (right).
    fn tsmqr(
        &self,
        side: Side,
        trans: Trans,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        v: TileRef<'_, E>,
        t: TileRef<'_, E>,
    ) -> Result<()> {
        match side {
            Side::Left => householder::pair_mqr(PairShape::Square, trans, ib, a1, a2, v, t),
            Side::Right => householder::pair_mqr(
                PairShape::Square,
                trans.flip(),
                ib,
                a1.transpose(),
                a2.transpose(),
                v,
                t,
            ),
        }
    }

    /// QR factorization of an upper triangular tile stacked on top of another upper triangular
    /// tile.
    fn ttqrt(
        &self,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        t: TileMut<'_, E>,
    ) -> Result<()> {
        householder::pair_qrt(PairShape::Triangle, ib, a1, a2, t)
    }

    /// Applies the orthogonal factor of a [`ttqrt`](TileKernels::ttqrt) factorization.
    fn ttmqr(
        &self,
        side: Side,
        trans: Trans,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        v: TileRef<'_, E>,
        t: TileRef<'_, E>,
    ) -> Result<()> {
        match side {
            Side::Left => householder::pair_mqr(PairShape::Triangle, trans, ib, a1, a2, v, t),
            Side::Right => householder::pair_mqr(
                PairShape::Triangle,
                trans.flip(),
                ib,
                a1.transpose(),
                a2.transpose(),
                v,
                t,
            ),
        }
    }

    /// LQ factorization of a tile.
    fn gelqt(&self, ib: usize, a: TileMut<'_, E>, t: TileMut<'_, E>) -> Result<()> {
        // a = l q  <=>  a^T = q^T l^T
        self.geqrt(ib, a.transpose(), t)
    }

    /// Applies the orthogonal factor of a [`gelqt`](TileKernels::gelqt) factorization to `c`.
    fn unmlq(
        &self,
        side: Side,
        trans: Trans,
        ib: usize,
        v: TileRef<'_, E>,
        t: TileRef<'_, E>,
        c: TileMut<'_, E>,
    ) -> Result<()> {
        self.unmqr(side, trans.flip(), ib, v.transpose(), t, c)
    }

    /// LQ factorization of a lower triangular tile next to a full tile.
    fn tslqt(
        &self,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        t: TileMut<'_, E>,
    ) -> Result<()> {
        self.tsqrt(ib, a1.transpose(), a2.transpose(), t)
    }

    /// Applies the orthogonal factor of a [`tslqt`](TileKernels::tslqt) factorization.
    fn tsmlq(
        &self,
        side: Side,
        trans: Trans,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        v: TileRef<'_, E>,
        t: TileRef<'_, E>,
    ) -> Result<()> {
        self.tsmqr(side, trans.flip(), ib, a1, a2, v.transpose(), t)
    }

    /// LQ factorization of a lower triangular tile next to another lower triangular tile.
    fn ttlqt(
        &self,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        t: TileMut<'_, E>,
    ) -> Result<()> {
        self.ttqrt(ib, a1.transpose(), a2.transpose(), t)
    }

    /// Applies the orthogonal factor of a [`ttlqt`](TileKernels::ttlqt) factorization.
    fn ttmlq(
        &self,
        side: Side,
        trans: Trans,
        ib: usize,
        a1: TileMut<'_, E>,
        a2: TileMut<'_, E>,
        v: TileRef<'_, E>,
        t: TileRef<'_, E>,
    ) -> Result<()> {
        self.ttmqr(side, trans.flip(), ib, a1, a2, v.transpose(), t)
    }
}

/// Default in-process kernels.
#[derive(Copy, Clone, Debug, Default)]
pub struct NativeKernels;

impl<E: RealField> TileKernels<E> for NativeKernels {}
