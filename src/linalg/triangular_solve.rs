//! Tiled triangular solve.

use crate::{
    desc::TileDesc,
    error::Error,
    field::RealField,
    kernel::TileKernels,
    linalg::{admit, Grid},
    sched::{Access, Region},
    sequence::{Request, Sequence},
    Context, Diag, Side, Trans, Uplo,
};

/// Solves $\text{op}(A)X = \alpha B$ (left) or $X\text{op}(A) = \alpha B$ (right) for the
/// triangular matrix $A$, overwriting `b` with $X$.
///
/// Only the `uplo` triangle of `a` is accessed, and its diagonal is assumed to be one if `diag`
/// is [`Diag::Unit`]. `a` must be square with square tiles, tiled like the dimension of `b` it
/// applies to.
pub fn trsm_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    side: Side,
    uplo: Uplo,
    trans: Trans,
    diag: Diag,
    alpha: E,
    a: &TileDesc<E>,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    // x op(a) = b  <=>  op(a)^T x^T = b^T
    let (trans, b) = match side {
        Side::Left => (trans, Grid::new(b, false)),
        Side::Right => (trans.flip(), Grid::new(b, true)),
    };
    // op(a) = a^T is the opposite triangle of a transposed grid
    let (a, lower) = if trans.is_trans() {
        (Grid::new(a, true), uplo == Uplo::Upper)
    } else {
        (Grid::new(a, false), uplo == Uplo::Lower)
    };

    let valid = a.desc().check().is_ok()
        && b.desc().check().is_ok()
        && a.m() == a.n()
        && a.row_tiling() == a.col_tiling()
        && a.n() == b.m()
        && a.col_tiling() == b.row_tiling();
    if !admit(sequence, request, valid, Error::IllegalValue, "trsm: incompatible descriptors") {
        return;
    }

    let kernels = ctx.kernels();
    let (mt, nt) = (b.mt(), b.nt());
    let uplo = if lower { Uplo::Lower } else { Uplo::Upper };

    for step in 0..mt {
        let k = if lower { step } else { mt - 1 - step };
        let lalpha = if step == 0 { alpha } else { E::one() };

        for n in 0..nt {
            let akk = a.tile(k, k);
            let bkn = b.tile(k, n);
            region.submit(
                "trsm",
                &[Access::read(akk.key()), Access::read_write(bkn.key())],
                sequence,
                request,
                move || unsafe {
                    kernels.trsm(
                        Side::Left,
                        uplo,
                        Trans::NoTrans,
                        diag,
                        lalpha,
                        akk.view(),
                        bkn.view_mut(),
                    )
                },
            );
        }

        let rows = if lower { k + 1..mt } else { 0..k };
        for m in rows {
            for n in 0..nt {
                let amk = a.tile(m, k);
                let bkn = b.tile(k, n);
                let bmn = b.tile(m, n);
                region.submit(
                    "gemm",
                    &[
                        Access::read(amk.key()),
                        Access::read(bkn.key()),
                        Access::read_write(bmn.key()),
                    ],
                    sequence,
                    request,
                    move || unsafe {
                        kernels.gemm(
                            Trans::NoTrans,
                            Trans::NoTrans,
                            -E::one(),
                            amk.view(),
                            bkn.view(),
                            lalpha,
                            bmn.view_mut(),
                        )
                    },
                );
            }
        }
    }
}
