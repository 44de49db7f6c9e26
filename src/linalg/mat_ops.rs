//! Tiled element-wise operations.

use crate::{
    desc::{MatrixType, TileDesc},
    error::Error,
    field::RealField,
    kernel::TileKernels,
    linalg::{admit, Grid},
    sched::{Access, Region},
    sequence::{Request, Sequence},
    Context, Trans, Uplo,
};

#[inline]
fn in_part(kind: MatrixType, k: usize, l: usize) -> bool {
    match kind {
        MatrixType::General => true,
        MatrixType::Upper => k <= l,
        MatrixType::Lower => k >= l,
    }
}

/// Sets the off-diagonal elements of the `kind` part of `a` to `alpha`, and its diagonal
/// elements to `beta`.
pub fn laset_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    kind: MatrixType,
    alpha: E,
    beta: E,
    a: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if !admit(sequence, request, a.check().is_ok(), Error::IllegalValue, "laset: invalid descriptor") {
        return;
    }

    let kernels = ctx.kernels();
    for l in 0..a.nt() {
        for k in 0..a.mt() {
            if !in_part(kind, k, l) {
                continue;
            }
            let (tile_kind, tile_beta) = if k == l {
                (kind, beta)
            } else {
                (MatrixType::General, alpha)
            };
            let akl = a.tile(k, l);
            region.submit(
                "laset",
                &[Access::write(akl.key())],
                sequence,
                request,
                move || unsafe { kernels.laset(tile_kind, alpha, tile_beta, akl.as_mut()) },
            );
        }
    }
}

fn add<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Option<Uplo>,
    trans: Trans,
    alpha: E,
    a: &TileDesc<E>,
    beta: E,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let a = Grid::new(a, trans.is_trans());
    let b = Grid::new(b, false);

    let valid = a.desc().check().is_ok()
        && b.desc().check().is_ok()
        && a.m() == b.m()
        && a.n() == b.n()
        && a.row_tiling() == b.row_tiling()
        && a.col_tiling() == b.col_tiling()
        && (uplo.is_none() || (b.m() == b.n() && b.row_tiling() == b.col_tiling()));
    if !admit(sequence, request, valid, Error::IllegalValue, "add: incompatible descriptors") {
        return;
    }

    let kernels = ctx.kernels();
    let kind = match uplo {
        None => MatrixType::General,
        Some(Uplo::Upper) => MatrixType::Upper,
        Some(Uplo::Lower) => MatrixType::Lower,
    };

    for l in 0..b.nt() {
        for k in 0..b.mt() {
            if !in_part(kind, k, l) {
                continue;
            }
            let akl = a.tile(k, l);
            let bkl = b.tile(k, l);
            let diagonal = match uplo {
                Some(uplo) if k == l => Some(uplo),
                _ => None,
            };
            region.submit(
                if diagonal.is_some() { "tradd" } else { "geadd" },
                &[Access::read(akl.key()), Access::read_write(bkl.key())],
                sequence,
                request,
                move || unsafe {
                    let (a, b) = (akl.view(), bkl.view_mut());
                    match diagonal {
                        Some(uplo) => kernels.tradd(uplo, Trans::NoTrans, alpha, a, beta, b),
                        None => kernels.geadd(Trans::NoTrans, alpha, a, beta, b),
                    }
                },
            );
        }
    }
}

/// Computes $B := \alpha\,\text{op}(A) + \beta B$.
#[inline]
pub fn geadd_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    trans: Trans,
    alpha: E,
    a: &TileDesc<E>,
    beta: E,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    add(ctx, region, None, trans, alpha, a, beta, b, sequence, request)
}

/// Computes the `uplo` triangle of $B := \alpha\,\text{op}(A) + \beta B$.
///
/// `b` must be square with square tiles. The other triangle of `b` is not accessed.
#[inline]
pub fn tradd_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    trans: Trans,
    alpha: E,
    a: &TileDesc<E>,
    beta: E,
    b: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    add(ctx, region, Some(uplo), trans, alpha, a, beta, b, sequence, request)
}
