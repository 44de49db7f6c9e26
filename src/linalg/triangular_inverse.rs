//! Tiled triangular inverse, and product of a triangular matrix with its transpose.
//!
//! Both algorithms are written for the lower triangle, and run on the transposed tile grid for
//! the upper one.

use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2tr, tr2desc, FlatMut},
    linalg::{
        admit, check_flat_arg,
        cholesky::{is_square, triangle_desc},
        Grid,
    },
    sched::{Access, Region},
    sequence::{Request, Sequence},
    Context, Diag, Side, Trans, Uplo,
};

/// Overwrites the `uplo` triangle of `a` with its inverse.
///
/// If `diag` is [`Diag::NonUnit`] and a diagonal element is zero, the sequence fails with
/// [`Error::Kernel`] holding the 1-based index of a zero diagonal element.
pub fn trtri_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    diag: Diag,
    a: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if !admit(sequence, request, is_square(a), Error::IllegalValue, "trtri: non square matrix") {
        return;
    }

    let kernels = ctx.kernels();
    let desc = a;
    let a = Grid::new(desc, uplo == Uplo::Upper);
    let nt = a.nt();
    let one = E::one();

    for k in 0..nt {
        for m in k + 1..nt {
            let akk = a.tile(k, k);
            let amk = a.tile(m, k);
            region.submit(
                "trsm",
                &[Access::read(akk.key()), Access::read_write(amk.key())],
                sequence,
                request,
                move || unsafe {
                    kernels.trsm(
                        Side::Right,
                        Uplo::Lower,
                        Trans::NoTrans,
                        diag,
                        -one,
                        akk.view(),
                        amk.view_mut(),
                    )
                },
            );
        }
        for m in k + 1..nt {
            for n in 0..k {
                let amk = a.tile(m, k);
                let akn = a.tile(k, n);
                let amn = a.tile(m, n);
                region.submit(
                    "gemm",
                    &[
                        Access::read(amk.key()),
                        Access::read(akn.key()),
                        Access::read_write(amn.key()),
                    ],
                    sequence,
                    request,
                    move || unsafe {
                        kernels.gemm(
                            Trans::NoTrans,
                            Trans::NoTrans,
                            one,
                            amk.view(),
                            akn.view(),
                            one,
                            amn.view_mut(),
                        )
                    },
                );
            }
        }
        for n in 0..k {
            let akk = a.tile(k, k);
            let akn = a.tile(k, n);
            region.submit(
                "trsm",
                &[Access::read(akk.key()), Access::read_write(akn.key())],
                sequence,
                request,
                move || unsafe {
                    kernels.trsm(
                        Side::Left,
                        Uplo::Lower,
                        Trans::NoTrans,
                        diag,
                        one,
                        akk.view(),
                        akn.view_mut(),
                    )
                },
            );
        }

        let akk = a.tile(k, k);
        let base = desc.tile_row_offset(k);
        region.submit(
            "trtri",
            &[Access::read_write(akk.key())],
            sequence,
            request,
            move || unsafe {
                kernels
                    .trtri(Uplo::Lower, diag, akk.view_mut())
                    .map_err(|err| err.offset(base))
            },
        );
    }
}

/// Overwrites the `uplo` triangle of `a` with $L^\top L$ (lower) or $U U^\top$ (upper), where
/// $L$ or $U$ is that triangle.
pub fn lauum_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    a: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if !admit(sequence, request, is_square(a), Error::IllegalValue, "lauum: non square matrix") {
        return;
    }

    let kernels = ctx.kernels();
    let a = Grid::new(a, uplo == Uplo::Upper);
    let nt = a.nt();
    let one = E::one();

    for k in 0..nt {
        for n in 0..k {
            let akn = a.tile(k, n);
            let ann = a.tile(n, n);
            region.submit(
                "syrk",
                &[Access::read(akn.key()), Access::read_write(ann.key())],
                sequence,
                request,
                move || unsafe {
                    let (a, c) = (akn.view(), ann.view_mut());
                    kernels.syrk(Uplo::Lower, Trans::Trans, one, a, one, c)
                },
            );
            for m in n + 1..k {
                let akm = a.tile(k, m);
                let akn = a.tile(k, n);
                let amn = a.tile(m, n);
                region.submit(
                    "gemm",
                    &[
                        Access::read(akm.key()),
                        Access::read(akn.key()),
                        Access::read_write(amn.key()),
                    ],
                    sequence,
                    request,
                    move || unsafe {
                        let (a, b, c) = (akm.view(), akn.view(), amn.view_mut());
                        kernels.gemm(Trans::Trans, Trans::NoTrans, one, a, b, one, c)
                    },
                );
            }
        }
        for n in 0..k {
            let akk = a.tile(k, k);
            let akn = a.tile(k, n);
            region.submit(
                "trmm",
                &[Access::read(akk.key()), Access::read_write(akn.key())],
                sequence,
                request,
                move || unsafe {
                    kernels.trmm(
                        Side::Left,
                        Uplo::Lower,
                        Trans::Trans,
                        Diag::NonUnit,
                        one,
                        akk.view(),
                        akn.view_mut(),
                    )
                },
            );
        }

        let akk = a.tile(k, k);
        region.submit(
            "lauum",
            &[Access::read_write(akk.key())],
            sequence,
            request,
            move || unsafe { kernels.lauum(Uplo::Lower, akk.view_mut()) },
        );
    }
}

/// Overwrites the `n×n` triangle `uplo` of `a` with its inverse.
///
/// # Errors
///
/// - [`Error::IllegalArgument`] with index `4` if `a` is too short, or `5` if
/// `lda < max(1, n)`.
/// - [`Error::Kernel`] with the index of a zero diagonal element.
pub fn trtri<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    diag: Diag,
    n: usize,
    a: &mut [E],
    lda: usize,
) -> Result<()> {
    check_flat_arg(a, n, n, lda, 4, 5)?;
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
            trtri_tile(ctx, region, uplo, diag, &a_desc, &sequence, &request);
            desc2tr(region, uplo, &a_desc, &a, &sequence, &request);
        });
    }
    sequence.status()
}

/// Overwrites the `n×n` triangle `uplo` of `a` with $L^\top L$ or $U U^\top$.
///
/// # Errors
///
/// [`Error::IllegalArgument`] with index `3` if `a` is too short, or `4` if `lda < max(1, n)`.
pub fn lauum<E: RealField, K: TileKernels<E>>(
    ctx: &Context<K>,
    uplo: Uplo,
    n: usize,
    a: &mut [E],
    lda: usize,
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
            lauum_tile(ctx, region, uplo, &a_desc, &sequence, &request);
            desc2tr(region, uplo, &a_desc, &a, &sequence, &request);
        });
    }
    sequence.status()
}
