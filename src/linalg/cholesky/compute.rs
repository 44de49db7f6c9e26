use crate::{
    desc::TileDesc,
    error::{Error, Result},
    field::RealField,
    kernel::TileKernels,
    layout::{desc2tr, tr2desc, FlatMut},
    linalg::{
        admit, check_flat_arg,
        cholesky::{is_square, triangle_desc},
    },
    sched::{Access, Region},
    sequence::{Request, Sequence},
    Context, Diag, Side, Trans, Uplo,
};

/// Computes the Cholesky factor of the symmetric positive definite matrix `a`, whose `uplo`
/// triangle is overwritten with $L$ or $U$.
///
/// If a leading minor is not positive definite, the sequence fails with
/// [`Error::Kernel`] holding the 1-based order of the first such minor found.
pub fn potrf_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    a: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    if !admit(sequence, request, is_square(a), Error::IllegalValue, "potrf: non square matrix") {
        return;
    }

    let kernels = ctx.kernels();
    let nt = a.nt();
    let one = E::one();

    for k in 0..nt {
        let akk = a.tile(k, k);
        let base = a.tile_row_offset(k);
        {
            let akk = akk.clone();
            region.submit(
                "potrf",
                &[Access::read_write(akk.key())],
                sequence,
                request,
                move || unsafe {
                    kernels
                        .potrf(uplo, akk.as_mut())
                        .map_err(|err| err.offset(base))
                },
            );
        }

        match uplo {
            Uplo::Lower => {
                for m in k + 1..nt {
                    let akk = akk.clone();
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
                                Trans::Trans,
                                Diag::NonUnit,
                                one,
                                akk.as_ref(),
                                amk.as_mut(),
                            )
                        },
                    );
                }
                for m in k + 1..nt {
                    let amk = a.tile(m, k);
                    let amm = a.tile(m, m);
                    {
                        let amk = amk.clone();
                        region.submit(
                            "syrk",
                            &[Access::read(amk.key()), Access::read_write(amm.key())],
                            sequence,
                            request,
                            move || unsafe {
                                let (a, c) = (amk.as_ref(), amm.as_mut());
                                kernels.syrk(Uplo::Lower, Trans::NoTrans, -one, a, one, c)
                            },
                        );
                    }
                    for n in k + 1..m {
                        let amk = amk.clone();
                        let ank = a.tile(n, k);
                        let amn = a.tile(m, n);
                        region.submit(
                            "gemm",
                            &[
                                Access::read(amk.key()),
                                Access::read(ank.key()),
                                Access::read_write(amn.key()),
                            ],
                            sequence,
                            request,
                            move || unsafe {
                                let (a, b, c) = (amk.as_ref(), ank.as_ref(), amn.as_mut());
                                kernels.gemm(Trans::NoTrans, Trans::Trans, -one, a, b, one, c)
                            },
                        );
                    }
                }
            }
            Uplo::Upper => {
                for n in k + 1..nt {
                    let akk = akk.clone();
                    let akn = a.tile(k, n);
                    region.submit(
                        "trsm",
                        &[Access::read(akk.key()), Access::read_write(akn.key())],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.trsm(
                                Side::Left,
                                Uplo::Upper,
                                Trans::Trans,
                                Diag::NonUnit,
                                one,
                                akk.as_ref(),
                                akn.as_mut(),
                            )
                        },
                    );
                }
                for n in k + 1..nt {
                    let akn = a.tile(k, n);
                    let ann = a.tile(n, n);
                    {
                        let akn = akn.clone();
                        region.submit(
                            "syrk",
                            &[Access::read(akn.key()), Access::read_write(ann.key())],
                            sequence,
                            request,
                            move || unsafe {
                                let (a, c) = (akn.as_ref(), ann.as_mut());
                                kernels.syrk(Uplo::Upper, Trans::Trans, -one, a, one, c)
                            },
                        );
                    }
                    for m in k + 1..n {
                        let akn = akn.clone();
                        let akm = a.tile(k, m);
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
                                let (a, b, c) = (akm.as_ref(), akn.as_ref(), amn.as_mut());
                                kernels.gemm(Trans::Trans, Trans::NoTrans, -one, a, b, one, c)
                            },
                        );
                    }
                }
            }
        }
    }
}

/// Computes the Cholesky factor of the `n×n` symmetric positive definite matrix stored in the
/// `uplo` triangle of `a`, overwriting that triangle.
///
/// # Errors
///
/// - [`Error::IllegalArgument`] with index `3` if `a` is too short, or `4` if
/// `lda < max(1, n)`.
/// - [`Error::Kernel`] with the order of the first leading minor that is not positive definite.
pub fn potrf<E: RealField, K: TileKernels<E>>(
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
            potrf_tile(ctx, region, uplo, &a_desc, &sequence, &request);
            desc2tr(region, uplo, &a_desc, &a, &sequence, &request);
        });
    }
    sequence.status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{linalg::test_utils::*, Parallelism};
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn factor_reconstructs_the_input() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let ctx = Context::builder()
                .tile_size(3)
                .inner_block_size(3)
                .parallelism(parallelism)
                .build()
                .unwrap();
            let n = 11;
            let a0 = spd(n);

            for uplo in [Uplo::Lower, Uplo::Upper] {
                let mut a = a0.clone();
                potrf(&ctx, uplo, n, &mut a, n).unwrap();

                // l holds the lower factor in both cases
                let mut l = vec![0.0; n * n];
                for j in 0..n {
                    for i in j..n {
                        l[i + j * n] = match uplo {
                            Uplo::Lower => a[i + j * n],
                            Uplo::Upper => a[j + i * n],
                        };
                    }
                }
                let mut lt = vec![0.0; n * n];
                for j in 0..n {
                    for i in 0..n {
                        lt[j + i * n] = l[i + j * n];
                    }
                }
                let llt = matmul(false, n, n, n, &l, &lt);
                for (x, y) in llt.iter().zip(&a0) {
                    assert_approx_eq!(x, y, 1e-10);
                }

                // the other triangle is left untouched
                for j in 0..n {
                    for i in 0..n {
                        let outside = match uplo {
                            Uplo::Lower => i < j,
                            Uplo::Upper => i > j,
                        };
                        if outside {
                            assert_eq!(a[i + j * n], a0[i + j * n]);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn failing_minor_has_a_global_index() {
        for parallelism in [Parallelism::None, Parallelism::Rayon(0)] {
            let ctx = Context::builder()
                .tile_size(2)
                .inner_block_size(2)
                .parallelism(parallelism)
                .build()
                .unwrap();
            let n = 8;
            let mut a = vec![0.0f64; n * n];
            for i in 0..n {
                a[i + i * n] = if i == 5 { -1.0 } else { 1.0 };
            }
            assert_eq!(
                potrf(&ctx, Uplo::Lower, n, &mut a, n).unwrap_err(),
                Error::Kernel { info: 6 }
            );
        }
    }
}
