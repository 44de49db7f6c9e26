//! Tiled matrix multiplication.

use crate::{
    desc::TileDesc,
    error::Error,
    field::RealField,
    kernel::TileKernels,
    linalg::{admit, Grid},
    mat::TileRef,
    sched::{Access, Region},
    sequence::{Request, Sequence},
    Context, Trans, Uplo,
};

/// Empty `nrows×0` view, used to scale a tile through the multiplication kernels.
#[inline]
fn empty<E>(nrows: usize) -> TileRef<'static, E> {
    TileRef::from_col_major_slice(&[], nrows, 0, Ord::max(1, nrows))
}

/// Computes $C := \alpha\,\text{op}(A)\,\text{op}(B) + \beta C$.
///
/// The tilings of the operands must agree along every shared dimension.
pub fn gemm_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    transa: Trans,
    transb: Trans,
    alpha: E,
    a: &TileDesc<E>,
    b: &TileDesc<E>,
    beta: E,
    c: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let a = Grid::new(a, transa.is_trans());
    let b = Grid::new(b, transb.is_trans());
    let c = Grid::new(c, false);

    let valid = a.desc().check().is_ok()
        && b.desc().check().is_ok()
        && c.desc().check().is_ok()
        && a.m() == c.m()
        && b.n() == c.n()
        && a.n() == b.m()
        && a.row_tiling() == c.row_tiling()
        && b.col_tiling() == c.col_tiling()
        && a.col_tiling() == b.row_tiling();
    if !admit(sequence, request, valid, Error::IllegalValue, "gemm: incompatible descriptors") {
        return;
    }

    let kernels = ctx.kernels();
    let kt = a.nt();

    for m in 0..c.mt() {
        for n in 0..c.nt() {
            if kt == 0 {
                let cmn = c.tile(m, n);
                region.submit(
                    "gemm",
                    &[Access::read_write(cmn.key())],
                    sequence,
                    request,
                    move || unsafe {
                        let c = cmn.view_mut();
                        let (rows, cols) = (c.nrows(), c.ncols());
                        kernels.gemm(
                            Trans::NoTrans,
                            Trans::Trans,
                            alpha,
                            empty(rows),
                            empty(cols),
                            beta,
                            c,
                        )
                    },
                );
                continue;
            }

            for k in 0..kt {
                let zbeta = if k == 0 { beta } else { E::one() };
                let amk = a.tile(m, k);
                let bkn = b.tile(k, n);
                let cmn = c.tile(m, n);
                region.submit(
                    "gemm",
                    &[
                        Access::read(amk.key()),
                        Access::read(bkn.key()),
                        Access::read_write(cmn.key()),
                    ],
                    sequence,
                    request,
                    move || unsafe {
                        kernels.gemm(
                            Trans::NoTrans,
                            Trans::NoTrans,
                            alpha,
                            amk.view(),
                            bkn.view(),
                            zbeta,
                            cmn.view_mut(),
                        )
                    },
                );
            }
        }
    }
}

/// Computes the `uplo` triangle of $C := \alpha\,\text{op}(A)\,\text{op}(A)^\top + \beta C$.
///
/// Tiles of `c` strictly outside of the triangle are not accessed.
pub fn syrk_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    trans: Trans,
    alpha: E,
    a: &TileDesc<E>,
    beta: E,
    c: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let a = Grid::new(a, trans.is_trans());
    let c = Grid::new(c, false);

    let valid = a.desc().check().is_ok()
        && c.desc().check().is_ok()
        && c.m() == c.n()
        && c.row_tiling() == c.col_tiling()
        && a.m() == c.m()
        && a.row_tiling() == c.row_tiling();
    if !admit(sequence, request, valid, Error::IllegalValue, "syrk: incompatible descriptors") {
        return;
    }

    let kernels = ctx.kernels();
    let kt = a.nt();

    for n in 0..c.nt() {
        let rows = match uplo {
            Uplo::Lower => n..c.mt(),
            Uplo::Upper => 0..n + 1,
        };
        for m in rows {
            if kt == 0 {
                let cmn = c.tile(m, n);
                region.submit(
                    "syrk",
                    &[Access::read_write(cmn.key())],
                    sequence,
                    request,
                    move || unsafe {
                        let c = cmn.view_mut();
                        let (rows, cols) = (c.nrows(), c.ncols());
                        if m == n {
                            kernels.syrk(uplo, Trans::NoTrans, alpha, empty(rows), beta, c)
                        } else {
                            kernels.gemm(
                                Trans::NoTrans,
                                Trans::Trans,
                                alpha,
                                empty(rows),
                                empty(cols),
                                beta,
                                c,
                            )
                        }
                    },
                );
                continue;
            }

            for k in 0..kt {
                let zbeta = if k == 0 { beta } else { E::one() };
                let amk = a.tile(m, k);
                let cmn = c.tile(m, n);
                if m == n {
                    region.submit(
                        "syrk",
                        &[Access::read(amk.key()), Access::read_write(cmn.key())],
                        sequence,
                        request,
                        move || unsafe {
                            let (a, c) = (amk.view(), cmn.view_mut());
                            kernels.syrk(uplo, Trans::NoTrans, alpha, a, zbeta, c)
                        },
                    );
                } else {
                    let ank = a.tile(n, k);
                    region.submit(
                        "gemm",
                        &[
                            Access::read(amk.key()),
                            Access::read(ank.key()),
                            Access::read_write(cmn.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.gemm(
                                Trans::NoTrans,
                                Trans::Trans,
                                alpha,
                                amk.view(),
                                ank.view(),
                                zbeta,
                                cmn.view_mut(),
                            )
                        },
                    );
                }
            }
        }
    }
}

/// Computes the `uplo` triangle of
/// $C := \alpha\,\text{op}(A)\,\text{op}(B)^\top + \alpha\,\text{op}(B)\,\text{op}(A)^\top + \beta C$.
///
/// `a` and `b` must be tiled identically. Tiles of `c` strictly outside of the triangle are not
/// accessed.
pub fn syr2k_tile<'scope, E: RealField, K: TileKernels<E>>(
    ctx: &'scope Context<K>,
    region: &Region<'_, 'scope>,
    uplo: Uplo,
    trans: Trans,
    alpha: E,
    a: &TileDesc<E>,
    b: &TileDesc<E>,
    beta: E,
    c: &TileDesc<E>,
    sequence: &'scope Sequence,
    request: &'scope Request,
) {
    let a = Grid::new(a, trans.is_trans());
    let b = Grid::new(b, trans.is_trans());
    let c = Grid::new(c, false);

    let valid = a.desc().check().is_ok()
        && b.desc().check().is_ok()
        && c.desc().check().is_ok()
        && c.m() == c.n()
        && c.row_tiling() == c.col_tiling()
        && a.m() == c.m()
        && a.row_tiling() == c.row_tiling()
        && b.m() == a.m()
        && b.n() == a.n()
        && b.row_tiling() == a.row_tiling()
        && b.col_tiling() == a.col_tiling();
    if !admit(sequence, request, valid, Error::IllegalValue, "syr2k: incompatible descriptors") {
        return;
    }

    let kernels = ctx.kernels();
    let kt = a.nt();

    for n in 0..c.nt() {
        let rows = match uplo {
            Uplo::Lower => n..c.mt(),
            Uplo::Upper => 0..n + 1,
        };
        for m in rows {
            if kt == 0 {
                let cmn = c.tile(m, n);
                region.submit(
                    "syr2k",
                    &[Access::read_write(cmn.key())],
                    sequence,
                    request,
                    move || unsafe {
                        let c = cmn.view_mut();
                        let rows = c.nrows();
                        kernels.syrk(uplo, Trans::NoTrans, alpha, empty(rows), beta, c)
                    },
                );
                continue;
            }

            for k in 0..kt {
                let zbeta = if k == 0 { beta } else { E::one() };
                let amk = a.tile(m, k);
                let bmk = b.tile(m, k);
                let cmn = c.tile(m, n);
                if m == n {
                    region.submit(
                        "syr2k",
                        &[
                            Access::read(amk.key()),
                            Access::read(bmk.key()),
                            Access::read_write(cmn.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            let (a, b, c) = (amk.view(), bmk.view(), cmn.view_mut());
                            kernels.syr2k(uplo, Trans::NoTrans, alpha, a, b, zbeta, c)
                        },
                    );
                } else {
                    let ank = a.tile(n, k);
                    let bnk = b.tile(n, k);
                    region.submit(
                        "gemm",
                        &[
                            Access::read(amk.key()),
                            Access::read(bnk.key()),
                            Access::read_write(cmn.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.gemm(
                                Trans::NoTrans,
                                Trans::Trans,
                                alpha,
                                amk.view(),
                                bnk.view(),
                                zbeta,
                                cmn.view_mut(),
                            )
                        },
                    );
                    let cmn = c.tile(m, n);
                    region.submit(
                        "gemm",
                        &[
                            Access::read(bmk.key()),
                            Access::read(ank.key()),
                            Access::read_write(cmn.key()),
                        ],
                        sequence,
                        request,
                        move || unsafe {
                            kernels.gemm(
                                Trans::NoTrans,
                                Trans::Trans,
                                alpha,
                                bmk.view(),
                                ank.view(),
                                E::one(),
                                cmn.view_mut(),
                            )
                        },
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        layout::{desc2ge, ge2desc, FlatMut, FlatRef},
        linalg::test_utils::*,
        Parallelism,
    };
    use assert_approx_eq::assert_approx_eq;

    fn ctx() -> Context {
        Context::builder()
            .tile_size(3)
            .inner_block_size(3)
            .parallelism(Parallelism::Rayon(0))
            .build()
            .unwrap()
    }

    #[test]
    fn gemm_matches_the_reference() {
        let ctx = ctx();
        let (m, n, k) = (7, 5, 8);
        let (alpha, beta) = (1.5, -0.5);

        for (transa, transb) in [
            (Trans::NoTrans, Trans::NoTrans),
            (Trans::Trans, Trans::NoTrans),
            (Trans::NoTrans, Trans::Trans),
            (Trans::Trans, Trans::Trans),
        ] {
            let (am, an) = if transa.is_trans() { (k, m) } else { (m, k) };
            let (bm, bn) = if transb.is_trans() { (n, k) } else { (k, n) };
            let a = random(am, an);
            let b = random(bm, bn);
            let c0 = random(m, n);
            let mut c = c0.clone();

            let a_desc = TileDesc::<f64>::general(3, 3, am, an).unwrap();
            let b_desc = TileDesc::<f64>::general(3, 3, bm, bn).unwrap();
            let c_desc = TileDesc::<f64>::general(3, 3, m, n).unwrap();
            let sequence = Sequence::new();
            let request = Request::new();
            {
                let a = FlatRef::new(&a, am, an, am).unwrap();
                let b = FlatRef::new(&b, bm, bn, bm).unwrap();
                let c = FlatMut::new(&mut c, m, n, m).unwrap();
                ctx.region(|region| {
                    ge2desc(region, a, &a_desc, &sequence, &request);
                    ge2desc(region, b, &b_desc, &sequence, &request);
                    ge2desc(region, c.as_ref(), &c_desc, &sequence, &request);
                    gemm_tile(
                        &ctx, region, transa, transb, alpha, &a_desc, &b_desc, beta, &c_desc,
                        &sequence, &request,
                    );
                    desc2ge(region, &c_desc, &c, &sequence, &request);
                });
            }
            sequence.status().unwrap();

            // explicit op(b) in column-major k×n form
            let mut opb = vec![0.0; k * n];
            for j in 0..n {
                for p in 0..k {
                    opb[p + j * k] = if transb.is_trans() { b[j + p * n] } else { b[p + j * k] };
                }
            }
            let ab = matmul(transa.is_trans(), m, k, n, &a, &opb);
            for i in 0..m * n {
                assert_approx_eq!(c[i], alpha * ab[i] + beta * c0[i], 1e-12);
            }
        }
    }

    #[test]
    fn syrk_only_touches_its_triangle() {
        let ctx = ctx();
        let (n, k) = (8, 4);
        let a = random(n, k);
        let c0 = random(n, n);
        let mut c = c0.clone();

        let a_desc = TileDesc::<f64>::general(3, 3, n, k).unwrap();
        let c_desc = TileDesc::<f64>::general(3, 3, n, n).unwrap();
        let sequence = Sequence::new();
        let request = Request::new();
        {
            let a = FlatRef::new(&a, n, k, n).unwrap();
            let c = FlatMut::new(&mut c, n, n, n).unwrap();
            ctx.region(|region| {
                ge2desc(region, a, &a_desc, &sequence, &request);
                ge2desc(region, c.as_ref(), &c_desc, &sequence, &request);
                syrk_tile(
                    &ctx,
                    region,
                    Uplo::Lower,
                    Trans::NoTrans,
                    2.0,
                    &a_desc,
                    1.0,
                    &c_desc,
                    &sequence,
                    &request,
                );
                desc2ge(region, &c_desc, &c, &sequence, &request);
            });
        }
        sequence.status().unwrap();

        let mut at = vec![0.0; k * n];
        for j in 0..k {
            for i in 0..n {
                at[j + i * k] = a[i + j * n];
            }
        }
        let aat = matmul(false, n, k, n, &a, &at);
        for j in 0..n {
            for i in 0..n {
                let idx = i + j * n;
                if i >= j {
                    assert_approx_eq!(c[idx], 2.0 * aat[idx] + c0[idx], 1e-12);
                } else {
                    assert_eq!(c[idx], c0[idx]);
                }
            }
        }
    }

    #[test]
    fn syr2k_matches_the_reference() {
        let ctx = ctx();
        let (n, k) = (8, 5);
        let (alpha, beta) = (0.5, 2.0);

        for uplo in [Uplo::Lower, Uplo::Upper] {
            for trans in [Trans::NoTrans, Trans::Trans] {
                let (am, an) = if trans.is_trans() { (k, n) } else { (n, k) };
                let a = random(am, an);
                let b = random(am, an);
                let c0 = random(n, n);
                let mut c = c0.clone();

                let a_desc = TileDesc::<f64>::general(3, 3, am, an).unwrap();
                let b_desc = TileDesc::<f64>::general(3, 3, am, an).unwrap();
                let c_desc = TileDesc::<f64>::general(3, 3, n, n).unwrap();
                let sequence = Sequence::new();
                let request = Request::new();
                {
                    let a = FlatRef::new(&a, am, an, am).unwrap();
                    let b = FlatRef::new(&b, am, an, am).unwrap();
                    let c = FlatMut::new(&mut c, n, n, n).unwrap();
                    ctx.region(|region| {
                        ge2desc(region, a, &a_desc, &sequence, &request);
                        ge2desc(region, b, &b_desc, &sequence, &request);
                        ge2desc(region, c.as_ref(), &c_desc, &sequence, &request);
                        syr2k_tile(
                            &ctx, region, uplo, trans, alpha, &a_desc, &b_desc, beta, &c_desc,
                            &sequence, &request,
                        );
                        desc2ge(region, &c_desc, &c, &sequence, &request);
                    });
                }
                sequence.status().unwrap();

                let op = |x: &[f64], i: usize, p: usize| {
                    if trans.is_trans() {
                        x[p + i * am]
                    } else {
                        x[i + p * am]
                    }
                };
                for j in 0..n {
                    for i in 0..n {
                        let idx = i + j * n;
                        let stored = match uplo {
                            Uplo::Lower => i >= j,
                            Uplo::Upper => i <= j,
                        };
                        if stored {
                            let acc: f64 = (0..k)
                                .map(|p| op(&a, i, p) * op(&b, j, p) + op(&b, i, p) * op(&a, j, p))
                                .sum();
                            assert_approx_eq!(c[idx], alpha * acc + beta * c0[idx], 1e-12);
                        } else {
                            assert_eq!(c[idx], c0[idx]);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn syr2k_rejects_mismatched_operands() {
        let ctx = ctx();
        let a_desc = TileDesc::<f64>::general(3, 3, 6, 4).unwrap();
        let b_desc = TileDesc::<f64>::general(3, 3, 6, 5).unwrap();
        let c_desc = TileDesc::<f64>::general(3, 3, 6, 6).unwrap();
        let sequence = Sequence::new();
        let request = Request::new();
        ctx.region(|region| {
            syr2k_tile(
                &ctx,
                region,
                Uplo::Lower,
                Trans::NoTrans,
                1.0,
                &a_desc,
                &b_desc,
                0.0,
                &c_desc,
                &sequence,
                &request,
            );
            assert_eq!(region.submitted(), 0);
        });
        assert_eq!(sequence.status(), Err(Error::IllegalValue));
    }

    #[test]
    fn empty_inner_dimension_scales() {
        let ctx = ctx();
        let (m, n) = (4, 5);
        let c0 = random(m, n);
        let mut c = c0.clone();

        let a_desc = TileDesc::<f64>::general(3, 3, m, 0).unwrap();
        let b_desc = TileDesc::<f64>::general(3, 3, 0, n).unwrap();
        let c_desc = TileDesc::<f64>::general(3, 3, m, n).unwrap();
        let sequence = Sequence::new();
        let request = Request::new();
        {
            let c = FlatMut::new(&mut c, m, n, m).unwrap();
            ctx.region(|region| {
                ge2desc(region, c.as_ref(), &c_desc, &sequence, &request);
                gemm_tile(
                    &ctx,
                    region,
                    Trans::NoTrans,
                    Trans::NoTrans,
                    1.0,
                    &a_desc,
                    &b_desc,
                    3.0,
                    &c_desc,
                    &sequence,
                    &request,
                );
                desc2ge(region, &c_desc, &c, &sequence, &request);
            });
        }
        sequence.status().unwrap();
        for (x, y) in c.iter().zip(&c0) {
            assert_approx_eq!(x, 3.0 * y, 1e-14);
        }
    }
}
